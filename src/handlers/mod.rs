pub mod health;
pub mod sync;
pub mod tenant;
pub mod webhooks;
