pub mod checkout;
pub mod customer;
pub mod job;
pub mod order;
pub mod product;
pub mod shopify;
pub mod sync;
pub mod tenant;
