pub mod entity_store;
pub mod memory_entity_store;
pub mod pg_entity_store;
pub mod tenant_repo;

pub use entity_store::*;
pub use memory_entity_store::MemoryEntityStore;
pub use pg_entity_store::PgEntityStore;
pub use tenant_repo::*;
