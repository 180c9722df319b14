pub mod aggregate_service;
pub mod bulk_sync_service;
pub mod ingest_error;
pub mod ingestion_dispatcher;
pub mod reconciler;
pub mod storefront_client;
pub mod sync_scheduler;
pub mod webhook_processor;
pub mod webhook_security_service;

pub use aggregate_service::AggregateService;
pub use bulk_sync_service::BulkSyncService;
pub use ingest_error::IngestError;
pub use ingestion_dispatcher::IngestionDispatcher;
pub use reconciler::{EntityKind, UpsertOp, UpsertReconciler};
pub use storefront_client::{ShopifyClient, StorefrontApi};
pub use sync_scheduler::SyncScheduler;
pub use webhook_processor::WebhookProcessor;
pub use webhook_security_service::WebhookSecurityService;
