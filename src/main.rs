use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shoplytics::config::AppConfig;
use shoplytics::queue::{IngestionWorker, JobQueue, PgJobQueue};
use shoplytics::repositories::{EntityStore, PgEntityStore, PgTenantStore, TenantStore};
use shoplytics::services::{
    BulkSyncService, IngestionDispatcher, ShopifyClient, SyncScheduler, WebhookProcessor,
    WebhookSecurityService,
};
use shoplytics::{create_app, AppState};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the log filter reads RUST_LOG.
    dotenvy::dotenv().ok();

    // Default to INFO; override with RUST_LOG when debugging.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "shoplytics=info,tower_http=info,sqlx=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let pool = config.database.connect().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let store: Arc<dyn EntityStore> = Arc::new(PgEntityStore::new(pool.clone()));
    let tenants: Arc<dyn TenantStore> = Arc::new(PgTenantStore::new(pool.clone()));
    let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(
        pool.clone(),
        config.ingest.stale_job_timeout_secs,
    ));
    let storefront = Arc::new(ShopifyClient::new(config.storefront.clone())?);

    let bulk_sync = Arc::new(BulkSyncService::new(store.clone(), tenants.clone(), storefront));
    let webhooks = Arc::new(WebhookProcessor::new(store));
    let job_options = config.ingest.job_options();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = IngestionWorker::new(
        queue.clone(),
        Arc::new(IngestionDispatcher::new(bulk_sync.clone(), webhooks)),
        config.ingest.worker_concurrency,
        Duration::from_millis(config.ingest.poll_interval_ms),
    );
    let worker_shutdown = shutdown_rx.clone();
    let worker_task = tokio::spawn(async move { worker.run(worker_shutdown).await });

    let scheduler = SyncScheduler::new(
        tenants.clone(),
        queue.clone(),
        job_options,
        config.ingest.sync_interval_hours,
    );
    let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let state = AppState {
        tenants,
        queue,
        bulk_sync,
        webhook_security: WebhookSecurityService::new(&config.webhook_secret),
        jwt_secret: config.jwt_secret.clone(),
        job_options,
    };
    let app = create_app(state, &config.cors_origins);

    let addr = config.server_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Starting Shoplytics ingestion server on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background loops and let in-flight jobs settle.
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_task.await {
        tracing::error!("Ingestion worker task failed: {}", e);
    }
    if let Err(e) = scheduler_task.await {
        tracing::error!("Sync scheduler task failed: {}", e);
    }

    pool.close().await;
    Ok(())
}
