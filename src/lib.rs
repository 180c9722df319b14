pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod repositories;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, sync, tenant, webhooks};
use crate::middleware::auth_middleware;
use crate::middleware::metrics::{metrics_handler, metrics_middleware};
use crate::models::job::JobOptions;
use crate::queue::JobQueue;
use crate::repositories::TenantStore;
use crate::services::{BulkSyncService, WebhookSecurityService};

/// Shared state for the HTTP ingress. Everything behind an `Arc` so the
/// state clones cheaply per request.
#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<dyn TenantStore>,
    pub queue: Arc<dyn JobQueue>,
    pub bulk_sync: Arc<BulkSyncService>,
    pub webhook_security: WebhookSecurityService,
    pub jwt_secret: String,
    pub job_options: JobOptions,
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    tracing::info!("CORS configured with {} allowed origins", allowed.len());

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
}

pub fn create_app(state: AppState, cors_origins: &[String]) -> Router {
    let protected = Router::new()
        .route("/sync", post(sync::sync_now))
        .route("/sync/enqueue", post(sync::enqueue_sync))
        .route("/jobs/dead", get(sync::list_dead_jobs))
        .route("/tenant/shopify-token", post(tenant::update_access_token))
        .route("/tenant/shopify-status", get(tenant::storefront_status))
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    let api = Router::new()
        .route("/webhooks/:topic", post(webhooks::receive_webhook))
        .merge(protected);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(metrics_middleware))
                .layer(cors_layer(cors_origins)),
        )
}
