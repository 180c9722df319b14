use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::str::FromStr;

use crate::middleware::error_handling::{AppError, Result};
use crate::middleware::metrics::record_webhook_rejection;
use crate::models::job::{IngestionJob, WebhookTopic};
use crate::AppState;

pub const HMAC_HEADER: &str = "x-shopify-hmac-sha256";
pub const SHOP_DOMAIN_HEADER: &str = "x-shopify-shop-domain";

const MAX_PAYLOAD_SIZE: usize = 1_048_576; // 1MB

/// Storefront webhook endpoint
/// POST /api/webhooks/:topic
///
/// The signature is checked against the raw body before anything else is
/// looked at. Accepted payloads are queued as `process-webhook` jobs and
/// answered with 202; processing happens on the ingestion worker.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    if body.len() > MAX_PAYLOAD_SIZE {
        record_webhook_rejection("payload_too_large");
        return Err(AppError::BadRequest("Payload exceeds 1MB limit".to_string()));
    }

    let signature = headers.get(HMAC_HEADER).and_then(|v| v.to_str().ok());
    if let Err(rejection) = state.webhook_security.verify_signature(&body, signature) {
        tracing::warn!("Rejected webhook for topic '{}': {}", topic, rejection.as_str());
        record_webhook_rejection(rejection.as_str());
        return Err(AppError::Unauthorized);
    }

    let topic = WebhookTopic::from_str(&topic).map_err(|e| {
        record_webhook_rejection("unknown_topic");
        AppError::BadRequest(e)
    })?;

    let shop_domain = headers
        .get(SHOP_DOMAIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| {
            record_webhook_rejection("shop_domain_missing");
            AppError::BadRequest("Missing X-Shopify-Shop-Domain header".to_string())
        })?;

    let tenant = state
        .tenants
        .find_by_shop_domain(shop_domain)
        .await?
        .ok_or_else(|| {
            record_webhook_rejection("unknown_shop");
            AppError::NotFound("Unknown shop".to_string())
        })?;

    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        record_webhook_rejection("invalid_json");
        AppError::BadRequest(format!("Invalid JSON payload: {}", e))
    })?;

    let job = IngestionJob::ProcessWebhook {
        tenant_id: tenant.id,
        topic,
        payload,
    };
    let job_id = state.queue.enqueue(job, state.job_options).await?;

    // Metadata only, the payload carries customer PII.
    tracing::info!(
        "Queued {} webhook for tenant {} as job {} ({} bytes)",
        topic,
        tenant.id,
        job_id,
        body.len()
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "accepted",
            "job_id": job_id,
            "topic": topic,
        })),
    ))
}
