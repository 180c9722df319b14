use axum::{
    extract::{rejection::JsonRejection, State},
    Extension, Json,
};
use validator::Validate;

use crate::middleware::error_handling::{AppError, Result};
use crate::middleware::Claims;
use crate::models::tenant::{StorefrontStatusResponse, UpdateAccessTokenRequest};
use crate::services::IngestError;
use crate::AppState;

/// Store the storefront Admin API token for the caller's tenant. Enables
/// scheduled sync from the next scheduler tick.
/// POST /api/tenant/shopify-token
pub async fn update_access_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: std::result::Result<Json<UpdateAccessTokenRequest>, JsonRejection>,
) -> Result<Json<StorefrontStatusResponse>> {
    let Json(request) = payload?;
    request.validate()?;
    let access_token = request.access_token.trim();
    if access_token.is_empty() {
        return Err(AppError::BadRequest("Access token is required".to_string()));
    }

    let updated = state
        .tenants
        .update_access_token(claims.tenant_id, Some(access_token))
        .await?;
    if !updated {
        return Err(IngestError::TenantNotFound(claims.tenant_id).into());
    }

    let tenant = state
        .tenants
        .find_by_id(claims.tenant_id)
        .await?
        .ok_or(IngestError::TenantNotFound(claims.tenant_id))?;

    tracing::info!("Storefront access token updated for tenant {}", tenant.id);
    Ok(Json(StorefrontStatusResponse::from(&tenant)))
}

/// Whether the caller's tenant has a storefront token configured.
/// GET /api/tenant/shopify-status
pub async fn storefront_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<StorefrontStatusResponse>> {
    let tenant = state
        .tenants
        .find_by_id(claims.tenant_id)
        .await?
        .ok_or(IngestError::TenantNotFound(claims.tenant_id))?;

    Ok(Json(StorefrontStatusResponse::from(&tenant)))
}
