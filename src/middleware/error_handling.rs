// ============================================================================
// Error Handling Middleware
// ============================================================================
//
// Internal errors (database, upstream storefront, job payloads) are logged
// server-side with full detail and answered with a generic message. Client
// errors carry a developer-controlled message. Access tokens and raw
// payloads never appear in a response body.
//
// ============================================================================

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use validator::ValidationErrors;

use crate::services::ingest_error::IngestError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] JsonRejection),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    fn ingest_response(err: IngestError) -> (StatusCode, String) {
        match err {
            IngestError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            IngestError::TenantNotFound(_) => (StatusCode::NOT_FOUND, "Tenant not found".to_string()),
            IngestError::SyncDisabled(_) => (
                StatusCode::CONFLICT,
                "Sync is disabled: no storefront access token configured".to_string(),
            ),
            IngestError::Upstream { status, ref message } => {
                tracing::error!("Storefront rejected request ({}): {}", status, message);
                (StatusCode::BAD_GATEWAY, "Storefront API rejected the request".to_string())
            }
            IngestError::TransientIo(ref msg) => {
                tracing::error!("Storefront unavailable: {}", msg);
                (StatusCode::BAD_GATEWAY, "Storefront API unavailable".to_string())
            }
            other => {
                tracing::error!("Ingestion error: {:?}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation failed".to_string()),
            AppError::Json(ref rejection) => (rejection.status(), "Invalid JSON body".to_string()),
            AppError::Ingest(err) => Self::ingest_response(err),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_sync_disabled_maps_to_conflict() {
        let response = AppError::from(IngestError::SyncDisabled(Uuid::new_v4())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_validation_errors_are_bad_request() {
        let mut errors = ValidationErrors::new();
        errors.add("access_token", validator::ValidationError::new("length"));
        let response = AppError::from(errors).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_database_errors_are_generic() {
        let response = AppError::from(IngestError::Database(sqlx::Error::PoolTimedOut)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
