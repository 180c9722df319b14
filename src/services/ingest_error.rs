// Ingestion error taxonomy shared by the reconciler, the sync engine,
// the webhook processor and the queue worker.

use reqwest::StatusCode;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Payload is missing its external id or has a malformed shape.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upstream timeout, connection failure, 5xx or rate limiting.
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Upstream rejected the request and repeating it will not help (bad credential, 404).
    #[error("Storefront API error ({status}): {message}")]
    Upstream { status: StatusCode, message: String },

    #[error("Tenant {0} not found")]
    TenantNotFound(Uuid),

    #[error("Sync disabled for tenant {0}: no access token configured")]
    SyncDisabled(Uuid),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    pub fn validation(message: impl Into<String>) -> Self {
        IngestError::Validation(message.into())
    }

    /// Whether the queue should schedule another attempt for a job that failed with this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::TransientIo(_) => true,
            IngestError::Database(err) => !matches!(
                err,
                sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::TypeNotFound { .. }
            ),
            IngestError::Validation(_)
            | IngestError::Upstream { .. }
            | IngestError::TenantNotFound(_)
            | IngestError::SyncDisabled(_)
            | IngestError::Serialization(_) => false,
        }
    }

    /// Short machine-readable label used in metrics and sync summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "validation",
            IngestError::TransientIo(_) => "transient_io",
            IngestError::Database(_) => "database",
            IngestError::Upstream { .. } => "upstream",
            IngestError::TenantNotFound(_) => "tenant_not_found",
            IngestError::SyncDisabled(_) => "sync_disabled",
            IngestError::Serialization(_) => "serialization",
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if !is_transient_status(status) => IngestError::Upstream {
                status,
                message: err.to_string(),
            },
            _ => IngestError::TransientIo(err.to_string()),
        }
    }
}

/// 5xx and 429 are worth retrying; every other non-success status is final.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_not_retryable() {
        assert!(!IngestError::validation("missing id").is_retryable());
        assert!(!IngestError::SyncDisabled(Uuid::new_v4()).is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(IngestError::TransientIo("timeout".to_string()).is_retryable());
        assert!(IngestError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }

    #[test]
    fn test_transient_status_classification() {
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }
}
