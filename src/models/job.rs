use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::tenant::StorefrontCredentials;

/// Webhook topics the ingestion pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WebhookTopic {
    CartAbandoned,
    CheckoutStarted,
    OrderCreated,
}

impl WebhookTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookTopic::CartAbandoned => "cart-abandoned",
            WebhookTopic::CheckoutStarted => "checkout-started",
            WebhookTopic::OrderCreated => "order-created",
        }
    }
}

impl fmt::Display for WebhookTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookTopic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cart-abandoned" | "carts/update" => Ok(WebhookTopic::CartAbandoned),
            "checkout-started" | "checkouts/create" | "checkouts/update" => {
                Ok(WebhookTopic::CheckoutStarted)
            }
            "order-created" | "orders/create" => Ok(WebhookTopic::OrderCreated),
            other => Err(format!("unknown webhook topic: {}", other)),
        }
    }
}

/// A unit of work on the ingestion queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "kebab-case")]
pub enum IngestionJob {
    SyncTenant {
        tenant_id: Uuid,
        credentials: StorefrontCredentials,
    },
    ProcessWebhook {
        tenant_id: Uuid,
        topic: WebhookTopic,
        payload: Value,
    },
}

impl IngestionJob {
    pub fn name(&self) -> &'static str {
        match self {
            IngestionJob::SyncTenant { .. } => "sync-tenant",
            IngestionJob::ProcessWebhook { .. } => "process-webhook",
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        match self {
            IngestionJob::SyncTenant { tenant_id, .. }
            | IngestionJob::ProcessWebhook { tenant_id, .. } => *tenant_id,
        }
    }

    /// Jobs sharing an ordering key run one at a time, in enqueue order.
    ///
    /// Syncs are keyed per tenant; webhooks per entity, so a webhook and a
    /// concurrent bulk sync of the same tenant are free to interleave.
    pub fn ordering_key(&self) -> String {
        match self {
            IngestionJob::SyncTenant { tenant_id, .. } => format!("{}:sync", tenant_id),
            IngestionJob::ProcessWebhook { tenant_id, topic, payload } => {
                let entity = match topic {
                    WebhookTopic::CartAbandoned => payload.get("token"),
                    WebhookTopic::CheckoutStarted | WebhookTopic::OrderCreated => payload.get("id"),
                };
                match entity.filter(|v| !v.is_null()) {
                    Some(Value::String(s)) => format!("{}:{}:{}", tenant_id, topic, s),
                    Some(v) => format!("{}:{}:{}", tenant_id, topic, v),
                    // Unkeyed payloads fail validation anyway; give them a key of their own.
                    None => format!("{}:{}:{}", tenant_id, topic, Uuid::new_v4()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    Exponential { base_ms: u64 },
}

impl Backoff {
    /// Delay before the next run after `attempts_made` failed attempts.
    pub fn delay_after(&self, attempts_made: i32) -> Duration {
        let ms = match *self {
            Backoff::Fixed { delay_ms } => delay_ms,
            Backoff::Exponential { base_ms } => {
                let exponent = attempts_made.saturating_sub(1).clamp(0, 20) as u32;
                base_ms.saturating_mul(1u64 << exponent)
            }
        };
        Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub max_attempts: i32,
    pub backoff: Backoff,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential { base_ms: 5_000 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    /// Terminal: retries exhausted or the failure was not retryable.
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Dead => "dead",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "dead" => Ok(JobStatus::Dead),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// A job as held by the queue, including its delivery bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub job: IngestionJob,
    pub ordering_key: String,
    pub status: JobStatus,
    /// Attempts started so far, including the one in progress.
    pub attempts: i32,
    pub options: JobOptions,
    pub last_error: Option<String>,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.options.max_attempts
    }
}

/// Operator view of a dead job, read from the job's bookkeeping columns
/// only. The payload is never decoded here: it may be the reason the job
/// died, and sync jobs carry a storefront credential.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct DeadJob {
    pub id: Uuid,
    #[serde(rename = "job")]
    pub job_name: String,
    pub tenant_id: Uuid,
    pub ordering_key: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exponential_backoff_doubles() {
        let backoff = Backoff::Exponential { base_ms: 1_000 };
        assert_eq!(backoff.delay_after(1), Duration::milliseconds(1_000));
        assert_eq!(backoff.delay_after(2), Duration::milliseconds(2_000));
        assert_eq!(backoff.delay_after(4), Duration::milliseconds(8_000));
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed { delay_ms: 250 };
        assert_eq!(backoff.delay_after(7), Duration::milliseconds(250));
    }

    #[test]
    fn test_topic_parsing_accepts_platform_topics() {
        assert_eq!("orders/create".parse::<WebhookTopic>(), Ok(WebhookTopic::OrderCreated));
        assert_eq!("cart-abandoned".parse::<WebhookTopic>(), Ok(WebhookTopic::CartAbandoned));
        assert!("products/delete".parse::<WebhookTopic>().is_err());
    }

    #[test]
    fn test_job_serialization_is_tagged() {
        let job = IngestionJob::ProcessWebhook {
            tenant_id: Uuid::nil(),
            topic: WebhookTopic::OrderCreated,
            payload: json!({"id": 900}),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["job"], "process-webhook");
        assert_eq!(value["topic"], "order-created");
        assert_eq!(serde_json::from_value::<IngestionJob>(value).unwrap(), job);
    }

    #[test]
    fn test_ordering_key_is_per_entity_for_webhooks() {
        let tenant_id = Uuid::new_v4();
        let job = |id: i64| IngestionJob::ProcessWebhook {
            tenant_id,
            topic: WebhookTopic::OrderCreated,
            payload: json!({"id": id}),
        };
        assert_eq!(job(900).ordering_key(), job(900).ordering_key());
        assert_ne!(job(900).ordering_key(), job(901).ordering_key());
    }
}
