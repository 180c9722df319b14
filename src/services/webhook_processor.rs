use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::customer::AggregateChange;
use crate::models::job::WebhookTopic;
use crate::repositories::entity_store::{EntityStore, WriteOutcome};
use crate::services::aggregate_service::AggregateService;
use crate::services::ingest_error::Result;
use crate::services::reconciler::{EntityKind, UpsertReconciler};

#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    pub topic: WebhookTopic,
    pub inserted: bool,
    pub checkout_completed: Option<bool>,
    pub aggregates: Vec<AggregateChange>,
}

/// Applies a single verified webhook payload. Errors are returned to the
/// queue, which decides between retry and dead-lettering.
pub struct WebhookProcessor {
    store: Arc<dyn EntityStore>,
    aggregates: AggregateService,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            aggregates: AggregateService::new(store.clone()),
            store,
        }
    }

    pub async fn process(
        &self,
        tenant_id: Uuid,
        topic: WebhookTopic,
        payload: &Value,
    ) -> Result<WebhookOutcome> {
        let kind = match topic {
            WebhookTopic::CartAbandoned => EntityKind::AbandonedCart,
            WebhookTopic::CheckoutStarted => EntityKind::Checkout,
            WebhookTopic::OrderCreated => EntityKind::Order,
        };

        let op = UpsertReconciler::reconcile(tenant_id, kind, payload)?;
        let applied = UpsertReconciler::apply(self.store.as_ref(), op).await?;

        // Only the customers touched by this order are recomputed, never the whole tenant.
        let mut aggregates = Vec::with_capacity(applied.affected_customers.len());
        for customer_id in &applied.affected_customers {
            if let Some(change) = self
                .aggregates
                .recalculate_customer(tenant_id, *customer_id)
                .await?
            {
                aggregates.push(change);
            }
        }

        tracing::info!(
            "Processed {} webhook for tenant {} ({:?})",
            topic,
            tenant_id,
            applied.write
        );

        Ok(WebhookOutcome {
            topic,
            inserted: applied.write == WriteOutcome::Inserted,
            checkout_completed: applied.checkout_completed,
            aggregates,
        })
    }
}
