use std::sync::Arc;
use uuid::Uuid;

use crate::middleware::metrics::record_drift_repaired;
use crate::models::customer::AggregateChange;
use crate::models::sync::TenantSummary;
use crate::repositories::entity_store::EntityStore;
use crate::services::ingest_error::Result;

/// Keeps customer `orders_count`/`total_spent` equal to COUNT/SUM over
/// their order rows. Values are always recomputed from scratch, so running
/// it again after a partial or concurrent write repairs any drift.
#[derive(Clone)]
pub struct AggregateService {
    store: Arc<dyn EntityStore>,
}

impl AggregateService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Recompute one customer. `None` when the customer is not stored.
    pub async fn recalculate_customer(
        &self,
        tenant_id: Uuid,
        customer_id: i64,
    ) -> Result<Option<AggregateChange>> {
        let change = self
            .store
            .recompute_customer_aggregates(tenant_id, customer_id)
            .await?;

        if let Some(change) = &change {
            if change.drift_repaired() {
                tracing::info!(
                    event = "AggregateDriftRepaired",
                    %tenant_id,
                    customer_id,
                    previous_orders_count = change.previous_orders_count,
                    previous_total_spent = %change.previous_total_spent,
                    orders_count = change.orders_count,
                    total_spent = %change.total_spent,
                    "Customer aggregates updated"
                );
                record_drift_repaired(1);
            }
        }

        Ok(change)
    }

    /// Recompute every customer of the tenant and report tenant-wide figures.
    pub async fn recalculate_tenant(&self, tenant_id: Uuid) -> Result<TenantSummary> {
        let drifted = self.store.recompute_tenant_aggregates(tenant_id).await?;
        if drifted > 0 {
            tracing::info!(
                event = "AggregateDriftRepaired",
                %tenant_id,
                customers = drifted,
                "Repaired drifted customer aggregates"
            );
            record_drift_repaired(drifted);
        }

        let totals = self.store.tenant_totals(tenant_id).await?;
        let summary = TenantSummary::from_totals(totals, drifted);

        tracing::debug!(
            "Tenant {} totals: {} orders, {} customers, revenue {}, AOV {}",
            tenant_id,
            summary.total_orders,
            summary.total_customers,
            summary.total_revenue,
            summary.average_order_value
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory_entity_store::MemoryEntityStore;
    use crate::services::reconciler::{EntityKind, UpsertReconciler};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    async fn seed_order(store: &MemoryEntityStore, tenant_id: Uuid, id: i64, customer: i64, total: &str) {
        let op = UpsertReconciler::reconcile(
            tenant_id,
            EntityKind::Order,
            &json!({"id": id, "total_price": total, "customer": {"id": customer}}),
        )
        .unwrap();
        UpsertReconciler::apply(store, op).await.unwrap();
    }

    #[tokio::test]
    async fn test_recalculate_customer_matches_order_rows() {
        let store = Arc::new(MemoryEntityStore::new());
        let service = AggregateService::new(store.clone());
        let tenant_id = Uuid::new_v4();

        seed_order(&store, tenant_id, 1, 555, "10.00").await;
        seed_order(&store, tenant_id, 2, 555, "15.50").await;

        let change = service.recalculate_customer(tenant_id, 555).await.unwrap().unwrap();
        assert_eq!(change.orders_count, 2);
        assert_eq!(change.total_spent, dec!(25.50));
        assert!(change.drift_repaired());

        let again = service.recalculate_customer(tenant_id, 555).await.unwrap().unwrap();
        assert!(!again.drift_repaired());
    }

    #[tokio::test]
    async fn test_recalculate_tenant_repairs_drift_and_reports_aov() {
        let store = Arc::new(MemoryEntityStore::new());
        let service = AggregateService::new(store.clone());
        let tenant_id = Uuid::new_v4();

        seed_order(&store, tenant_id, 1, 1, "10.00").await;
        seed_order(&store, tenant_id, 2, 2, "20.00").await;
        service.recalculate_tenant(tenant_id).await.unwrap();

        store.set_cached_aggregates(tenant_id, 1, 99, dec!(1.00)).await;

        let summary = service.recalculate_tenant(tenant_id).await.unwrap();
        assert_eq!(summary.drift_repaired, 1);
        assert_eq!(summary.total_orders, 2);
        assert_eq!(summary.total_customers, 2);
        assert_eq!(summary.total_revenue, dec!(30.00));
        assert_eq!(summary.average_order_value, dec!(15.00));

        let customer = store.find_customer(tenant_id, 1).await.unwrap().unwrap();
        assert_eq!(customer.orders_count, 1);
        assert_eq!(customer.total_spent, dec!(10.00));
    }

    #[tokio::test]
    async fn test_empty_tenant_has_zero_aov() {
        let service = AggregateService::new(Arc::new(MemoryEntityStore::new()));
        let summary = service.recalculate_tenant(Uuid::new_v4()).await.unwrap();
        assert_eq!(summary.average_order_value, Decimal::ZERO);
        assert_eq!(summary.total_orders, 0);
    }
}
