// Bulk sync engine.
// Pulls one page of each entity kind from the storefront and reconciles it
// into the entity store, then recomputes tenant-wide aggregates.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::middleware::metrics::{record_sync_phase, record_sync_phase_failure};
use crate::models::sync::{PhaseFailure, SyncPhase, SyncSummary};
use crate::models::tenant::StorefrontCredentials;
use crate::repositories::entity_store::EntityStore;
use crate::repositories::tenant_repo::TenantStore;
use crate::services::aggregate_service::AggregateService;
use crate::services::ingest_error::{IngestError, Result};
use crate::services::reconciler::{EntityKind, UpsertReconciler};
use crate::services::storefront_client::StorefrontApi;
use crate::utils::log_sanitizer::sanitize_for_log;

#[derive(Debug, Default, Clone, Copy)]
struct PhaseTally {
    persisted: i32,
    skipped: i32,
}

pub struct BulkSyncService {
    store: Arc<dyn EntityStore>,
    tenants: Arc<dyn TenantStore>,
    storefront: Arc<dyn StorefrontApi>,
    aggregates: AggregateService,
}

impl BulkSyncService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        tenants: Arc<dyn TenantStore>,
        storefront: Arc<dyn StorefrontApi>,
    ) -> Self {
        Self {
            aggregates: AggregateService::new(store.clone()),
            store,
            tenants,
            storefront,
        }
    }

    /// Manual "sync now": resolve the tenant and its credential, then run a full sync.
    pub async fn sync_tenant(&self, tenant_id: Uuid) -> Result<SyncSummary> {
        let tenant = self
            .tenants
            .find_by_id(tenant_id)
            .await?
            .ok_or(IngestError::TenantNotFound(tenant_id))?;

        let credentials = tenant
            .credentials()
            .ok_or(IngestError::SyncDisabled(tenant_id))?;

        self.sync_all_data(tenant_id, &credentials).await
    }

    /// Pull customers, products, orders and abandoned checkouts in that order.
    ///
    /// Phases are isolated from each other: a failed phase reports zero and
    /// is listed in `failed_phases`, the rest still run. Only a failure of
    /// the closing aggregate pass fails the whole sync.
    pub async fn sync_all_data(
        &self,
        tenant_id: Uuid,
        credentials: &StorefrontCredentials,
    ) -> Result<SyncSummary> {
        let start = Instant::now();
        let shop = sanitize_for_log(&credentials.shop_domain);
        tracing::info!("Starting bulk sync for tenant {} ({})", tenant_id, shop);

        let mut summary = SyncSummary::default();

        for phase in SyncPhase::ALL {
            match self.run_phase(phase, tenant_id, credentials).await {
                Ok(tally) => {
                    summary.set_count(phase, tally.persisted);
                    summary.records_skipped += tally.skipped;
                    record_sync_phase(phase.as_str(), tally.persisted);
                    tracing::info!(
                        "Synced {} {} for tenant {} ({} skipped)",
                        tally.persisted,
                        phase,
                        tenant_id,
                        tally.skipped
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "Sync phase {} failed for tenant {}: {}",
                        phase,
                        tenant_id,
                        sanitize_for_log(&e.to_string())
                    );
                    record_sync_phase_failure(phase.as_str(), e.kind());
                    summary.set_count(phase, 0);
                    summary.failed_phases.push(PhaseFailure {
                        phase,
                        error_type: e.kind().to_string(),
                        reason: sanitize_for_log(&e.to_string()),
                    });
                }
            }
        }

        summary.stats = self.aggregates.recalculate_tenant(tenant_id).await?;

        if summary.is_partial() {
            tracing::warn!(
                "Bulk sync for tenant {} finished with {} failed phase(s) in {:?}",
                tenant_id,
                summary.failed_phases.len(),
                start.elapsed()
            );
        } else {
            tracing::info!(
                "Bulk sync for tenant {} completed in {:?}: {} customers, {} products, {} orders, {} checkouts",
                tenant_id,
                start.elapsed(),
                summary.customers,
                summary.products,
                summary.orders,
                summary.abandoned_carts
            );
        }

        Ok(summary)
    }

    async fn run_phase(
        &self,
        phase: SyncPhase,
        tenant_id: Uuid,
        credentials: &StorefrontCredentials,
    ) -> Result<PhaseTally> {
        match phase {
            SyncPhase::Customers => {
                let records = self.storefront.fetch_customers(credentials).await?;
                self.reconcile_page(tenant_id, EntityKind::Customer, &records).await
            }
            SyncPhase::Products => {
                let records = self.storefront.fetch_products(credentials).await?;
                self.reconcile_page(tenant_id, EntityKind::Product, &records).await
            }
            SyncPhase::Orders => {
                let records = self.storefront.fetch_orders(credentials).await?;
                self.reconcile_page(tenant_id, EntityKind::Order, &records).await
            }
            SyncPhase::AbandonedCheckouts => {
                let records = self.storefront.fetch_abandoned_checkouts(credentials).await?;
                let tally = self.reconcile_page(tenant_id, EntityKind::Checkout, &records).await?;
                self.track_abandoned_carts(tenant_id, &records).await?;
                Ok(tally)
            }
        }
    }

    /// Reconcile every record of one page. Invalid records are skipped;
    /// a store error aborts the page.
    async fn reconcile_page(
        &self,
        tenant_id: Uuid,
        kind: EntityKind,
        records: &[Value],
    ) -> Result<PhaseTally> {
        let mut tally = PhaseTally::default();

        for record in records {
            let op = match UpsertReconciler::reconcile(tenant_id, kind, record) {
                Ok(op) => op,
                Err(IngestError::Validation(reason)) => {
                    tracing::warn!(
                        "Skipping invalid {} for tenant {}: {}",
                        kind,
                        tenant_id,
                        sanitize_for_log(&reason)
                    );
                    tally.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            UpsertReconciler::apply(self.store.as_ref(), op).await?;
            tally.persisted += 1;
        }

        Ok(tally)
    }

    async fn track_abandoned_carts(&self, tenant_id: Uuid, records: &[Value]) -> Result<()> {
        for record in records {
            // Invalid checkouts were already counted as skipped.
            if let Ok(Some(op)) = UpsertReconciler::reconcile_checkout_cart(tenant_id, record) {
                UpsertReconciler::apply(self.store.as_ref(), op).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tenant::NewTenant;
    use crate::repositories::memory_entity_store::MemoryEntityStore;
    use crate::repositories::tenant_repo::MemoryTenantStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use serde_json::json;

    /// Canned storefront; `None` for a resource simulates a failing fetch.
    struct FakeStorefront {
        customers: Option<Vec<Value>>,
        products: Option<Vec<Value>>,
        orders: Option<Vec<Value>>,
        checkouts: Option<Vec<Value>>,
    }

    fn page(records: &Option<Vec<Value>>) -> Result<Vec<Value>> {
        records
            .clone()
            .ok_or_else(|| IngestError::TransientIo("connection reset".to_string()))
    }

    #[async_trait]
    impl StorefrontApi for FakeStorefront {
        async fn fetch_customers(&self, _: &StorefrontCredentials) -> Result<Vec<Value>> {
            page(&self.customers)
        }
        async fn fetch_products(&self, _: &StorefrontCredentials) -> Result<Vec<Value>> {
            page(&self.products)
        }
        async fn fetch_orders(&self, _: &StorefrontCredentials) -> Result<Vec<Value>> {
            page(&self.orders)
        }
        async fn fetch_abandoned_checkouts(&self, _: &StorefrontCredentials) -> Result<Vec<Value>> {
            page(&self.checkouts)
        }
    }

    fn credentials() -> StorefrontCredentials {
        StorefrontCredentials {
            shop_domain: "acme.myshopify.com".to_string(),
            access_token: "shpat_test".to_string(),
        }
    }

    fn healthy() -> FakeStorefront {
        FakeStorefront {
            customers: Some(vec![json!({"id": 555, "email": "a@b.com"}), json!({"email": "no-id@b.com"})]),
            products: Some(vec![json!({"id": 7, "variants": [{"price": "9.99", "inventory_quantity": 4}]})]),
            orders: Some(vec![json!({
                "id": 900,
                "total_price": "49.99",
                "customer": {"id": 555},
                "line_items": [{"product_id": 7, "quantity": 5, "price": "9.99"}]
            })]),
            checkouts: Some(vec![json!({"id": 31, "cart_token": "cart-1", "total_price": "12.00"})]),
        }
    }

    fn service(storefront: FakeStorefront) -> (BulkSyncService, Arc<MemoryEntityStore>, Arc<MemoryTenantStore>) {
        let store = Arc::new(MemoryEntityStore::new());
        let tenants = Arc::new(MemoryTenantStore::new());
        let service = BulkSyncService::new(store.clone(), tenants.clone(), Arc::new(storefront));
        (service, store, tenants)
    }

    #[tokio::test]
    async fn test_full_sync_counts_and_aggregates() {
        let (service, store, _) = service(healthy());
        let tenant_id = Uuid::new_v4();

        let summary = service.sync_all_data(tenant_id, &credentials()).await.unwrap();

        assert_eq!(summary.customers, 1);
        assert_eq!(summary.products, 1);
        assert_eq!(summary.orders, 1);
        assert_eq!(summary.abandoned_carts, 1);
        assert_eq!(summary.records_skipped, 1);
        assert!(!summary.is_partial());
        assert_eq!(summary.stats.total_revenue, dec!(49.99));
        assert_eq!(summary.stats.average_order_value, dec!(49.99));

        let customer = store.find_customer(tenant_id, 555).await.unwrap().unwrap();
        assert_eq!(customer.orders_count, 1);
        assert_eq!(customer.total_spent, dec!(49.99));
        assert!(store.find_abandoned_cart(tenant_id, "cart-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_order_customer_stub_keeps_synced_email() {
        let (service, store, _) = service(healthy());
        let tenant_id = Uuid::new_v4();

        service.sync_all_data(tenant_id, &credentials()).await.unwrap();

        let customer = store.find_customer(tenant_id, 555).await.unwrap().unwrap();
        assert_eq!(customer.email.as_deref(), Some("a@b.com"));
        assert_eq!(customer.orders_count, 1);
    }

    #[tokio::test]
    async fn test_out_of_range_amount_skips_only_that_record() {
        let (service, store, _) = service(FakeStorefront {
            orders: Some(vec![
                json!({"id": 900, "total_price": "99999999999999999", "customer": {"id": 555}}),
                json!({"id": 901, "total_price": "5.00", "customer": {"id": 555}}),
            ]),
            ..healthy()
        });
        let tenant_id = Uuid::new_v4();

        let summary = service.sync_all_data(tenant_id, &credentials()).await.unwrap();

        assert!(!summary.is_partial());
        assert_eq!(summary.orders, 1);
        assert!(store.find_order(tenant_id, 900).await.unwrap().is_none());
        assert!(store.find_order(tenant_id, 901).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_phase_does_not_abort_siblings() {
        let (service, store, _) = service(FakeStorefront {
            products: None,
            ..healthy()
        });
        let tenant_id = Uuid::new_v4();

        let summary = service.sync_all_data(tenant_id, &credentials()).await.unwrap();

        assert_eq!(summary.products, 0);
        assert!(summary.customers > 0);
        assert_eq!(summary.orders, 1);
        assert_eq!(summary.failed_phases.len(), 1);
        assert_eq!(summary.failed_phases[0].phase, SyncPhase::Products);
        assert_eq!(summary.failed_phases[0].error_type, "transient_io");
        assert!(store.find_customer(tenant_id, 555).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sync_tenant_without_token_is_structured_failure() {
        let (service, _, tenants) = service(healthy());
        let tenant = tenants
            .create(&NewTenant {
                shop_domain: "acme.myshopify.com".to_string(),
                email: "owner@acme.test".to_string(),
                access_token: None,
            })
            .await
            .unwrap();

        let err = service.sync_tenant(tenant.id).await.unwrap_err();
        assert!(matches!(err, IngestError::SyncDisabled(id) if id == tenant.id));

        let err = service.sync_tenant(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, IngestError::TenantNotFound(_)));
    }

    #[tokio::test]
    async fn test_repeated_sync_is_idempotent() {
        let (service, store, _) = service(healthy());
        let tenant_id = Uuid::new_v4();

        service.sync_all_data(tenant_id, &credentials()).await.unwrap();
        let first = store.find_order(tenant_id, 900).await.unwrap();
        let second_summary = service.sync_all_data(tenant_id, &credentials()).await.unwrap();

        assert_eq!(store.find_order(tenant_id, 900).await.unwrap(), first);
        assert_eq!(store.find_order_line_items(tenant_id, 900).await.unwrap().len(), 1);
        assert_eq!(second_summary.stats.drift_repaired, 0);
    }
}
