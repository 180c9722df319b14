//! Domain entity store: the per-tenant relational tables for customers,
//! products, orders, line items, checkouts and abandoned carts.
//!
//! Every row is keyed by `(tenant_id, external id)`. Writes are
//! insert-if-absent-else-update on that composite key. Timestamps missing
//! from a payload are filled with ingestion time on insert and left as-is
//! on update, so re-applying a payload never changes stored state.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::checkout::{AbandonedCart, AbandonedCartUpsert, Checkout, CheckoutUpsert};
use crate::models::customer::{AggregateChange, Customer, CustomerUpsert};
use crate::models::order::{LineItemUpsert, Order, OrderLineItem, OrderUpsert, OrderWriteOutcome};
use crate::models::product::{Product, ProductUpsert};
use crate::models::sync::TenantTotals;
use crate::services::ingest_error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
}

impl WriteOutcome {
    pub fn from_inserted(inserted: bool) -> Self {
        if inserted {
            WriteOutcome::Inserted
        } else {
            WriteOutcome::Updated
        }
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Upsert customer identity fields. Cached aggregates are never touched;
    /// a newly inserted customer starts at zero orders and zero spend.
    async fn upsert_customer(&self, customer: &CustomerUpsert) -> Result<WriteOutcome>;

    /// Upsert a customer embedded in another record (an order's `customer`).
    /// Such stubs often carry only an id, so absent identity fields keep
    /// their stored values instead of clearing them.
    async fn merge_embedded_customer(&self, customer: &CustomerUpsert) -> Result<WriteOutcome>;

    async fn upsert_product(&self, product: &ProductUpsert) -> Result<WriteOutcome>;

    /// Upsert the order row and replace its complete line-item set in a
    /// single atomic write.
    async fn upsert_order(
        &self,
        order: &OrderUpsert,
        line_items: &[LineItemUpsert],
    ) -> Result<OrderWriteOutcome>;

    /// Upsert a checkout. `completed` is sticky: once true it stays true.
    async fn upsert_checkout(&self, checkout: &CheckoutUpsert) -> Result<WriteOutcome>;

    async fn upsert_abandoned_cart(&self, cart: &AbandonedCartUpsert) -> Result<WriteOutcome>;

    /// Mark a checkout completed. Returns `false` when the tenant has no such checkout.
    async fn mark_checkout_completed(&self, tenant_id: Uuid, checkout_id: i64) -> Result<bool>;

    /// Overwrite one customer's cached `orders_count`/`total_spent` with
    /// COUNT/SUM over their orders. `None` when the customer row does not exist.
    async fn recompute_customer_aggregates(
        &self,
        tenant_id: Uuid,
        customer_id: i64,
    ) -> Result<Option<AggregateChange>>;

    /// Recompute cached aggregates for every customer of the tenant.
    /// Returns the number of customers whose cached values had drifted.
    async fn recompute_tenant_aggregates(&self, tenant_id: Uuid) -> Result<u64>;

    async fn tenant_totals(&self, tenant_id: Uuid) -> Result<TenantTotals>;

    // Read path

    async fn find_customer(&self, tenant_id: Uuid, id: i64) -> Result<Option<Customer>>;

    async fn find_product(&self, tenant_id: Uuid, id: i64) -> Result<Option<Product>>;

    async fn find_order(&self, tenant_id: Uuid, id: i64) -> Result<Option<Order>>;

    async fn find_order_line_items(&self, tenant_id: Uuid, order_id: i64) -> Result<Vec<OrderLineItem>>;

    async fn find_checkout(&self, tenant_id: Uuid, id: i64) -> Result<Option<Checkout>>;

    async fn find_abandoned_cart(&self, tenant_id: Uuid, cart_token: &str) -> Result<Option<AbandonedCart>>;
}
