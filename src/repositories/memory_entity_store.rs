use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::checkout::{AbandonedCart, AbandonedCartUpsert, Checkout, CheckoutUpsert};
use crate::models::customer::{AggregateChange, Customer, CustomerUpsert};
use crate::models::order::{LineItemUpsert, Order, OrderLineItem, OrderUpsert, OrderWriteOutcome};
use crate::models::product::{Product, ProductUpsert};
use crate::models::sync::TenantTotals;
use crate::repositories::entity_store::{EntityStore, WriteOutcome};
use crate::services::ingest_error::Result;

type Key = (Uuid, i64);

#[derive(Default)]
struct Tables {
    customers: HashMap<Key, Customer>,
    products: HashMap<Key, Product>,
    orders: HashMap<Key, Order>,
    line_items: HashMap<Key, Vec<OrderLineItem>>,
    checkouts: HashMap<Key, Checkout>,
    abandoned_carts: HashMap<(Uuid, String), AbandonedCart>,
}

impl Tables {
    fn fresh_aggregates(&self, tenant_id: Uuid, customer_id: i64) -> (i32, Decimal) {
        self.orders
            .values()
            .filter(|o| o.tenant_id == tenant_id && o.customer_id == Some(customer_id))
            .fold((0, Decimal::ZERO), |(count, spent), o| (count + 1, spent + o.total_price))
    }
}

/// In-process entity store with the same write semantics as the Postgres
/// store. Every operation holds one lock, so each write is atomic.
#[derive(Default)]
pub struct MemoryEntityStore {
    tables: Mutex<Tables>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a customer's cached aggregates. Test hook for simulating drift.
    pub async fn set_cached_aggregates(
        &self,
        tenant_id: Uuid,
        customer_id: i64,
        orders_count: i32,
        total_spent: Decimal,
    ) -> bool {
        let mut tables = self.tables.lock().await;
        match tables.customers.get_mut(&(tenant_id, customer_id)) {
            Some(customer) => {
                customer.orders_count = orders_count;
                customer.total_spent = total_spent;
                true
            }
            None => false,
        }
    }

    async fn write_customer(&self, upsert: &CustomerUpsert, keep_stored: bool) -> Result<WriteOutcome> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let key = (upsert.tenant_id, upsert.id);

        match tables.customers.get_mut(&key) {
            Some(existing) => {
                if keep_stored {
                    existing.email = upsert.email.clone().or(existing.email.take());
                    existing.first_name = upsert.first_name.clone().or(existing.first_name.take());
                    existing.last_name = upsert.last_name.clone().or(existing.last_name.take());
                } else {
                    existing.email = upsert.email.clone();
                    existing.first_name = upsert.first_name.clone();
                    existing.last_name = upsert.last_name.clone();
                }
                existing.created_at = upsert.created_at.unwrap_or(existing.created_at);
                existing.updated_at = upsert.updated_at.unwrap_or(existing.updated_at);
                Ok(WriteOutcome::Updated)
            }
            None => {
                tables.customers.insert(
                    key,
                    Customer {
                        id: upsert.id,
                        tenant_id: upsert.tenant_id,
                        email: upsert.email.clone(),
                        first_name: upsert.first_name.clone(),
                        last_name: upsert.last_name.clone(),
                        orders_count: 0,
                        total_spent: Decimal::ZERO,
                        created_at: upsert.created_at.unwrap_or(now),
                        updated_at: upsert.updated_at.unwrap_or(now),
                    },
                );
                Ok(WriteOutcome::Inserted)
            }
        }
    }

    pub async fn order_count(&self, tenant_id: Uuid) -> usize {
        let tables = self.tables.lock().await;
        tables.orders.keys().filter(|(t, _)| *t == tenant_id).count()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn upsert_customer(&self, upsert: &CustomerUpsert) -> Result<WriteOutcome> {
        self.write_customer(upsert, false).await
    }

    async fn merge_embedded_customer(&self, upsert: &CustomerUpsert) -> Result<WriteOutcome> {
        self.write_customer(upsert, true).await
    }

    async fn upsert_product(&self, upsert: &ProductUpsert) -> Result<WriteOutcome> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let key = (upsert.tenant_id, upsert.id);
        let previous = tables.products.get(&key).cloned();

        tables.products.insert(
            key,
            Product {
                id: upsert.id,
                tenant_id: upsert.tenant_id,
                title: upsert.title.clone(),
                vendor: upsert.vendor.clone(),
                product_type: upsert.product_type.clone(),
                price: upsert.price,
                inventory: upsert.inventory,
                created_at: upsert
                    .created_at
                    .or(previous.as_ref().map(|p| p.created_at))
                    .unwrap_or(now),
                updated_at: upsert
                    .updated_at
                    .or(previous.as_ref().map(|p| p.updated_at))
                    .unwrap_or(now),
            },
        );

        Ok(WriteOutcome::from_inserted(previous.is_none()))
    }

    async fn upsert_order(
        &self,
        upsert: &OrderUpsert,
        line_items: &[LineItemUpsert],
    ) -> Result<OrderWriteOutcome> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let key = (upsert.tenant_id, upsert.id);
        let previous = tables.orders.get(&key).cloned();

        tables.orders.insert(
            key,
            Order {
                id: upsert.id,
                tenant_id: upsert.tenant_id,
                customer_id: upsert.customer_id,
                checkout_id: upsert.checkout_id,
                order_number: upsert.order_number,
                total_price: upsert.total_price,
                subtotal_price: upsert.subtotal_price,
                total_tax: upsert.total_tax,
                financial_status: upsert.financial_status.clone(),
                fulfillment_status: upsert.fulfillment_status.clone(),
                created_at: upsert
                    .created_at
                    .or(previous.as_ref().map(|o| o.created_at))
                    .unwrap_or(now),
                updated_at: upsert
                    .updated_at
                    .or(previous.as_ref().map(|o| o.updated_at))
                    .unwrap_or(now),
            },
        );

        let items = line_items
            .iter()
            .map(|item| OrderLineItem {
                id: Uuid::new_v4(),
                order_id: upsert.id,
                tenant_id: upsert.tenant_id,
                product_id: item.product_id,
                title: item.title.clone(),
                quantity: item.quantity,
                price: item.price,
            })
            .collect();
        tables.line_items.insert(key, items);

        Ok(OrderWriteOutcome {
            inserted: previous.is_none(),
            previous_customer_id: previous.and_then(|o| o.customer_id),
        })
    }

    async fn upsert_checkout(&self, upsert: &CheckoutUpsert) -> Result<WriteOutcome> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let key = (upsert.tenant_id, upsert.id);
        let previous = tables.checkouts.get(&key).cloned();

        tables.checkouts.insert(
            key,
            Checkout {
                id: upsert.id,
                tenant_id: upsert.tenant_id,
                customer_id: upsert.customer_id,
                customer_email: upsert.customer_email.clone(),
                total_price: upsert.total_price,
                completed: upsert.completed || previous.as_ref().map_or(false, |c| c.completed),
                created_at: upsert
                    .created_at
                    .or(previous.as_ref().map(|c| c.created_at))
                    .unwrap_or(now),
                updated_at: upsert
                    .updated_at
                    .or(previous.as_ref().map(|c| c.updated_at))
                    .unwrap_or(now),
            },
        );

        Ok(WriteOutcome::from_inserted(previous.is_none()))
    }

    async fn upsert_abandoned_cart(&self, upsert: &AbandonedCartUpsert) -> Result<WriteOutcome> {
        let mut tables = self.tables.lock().await;
        let key = (upsert.tenant_id, upsert.cart_token.clone());
        let previous_abandoned_at = tables.abandoned_carts.get(&key).map(|c| c.abandoned_at);

        tables.abandoned_carts.insert(
            key,
            AbandonedCart {
                cart_token: upsert.cart_token.clone(),
                tenant_id: upsert.tenant_id,
                customer_id: upsert.customer_id,
                customer_email: upsert.customer_email.clone(),
                total_price: upsert.total_price,
                line_items: upsert.line_items.clone(),
                abandoned_at: upsert
                    .abandoned_at
                    .or(previous_abandoned_at)
                    .unwrap_or_else(Utc::now),
            },
        );

        Ok(WriteOutcome::from_inserted(previous_abandoned_at.is_none()))
    }

    async fn mark_checkout_completed(&self, tenant_id: Uuid, checkout_id: i64) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.checkouts.get_mut(&(tenant_id, checkout_id)) {
            Some(checkout) => {
                checkout.completed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn recompute_customer_aggregates(
        &self,
        tenant_id: Uuid,
        customer_id: i64,
    ) -> Result<Option<AggregateChange>> {
        let mut tables = self.tables.lock().await;
        let (orders_count, total_spent) = tables.fresh_aggregates(tenant_id, customer_id);

        let Some(customer) = tables.customers.get_mut(&(tenant_id, customer_id)) else {
            return Ok(None);
        };

        let change = AggregateChange {
            customer_id,
            previous_orders_count: customer.orders_count,
            previous_total_spent: customer.total_spent,
            orders_count,
            total_spent,
        };
        customer.orders_count = orders_count;
        customer.total_spent = total_spent;

        Ok(Some(change))
    }

    async fn recompute_tenant_aggregates(&self, tenant_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let ids: Vec<i64> = tables
            .customers
            .keys()
            .filter(|(t, _)| *t == tenant_id)
            .map(|(_, id)| *id)
            .collect();

        let mut drifted = 0;
        for id in ids {
            let (orders_count, total_spent) = tables.fresh_aggregates(tenant_id, id);
            if let Some(customer) = tables.customers.get_mut(&(tenant_id, id)) {
                if customer.orders_count != orders_count || customer.total_spent != total_spent {
                    customer.orders_count = orders_count;
                    customer.total_spent = total_spent;
                    drifted += 1;
                }
            }
        }

        Ok(drifted)
    }

    async fn tenant_totals(&self, tenant_id: Uuid) -> Result<TenantTotals> {
        let tables = self.tables.lock().await;
        let (total_orders, total_revenue) = tables
            .orders
            .values()
            .filter(|o| o.tenant_id == tenant_id)
            .fold((0i64, Decimal::ZERO), |(count, sum), o| (count + 1, sum + o.total_price));
        let total_customers = tables.customers.keys().filter(|(t, _)| *t == tenant_id).count() as i64;

        Ok(TenantTotals {
            total_revenue,
            total_orders,
            total_customers,
        })
    }

    async fn find_customer(&self, tenant_id: Uuid, id: i64) -> Result<Option<Customer>> {
        Ok(self.tables.lock().await.customers.get(&(tenant_id, id)).cloned())
    }

    async fn find_product(&self, tenant_id: Uuid, id: i64) -> Result<Option<Product>> {
        Ok(self.tables.lock().await.products.get(&(tenant_id, id)).cloned())
    }

    async fn find_order(&self, tenant_id: Uuid, id: i64) -> Result<Option<Order>> {
        Ok(self.tables.lock().await.orders.get(&(tenant_id, id)).cloned())
    }

    async fn find_order_line_items(&self, tenant_id: Uuid, order_id: i64) -> Result<Vec<OrderLineItem>> {
        Ok(self
            .tables
            .lock()
            .await
            .line_items
            .get(&(tenant_id, order_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn find_checkout(&self, tenant_id: Uuid, id: i64) -> Result<Option<Checkout>> {
        Ok(self.tables.lock().await.checkouts.get(&(tenant_id, id)).cloned())
    }

    async fn find_abandoned_cart(&self, tenant_id: Uuid, cart_token: &str) -> Result<Option<AbandonedCart>> {
        Ok(self
            .tables
            .lock()
            .await
            .abandoned_carts
            .get(&(tenant_id, cart_token.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn customer(tenant_id: Uuid, id: i64) -> CustomerUpsert {
        CustomerUpsert {
            id,
            tenant_id,
            email: Some("a@b.com".to_string()),
            first_name: None,
            last_name: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn order(tenant_id: Uuid, id: i64, customer_id: Option<i64>, total: Decimal) -> OrderUpsert {
        OrderUpsert {
            id,
            tenant_id,
            customer_id,
            checkout_id: None,
            order_number: None,
            total_price: total,
            subtotal_price: total,
            total_tax: Decimal::ZERO,
            financial_status: None,
            fulfillment_status: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_missing_timestamps_keep_stored_values_on_update() {
        let store = MemoryEntityStore::new();
        let tenant_id = Uuid::new_v4();

        store.upsert_customer(&customer(tenant_id, 1)).await.unwrap();
        let first = store.find_customer(tenant_id, 1).await.unwrap().unwrap();

        let outcome = store.upsert_customer(&customer(tenant_id, 1)).await.unwrap();
        let second = store.find_customer(tenant_id, 1).await.unwrap().unwrap();

        assert_eq!(outcome, WriteOutcome::Updated);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_customer_upsert_never_touches_aggregates() {
        let store = MemoryEntityStore::new();
        let tenant_id = Uuid::new_v4();

        store.upsert_customer(&customer(tenant_id, 1)).await.unwrap();
        store.set_cached_aggregates(tenant_id, 1, 4, dec!(10.00)).await;
        store.upsert_customer(&customer(tenant_id, 1)).await.unwrap();

        let stored = store.find_customer(tenant_id, 1).await.unwrap().unwrap();
        assert_eq!(stored.orders_count, 4);
        assert_eq!(stored.total_spent, dec!(10.00));
    }

    #[tokio::test]
    async fn test_embedded_customer_keeps_stored_identity() {
        let store = MemoryEntityStore::new();
        let tenant_id = Uuid::new_v4();

        store.upsert_customer(&customer(tenant_id, 1)).await.unwrap();
        let stub = CustomerUpsert {
            email: None,
            first_name: Some("Ada".to_string()),
            ..customer(tenant_id, 1)
        };
        let outcome = store.merge_embedded_customer(&stub).await.unwrap();

        let stored = store.find_customer(tenant_id, 1).await.unwrap().unwrap();
        assert_eq!(outcome, WriteOutcome::Updated);
        assert_eq!(stored.email.as_deref(), Some("a@b.com"));
        assert_eq!(stored.first_name.as_deref(), Some("Ada"));

        // A full customer record still replaces identity fields.
        store.upsert_customer(&stub).await.unwrap();
        let stored = store.find_customer(tenant_id, 1).await.unwrap().unwrap();
        assert_eq!(stored.email, None);
    }

    #[tokio::test]
    async fn test_order_write_reports_previous_customer() {
        let store = MemoryEntityStore::new();
        let tenant_id = Uuid::new_v4();

        let first = store.upsert_order(&order(tenant_id, 9, Some(1), dec!(5)), &[]).await.unwrap();
        assert!(first.inserted);
        assert_eq!(first.previous_customer_id, None);

        let second = store.upsert_order(&order(tenant_id, 9, Some(2), dec!(5)), &[]).await.unwrap();
        assert!(!second.inserted);
        assert_eq!(second.previous_customer_id, Some(1));
    }

    #[tokio::test]
    async fn test_tenant_recompute_counts_only_drifted_customers() {
        let store = MemoryEntityStore::new();
        let tenant_id = Uuid::new_v4();

        store.upsert_customer(&customer(tenant_id, 1)).await.unwrap();
        store.upsert_customer(&customer(tenant_id, 2)).await.unwrap();
        store.upsert_order(&order(tenant_id, 10, Some(1), dec!(20.00)), &[]).await.unwrap();

        assert_eq!(store.recompute_tenant_aggregates(tenant_id).await.unwrap(), 1);
        assert_eq!(store.recompute_tenant_aggregates(tenant_id).await.unwrap(), 0);
    }
}
