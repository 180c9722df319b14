//! Upsert reconciler: turns one raw storefront record into a strict upsert
//! operation and applies it to the entity store.
//!
//! `reconcile` is pure and does all validation; `apply` performs exactly one
//! merge per operation. Both the bulk sync and the webhook processor go
//! through here, so the two ingestion paths cannot disagree on how a
//! payload maps onto stored rows.

use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::models::checkout::{AbandonedCartUpsert, CheckoutUpsert};
use crate::models::customer::CustomerUpsert;
use crate::models::order::{LineItemUpsert, OrderBundle, OrderUpsert};
use crate::models::product::ProductUpsert;
use crate::models::shopify::{
    non_blank, parse_external_id, parse_money, parse_payload, require_external_id, ShopifyCart,
    ShopifyCheckout, ShopifyCustomer, ShopifyLineItem, ShopifyOrder, ShopifyProduct,
};
use crate::repositories::entity_store::{EntityStore, WriteOutcome};
use crate::services::ingest_error::{IngestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Customer,
    Product,
    Order,
    Checkout,
    AbandonedCart,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customer",
            EntityKind::Product => "product",
            EntityKind::Order => "order",
            EntityKind::Checkout => "checkout",
            EntityKind::AbandonedCart => "abandoned_cart",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated write against the entity store.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOp {
    Customer(CustomerUpsert),
    Product(ProductUpsert),
    Order(OrderBundle),
    Checkout(CheckoutUpsert),
    AbandonedCart(AbandonedCartUpsert),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub kind: EntityKind,
    pub write: WriteOutcome,
    /// Customers whose cached aggregates may now be stale. Only order writes
    /// populate this: the order's customer, plus its previous customer when
    /// the order was reassigned.
    pub affected_customers: Vec<i64>,
    /// For orders referencing a checkout: whether that checkout was found and marked completed.
    pub checkout_completed: Option<bool>,
}

impl ApplyOutcome {
    fn simple(kind: EntityKind, write: WriteOutcome) -> Self {
        Self {
            kind,
            write,
            affected_customers: Vec::new(),
            checkout_completed: None,
        }
    }
}

pub struct UpsertReconciler;

impl UpsertReconciler {
    /// Validate a raw record of `kind` into an upsert operation for `tenant_id`.
    pub fn reconcile(tenant_id: Uuid, kind: EntityKind, payload: &Value) -> Result<UpsertOp> {
        match kind {
            EntityKind::Customer => {
                let customer: ShopifyCustomer = parse_payload("customer", payload)?;
                Ok(UpsertOp::Customer(customer_upsert(tenant_id, &customer)?))
            }
            EntityKind::Product => {
                let product: ShopifyProduct = parse_payload("product", payload)?;
                Ok(UpsertOp::Product(product_upsert(tenant_id, product)?))
            }
            EntityKind::Order => {
                let order: ShopifyOrder = parse_payload("order", payload)?;
                Ok(UpsertOp::Order(order_bundle(tenant_id, order)?))
            }
            EntityKind::Checkout => {
                let checkout: ShopifyCheckout = parse_payload("checkout", payload)?;
                Ok(UpsertOp::Checkout(checkout_upsert(tenant_id, &checkout)?))
            }
            EntityKind::AbandonedCart => {
                let cart: ShopifyCart = parse_payload("cart", payload)?;
                Ok(UpsertOp::AbandonedCart(cart_upsert(tenant_id, cart)?))
            }
        }
    }

    /// An uncompleted checkout with a cart token is also tracked as an
    /// abandoned cart. Returns `None` for completed or cartless checkouts.
    pub fn reconcile_checkout_cart(tenant_id: Uuid, payload: &Value) -> Result<Option<UpsertOp>> {
        let checkout: ShopifyCheckout = parse_payload("checkout", payload)?;
        if checkout.completed_at.is_some() {
            return Ok(None);
        }
        let Some(cart_token) = non_blank(checkout.cart_token.clone()) else {
            return Ok(None);
        };

        Ok(Some(UpsertOp::AbandonedCart(AbandonedCartUpsert {
            cart_token,
            tenant_id,
            customer_id: embedded_customer_id(checkout.customer.as_ref())?,
            customer_email: contact_email(checkout.email.clone(), checkout.customer.as_ref()),
            total_price: parse_money("total_price", checkout.total_price.as_ref())?,
            line_items: checkout.line_items.clone().unwrap_or_else(|| Value::Array(Vec::new())),
            abandoned_at: checkout.updated_at,
        })))
    }

    /// Execute one operation against the store.
    pub async fn apply(store: &dyn EntityStore, op: UpsertOp) -> Result<ApplyOutcome> {
        match op {
            UpsertOp::Customer(customer) => {
                let write = store.upsert_customer(&customer).await?;
                Ok(ApplyOutcome::simple(EntityKind::Customer, write))
            }
            UpsertOp::Product(product) => {
                let write = store.upsert_product(&product).await?;
                Ok(ApplyOutcome::simple(EntityKind::Product, write))
            }
            UpsertOp::Checkout(checkout) => {
                let write = store.upsert_checkout(&checkout).await?;
                Ok(ApplyOutcome::simple(EntityKind::Checkout, write))
            }
            UpsertOp::AbandonedCart(cart) => {
                let write = store.upsert_abandoned_cart(&cart).await?;
                Ok(ApplyOutcome::simple(EntityKind::AbandonedCart, write))
            }
            UpsertOp::Order(bundle) => Self::apply_order(store, bundle).await,
        }
    }

    async fn apply_order(store: &dyn EntityStore, bundle: OrderBundle) -> Result<ApplyOutcome> {
        let OrderBundle {
            customer,
            order,
            line_items,
        } = bundle;

        if let Some(customer) = &customer {
            store.merge_embedded_customer(customer).await?;
        }

        let written = store.upsert_order(&order, &line_items).await?;

        let checkout_completed = match order.checkout_id {
            Some(checkout_id) => Some(link_checkout(store, order.tenant_id, checkout_id).await),
            None => None,
        };

        let mut affected_customers: Vec<i64> = order.customer_id.into_iter().collect();
        if let Some(previous) = written.previous_customer_id {
            if Some(previous) != order.customer_id {
                affected_customers.push(previous);
            }
        }

        tracing::debug!(
            "Applied order {} for tenant {} ({} line items)",
            order.id,
            order.tenant_id,
            line_items.len()
        );

        Ok(ApplyOutcome {
            kind: EntityKind::Order,
            write: WriteOutcome::from_inserted(written.inserted),
            affected_customers,
            checkout_completed,
        })
    }
}

// Checkout linkage never fails the order it belongs to.
async fn link_checkout(store: &dyn EntityStore, tenant_id: Uuid, checkout_id: i64) -> bool {
    match store.mark_checkout_completed(tenant_id, checkout_id).await {
        Ok(found) => {
            if !found {
                tracing::debug!(
                    "Checkout {} not stored for tenant {}, skipping completion",
                    checkout_id,
                    tenant_id
                );
            }
            found
        }
        Err(e) => {
            tracing::warn!(
                "Failed to mark checkout {} completed for tenant {}: {}",
                checkout_id,
                tenant_id,
                e
            );
            false
        }
    }
}

fn customer_upsert(tenant_id: Uuid, customer: &ShopifyCustomer) -> Result<CustomerUpsert> {
    Ok(CustomerUpsert {
        id: require_external_id("customer", "id", customer.id.as_ref())?,
        tenant_id,
        email: non_blank(customer.email.clone()),
        first_name: non_blank(customer.first_name.clone()),
        last_name: non_blank(customer.last_name.clone()),
        created_at: customer.created_at,
        updated_at: customer.updated_at,
    })
}

fn product_upsert(tenant_id: Uuid, product: ShopifyProduct) -> Result<ProductUpsert> {
    let variants = product.variants.unwrap_or_default();
    let price = parse_money(
        "variants[0].price",
        variants.first().and_then(|v| v.price.as_ref()),
    )?;
    let inventory: i64 = variants
        .iter()
        .filter_map(|v| v.inventory_quantity)
        .sum();

    Ok(ProductUpsert {
        id: require_external_id("product", "id", product.id.as_ref())?,
        tenant_id,
        title: non_blank(product.title),
        vendor: non_blank(product.vendor),
        product_type: non_blank(product.product_type),
        price,
        inventory: clamp_i32(inventory),
        created_at: product.created_at,
        updated_at: product.updated_at,
    })
}

fn order_bundle(tenant_id: Uuid, order: ShopifyOrder) -> Result<OrderBundle> {
    let id = require_external_id("order", "id", order.id.as_ref())?;

    // Guest orders carry no customer, or a customer without an id.
    let customer = match &order.customer {
        Some(c) if parse_external_id("customer.id", c.id.as_ref())?.is_some() => {
            Some(customer_upsert(tenant_id, c)?)
        }
        _ => None,
    };

    let line_items = order
        .line_items
        .unwrap_or_default()
        .iter()
        .map(line_item_upsert)
        .collect::<Result<Vec<_>>>()?;

    Ok(OrderBundle {
        order: OrderUpsert {
            id,
            tenant_id,
            customer_id: customer.as_ref().map(|c| c.id),
            checkout_id: parse_external_id("checkout_id", order.checkout_id.as_ref())?,
            order_number: order.order_number,
            total_price: parse_money("total_price", order.total_price.as_ref())?,
            subtotal_price: parse_money("subtotal_price", order.subtotal_price.as_ref())?,
            total_tax: parse_money("total_tax", order.total_tax.as_ref())?,
            financial_status: non_blank(order.financial_status),
            fulfillment_status: non_blank(order.fulfillment_status),
            created_at: order.created_at,
            updated_at: order.updated_at,
        },
        customer,
        line_items,
    })
}

fn line_item_upsert(item: &ShopifyLineItem) -> Result<LineItemUpsert> {
    Ok(LineItemUpsert {
        product_id: parse_external_id("line_items.product_id", item.product_id.as_ref())?,
        title: non_blank(item.title.clone()),
        quantity: clamp_i32(item.quantity.unwrap_or(0)),
        price: parse_money("line_items.price", item.price.as_ref())?,
    })
}

fn checkout_upsert(tenant_id: Uuid, checkout: &ShopifyCheckout) -> Result<CheckoutUpsert> {
    Ok(CheckoutUpsert {
        id: require_external_id("checkout", "id", checkout.id.as_ref())?,
        tenant_id,
        customer_id: embedded_customer_id(checkout.customer.as_ref())?,
        customer_email: contact_email(checkout.email.clone(), checkout.customer.as_ref()),
        total_price: parse_money("total_price", checkout.total_price.as_ref())?,
        completed: checkout.completed_at.is_some(),
        created_at: checkout.created_at,
        updated_at: checkout.updated_at,
    })
}

fn cart_upsert(tenant_id: Uuid, cart: ShopifyCart) -> Result<AbandonedCartUpsert> {
    let cart_token = non_blank(cart.token)
        .ok_or_else(|| IngestError::validation("cart payload is missing token"))?;

    Ok(AbandonedCartUpsert {
        cart_token,
        tenant_id,
        customer_id: embedded_customer_id(cart.customer.as_ref())?,
        customer_email: contact_email(cart.email, cart.customer.as_ref()),
        total_price: parse_money("total_price", cart.total_price.as_ref())?,
        line_items: cart.line_items.unwrap_or_else(|| Value::Array(Vec::new())),
        abandoned_at: cart.updated_at,
    })
}

fn embedded_customer_id(customer: Option<&ShopifyCustomer>) -> Result<Option<i64>> {
    match customer {
        Some(c) => parse_external_id("customer.id", c.id.as_ref()),
        None => Ok(None),
    }
}

fn contact_email(email: Option<String>, customer: Option<&ShopifyCustomer>) -> Option<String> {
    non_blank(email).or_else(|| customer.and_then(|c| non_blank(c.email.clone())))
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory_entity_store::MemoryEntityStore;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_missing_id_is_validation_error() {
        let err = UpsertReconciler::reconcile(
            Uuid::new_v4(),
            EntityKind::Customer,
            &json!({"email": "a@b.com"}),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_cart_requires_token() {
        let err = UpsertReconciler::reconcile(
            Uuid::new_v4(),
            EntityKind::AbandonedCart,
            &json!({"total_price": "10.00"}),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[test]
    fn test_product_uses_first_variant_price_and_total_inventory() {
        let tenant_id = Uuid::new_v4();
        let op = UpsertReconciler::reconcile(
            tenant_id,
            EntityKind::Product,
            &json!({
                "id": 7,
                "title": "Mug",
                "variants": [
                    {"price": "12.00", "inventory_quantity": 3},
                    {"price": "15.00", "inventory_quantity": 4}
                ]
            }),
        )
        .unwrap();

        match op {
            UpsertOp::Product(product) => {
                assert_eq!(product.price, dec!(12.00));
                assert_eq!(product.inventory, 7);
                assert_eq!(product.title.as_deref(), Some("Mug"));
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn test_order_extracts_embedded_customer_and_line_items() {
        let tenant_id = Uuid::new_v4();
        let op = UpsertReconciler::reconcile(
            tenant_id,
            EntityKind::Order,
            &json!({
                "id": 900,
                "total_price": "49.99",
                "checkout_id": 31,
                "customer": {"id": 555, "email": "a@b.com"},
                "line_items": [{"product_id": 7, "title": "Mug", "quantity": 2, "price": "24.995"}]
            }),
        )
        .unwrap();

        let UpsertOp::Order(bundle) = op else {
            panic!("expected order op");
        };
        assert_eq!(bundle.order.customer_id, Some(555));
        assert_eq!(bundle.order.checkout_id, Some(31));
        assert_eq!(bundle.order.total_price, dec!(49.99));
        assert_eq!(bundle.customer.as_ref().map(|c| c.id), Some(555));
        assert_eq!(bundle.line_items.len(), 1);
        assert_eq!(bundle.line_items[0].quantity, 2);
    }

    #[test]
    fn test_guest_order_has_no_customer() {
        let op = UpsertReconciler::reconcile(
            Uuid::new_v4(),
            EntityKind::Order,
            &json!({"id": 901, "total_price": "5.00", "customer": {"email": "guest@b.com"}}),
        )
        .unwrap();
        let UpsertOp::Order(bundle) = op else {
            panic!("expected order op");
        };
        assert!(bundle.customer.is_none());
        assert_eq!(bundle.order.customer_id, None);
    }

    #[test]
    fn test_checkout_cart_only_for_open_checkouts() {
        let tenant_id = Uuid::new_v4();
        let open = json!({"id": 1, "cart_token": "c1", "total_price": "9.00"});
        let done = json!({"id": 2, "cart_token": "c2", "completed_at": "2024-01-01T00:00:00Z"});
        let cartless = json!({"id": 3});

        assert!(UpsertReconciler::reconcile_checkout_cart(tenant_id, &open).unwrap().is_some());
        assert!(UpsertReconciler::reconcile_checkout_cart(tenant_id, &done).unwrap().is_none());
        assert!(UpsertReconciler::reconcile_checkout_cart(tenant_id, &cartless).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_order_links_existing_checkout_only() {
        let store = MemoryEntityStore::new();
        let tenant_id = Uuid::new_v4();

        let checkout = UpsertReconciler::reconcile(
            tenant_id,
            EntityKind::Checkout,
            &json!({"id": 31, "total_price": "49.99"}),
        )
        .unwrap();
        UpsertReconciler::apply(&store, checkout).await.unwrap();

        let linked = UpsertReconciler::reconcile(
            tenant_id,
            EntityKind::Order,
            &json!({"id": 900, "checkout_id": 31, "total_price": "49.99"}),
        )
        .unwrap();
        let outcome = UpsertReconciler::apply(&store, linked).await.unwrap();
        assert_eq!(outcome.checkout_completed, Some(true));
        assert!(store.find_checkout(tenant_id, 31).await.unwrap().unwrap().completed);

        let dangling = UpsertReconciler::reconcile(
            tenant_id,
            EntityKind::Order,
            &json!({"id": 901, "checkout_id": 99, "total_price": "1.00"}),
        )
        .unwrap();
        let outcome = UpsertReconciler::apply(&store, dangling).await.unwrap();
        assert_eq!(outcome.checkout_completed, Some(false));
        assert!(store.find_order(tenant_id, 901).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reassigned_order_reports_both_customers() {
        let store = MemoryEntityStore::new();
        let tenant_id = Uuid::new_v4();

        for customer_id in [1, 2] {
            let op = UpsertReconciler::reconcile(
                tenant_id,
                EntityKind::Order,
                &json!({"id": 900, "total_price": "10.00", "customer": {"id": customer_id}}),
            )
            .unwrap();
            let outcome = UpsertReconciler::apply(&store, op).await.unwrap();
            if customer_id == 2 {
                assert_eq!(outcome.affected_customers, vec![2, 1]);
                assert_eq!(outcome.write, WriteOutcome::Updated);
            }
        }
    }
}
