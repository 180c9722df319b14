use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::checkout::{AbandonedCart, AbandonedCartUpsert, Checkout, CheckoutUpsert};
use crate::models::customer::{AggregateChange, Customer, CustomerUpsert};
use crate::models::order::{LineItemUpsert, Order, OrderLineItem, OrderUpsert, OrderWriteOutcome};
use crate::models::product::{Product, ProductUpsert};
use crate::models::sync::TenantTotals;
use crate::repositories::entity_store::{EntityStore, WriteOutcome};
use crate::services::ingest_error::Result;

pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn upsert_customer(&self, customer: &CustomerUpsert) -> Result<WriteOutcome> {
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO customers (id, tenant_id, email, first_name, last_name, orders_count, total_spent, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 0, 0, COALESCE($6::timestamptz, NOW()), COALESCE($7::timestamptz, NOW()))
            ON CONFLICT (tenant_id, id) DO UPDATE SET
                email = EXCLUDED.email,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                created_at = COALESCE($6::timestamptz, customers.created_at),
                updated_at = COALESCE($7::timestamptz, customers.updated_at)
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(customer.id)
        .bind(customer.tenant_id)
        .bind(&customer.email)
        .bind(&customer.first_name)
        .bind(&customer.last_name)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(WriteOutcome::from_inserted(inserted))
    }

    async fn merge_embedded_customer(&self, customer: &CustomerUpsert) -> Result<WriteOutcome> {
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO customers (id, tenant_id, email, first_name, last_name, orders_count, total_spent, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 0, 0, COALESCE($6::timestamptz, NOW()), COALESCE($7::timestamptz, NOW()))
            ON CONFLICT (tenant_id, id) DO UPDATE SET
                email = COALESCE(EXCLUDED.email, customers.email),
                first_name = COALESCE(EXCLUDED.first_name, customers.first_name),
                last_name = COALESCE(EXCLUDED.last_name, customers.last_name),
                created_at = COALESCE($6::timestamptz, customers.created_at),
                updated_at = COALESCE($7::timestamptz, customers.updated_at)
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(customer.id)
        .bind(customer.tenant_id)
        .bind(&customer.email)
        .bind(&customer.first_name)
        .bind(&customer.last_name)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(WriteOutcome::from_inserted(inserted))
    }

    async fn upsert_product(&self, product: &ProductUpsert) -> Result<WriteOutcome> {
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO products (id, tenant_id, title, vendor, product_type, price, inventory, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8::timestamptz, NOW()), COALESCE($9::timestamptz, NOW()))
            ON CONFLICT (tenant_id, id) DO UPDATE SET
                title = EXCLUDED.title,
                vendor = EXCLUDED.vendor,
                product_type = EXCLUDED.product_type,
                price = EXCLUDED.price,
                inventory = EXCLUDED.inventory,
                created_at = COALESCE($8::timestamptz, products.created_at),
                updated_at = COALESCE($9::timestamptz, products.updated_at)
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(product.id)
        .bind(product.tenant_id)
        .bind(&product.title)
        .bind(&product.vendor)
        .bind(&product.product_type)
        .bind(product.price)
        .bind(product.inventory)
        .bind(product.created_at)
        .bind(product.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(WriteOutcome::from_inserted(inserted))
    }

    async fn upsert_order(
        &self,
        order: &OrderUpsert,
        line_items: &[LineItemUpsert],
    ) -> Result<OrderWriteOutcome> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT customer_id FROM orders WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(order.tenant_id)
        .bind(order.id)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, tenant_id, customer_id, checkout_id, order_number, total_price, subtotal_price,
                total_tax, financial_status, fulfillment_status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, COALESCE($11::timestamptz, NOW()), COALESCE($12::timestamptz, NOW()))
            ON CONFLICT (tenant_id, id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                checkout_id = EXCLUDED.checkout_id,
                order_number = EXCLUDED.order_number,
                total_price = EXCLUDED.total_price,
                subtotal_price = EXCLUDED.subtotal_price,
                total_tax = EXCLUDED.total_tax,
                financial_status = EXCLUDED.financial_status,
                fulfillment_status = EXCLUDED.fulfillment_status,
                created_at = COALESCE($11::timestamptz, orders.created_at),
                updated_at = COALESCE($12::timestamptz, orders.updated_at)
            "#,
        )
        .bind(order.id)
        .bind(order.tenant_id)
        .bind(order.customer_id)
        .bind(order.checkout_id)
        .bind(order.order_number)
        .bind(order.total_price)
        .bind(order.subtotal_price)
        .bind(order.total_tax)
        .bind(&order.financial_status)
        .bind(&order.fulfillment_status)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM order_line_items WHERE tenant_id = $1 AND order_id = $2")
            .bind(order.tenant_id)
            .bind(order.id)
            .execute(&mut *tx)
            .await?;

        for item in line_items {
            sqlx::query(
                r#"
                INSERT INTO order_line_items (id, order_id, tenant_id, product_id, title, quantity, price)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(order.id)
            .bind(order.tenant_id)
            .bind(item.product_id)
            .bind(&item.title)
            .bind(item.quantity)
            .bind(item.price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(OrderWriteOutcome {
            inserted: previous.is_none(),
            previous_customer_id: previous.flatten(),
        })
    }

    async fn upsert_checkout(&self, checkout: &CheckoutUpsert) -> Result<WriteOutcome> {
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO checkouts (id, tenant_id, customer_id, customer_email, total_price, completed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7::timestamptz, NOW()), COALESCE($8::timestamptz, NOW()))
            ON CONFLICT (tenant_id, id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                customer_email = EXCLUDED.customer_email,
                total_price = EXCLUDED.total_price,
                completed = checkouts.completed OR EXCLUDED.completed,
                created_at = COALESCE($7::timestamptz, checkouts.created_at),
                updated_at = COALESCE($8::timestamptz, checkouts.updated_at)
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(checkout.id)
        .bind(checkout.tenant_id)
        .bind(checkout.customer_id)
        .bind(&checkout.customer_email)
        .bind(checkout.total_price)
        .bind(checkout.completed)
        .bind(checkout.created_at)
        .bind(checkout.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(WriteOutcome::from_inserted(inserted))
    }

    async fn upsert_abandoned_cart(&self, cart: &AbandonedCartUpsert) -> Result<WriteOutcome> {
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO abandoned_carts (cart_token, tenant_id, customer_id, customer_email, total_price, line_items, abandoned_at)
            VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7::timestamptz, NOW()))
            ON CONFLICT (tenant_id, cart_token) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                customer_email = EXCLUDED.customer_email,
                total_price = EXCLUDED.total_price,
                line_items = EXCLUDED.line_items,
                abandoned_at = COALESCE($7::timestamptz, abandoned_carts.abandoned_at)
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&cart.cart_token)
        .bind(cart.tenant_id)
        .bind(cart.customer_id)
        .bind(&cart.customer_email)
        .bind(cart.total_price)
        .bind(&cart.line_items)
        .bind(cart.abandoned_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(WriteOutcome::from_inserted(inserted))
    }

    async fn mark_checkout_completed(&self, tenant_id: Uuid, checkout_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE checkouts SET completed = TRUE WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(checkout_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn recompute_customer_aggregates(
        &self,
        tenant_id: Uuid,
        customer_id: i64,
    ) -> Result<Option<AggregateChange>> {
        let row = sqlx::query(
            r#"
            WITH fresh AS (
                SELECT COUNT(*)::INT AS orders_count,
                       COALESCE(SUM(total_price), 0)::NUMERIC(14, 2) AS total_spent
                FROM orders
                WHERE tenant_id = $1 AND customer_id = $2
            ), previous AS (
                SELECT orders_count, total_spent
                FROM customers
                WHERE tenant_id = $1 AND id = $2
                FOR UPDATE
            )
            UPDATE customers c
            SET orders_count = fresh.orders_count,
                total_spent = fresh.total_spent
            FROM fresh, previous
            WHERE c.tenant_id = $1 AND c.id = $2
            RETURNING previous.orders_count AS previous_orders_count,
                      previous.total_spent AS previous_total_spent,
                      c.orders_count,
                      c.total_spent
            "#,
        )
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(AggregateChange {
                customer_id,
                previous_orders_count: row.try_get("previous_orders_count")?,
                previous_total_spent: row.try_get("previous_total_spent")?,
                orders_count: row.try_get("orders_count")?,
                total_spent: row.try_get("total_spent")?,
            })),
            None => Ok(None),
        }
    }

    async fn recompute_tenant_aggregates(&self, tenant_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            WITH fresh AS (
                SELECT c.id,
                       COUNT(o.id)::INT AS orders_count,
                       COALESCE(SUM(o.total_price), 0)::NUMERIC(14, 2) AS total_spent
                FROM customers c
                LEFT JOIN orders o ON o.tenant_id = c.tenant_id AND o.customer_id = c.id
                WHERE c.tenant_id = $1
                GROUP BY c.id
            )
            UPDATE customers c
            SET orders_count = fresh.orders_count,
                total_spent = fresh.total_spent
            FROM fresh
            WHERE c.tenant_id = $1
              AND c.id = fresh.id
              AND (c.orders_count <> fresh.orders_count OR c.total_spent <> fresh.total_spent)
            "#,
        )
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn tenant_totals(&self, tenant_id: Uuid) -> Result<TenantTotals> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM orders WHERE tenant_id = $1) AS total_orders,
                (SELECT COALESCE(SUM(total_price), 0) FROM orders WHERE tenant_id = $1) AS total_revenue,
                (SELECT COUNT(*) FROM customers WHERE tenant_id = $1) AS total_customers
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(TenantTotals {
            total_orders: row.try_get("total_orders")?,
            total_revenue: row.try_get("total_revenue")?,
            total_customers: row.try_get("total_customers")?,
        })
    }

    async fn find_customer(&self, tenant_id: Uuid, id: i64) -> Result<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT id, tenant_id, email, first_name, last_name, orders_count, total_spent, created_at, updated_at
            FROM customers WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    async fn find_product(&self, tenant_id: Uuid, id: i64) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, tenant_id, title, vendor, product_type, price, inventory, created_at, updated_at
            FROM products WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    async fn find_order(&self, tenant_id: Uuid, id: i64) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, tenant_id, customer_id, checkout_id, order_number, total_price, subtotal_price,
                   total_tax, financial_status, fulfillment_status, created_at, updated_at
            FROM orders WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn find_order_line_items(&self, tenant_id: Uuid, order_id: i64) -> Result<Vec<OrderLineItem>> {
        let items = sqlx::query_as::<_, OrderLineItem>(
            r#"
            SELECT id, order_id, tenant_id, product_id, title, quantity, price
            FROM order_line_items WHERE tenant_id = $1 AND order_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn find_checkout(&self, tenant_id: Uuid, id: i64) -> Result<Option<Checkout>> {
        let checkout = sqlx::query_as::<_, Checkout>(
            r#"
            SELECT id, tenant_id, customer_id, customer_email, total_price, completed, created_at, updated_at
            FROM checkouts WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(checkout)
    }

    async fn find_abandoned_cart(&self, tenant_id: Uuid, cart_token: &str) -> Result<Option<AbandonedCart>> {
        let cart = sqlx::query_as::<_, AbandonedCart>(
            r#"
            SELECT cart_token, tenant_id, customer_id, customer_email, total_price, line_items, abandoned_at
            FROM abandoned_carts WHERE tenant_id = $1 AND cart_token = $2
            "#,
        )
        .bind(tenant_id)
        .bind(cart_token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cart)
    }
}
