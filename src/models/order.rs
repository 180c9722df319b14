use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::customer::CustomerUpsert;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub tenant_id: Uuid,
    pub customer_id: Option<i64>,
    pub checkout_id: Option<i64>,
    pub order_number: Option<i64>,
    pub total_price: Decimal,
    pub subtotal_price: Decimal,
    pub total_tax: Decimal,
    pub financial_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderLineItem {
    pub id: Uuid,
    pub order_id: i64,
    pub tenant_id: Uuid,
    pub product_id: Option<i64>,
    pub title: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpsert {
    pub id: i64,
    pub tenant_id: Uuid,
    pub customer_id: Option<i64>,
    pub checkout_id: Option<i64>,
    pub order_number: Option<i64>,
    pub total_price: Decimal,
    pub subtotal_price: Decimal,
    pub total_tax: Decimal,
    pub financial_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Line items carry no stable upstream identifier, so they are always
/// written as a complete replacement set for their order.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemUpsert {
    pub product_id: Option<i64>,
    pub title: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
}

/// Everything one order payload reconciles into.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBundle {
    pub customer: Option<CustomerUpsert>,
    pub order: OrderUpsert,
    pub line_items: Vec<LineItemUpsert>,
}

/// What the store observed while writing an order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderWriteOutcome {
    pub inserted: bool,
    /// Customer the order pointed at before this write (`None` for a new order or a guest order).
    pub previous_customer_id: Option<i64>,
}
