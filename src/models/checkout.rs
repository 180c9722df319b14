use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A checkout only moves from `completed = false` to `completed = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Checkout {
    pub id: i64,
    pub tenant_id: Uuid,
    pub customer_id: Option<i64>,
    pub customer_email: Option<String>,
    pub total_price: Decimal,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutUpsert {
    pub id: i64,
    pub tenant_id: Uuid,
    pub customer_id: Option<i64>,
    pub customer_email: Option<String>,
    pub total_price: Decimal,
    pub completed: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AbandonedCart {
    pub cart_token: String,
    pub tenant_id: Uuid,
    pub customer_id: Option<i64>,
    pub customer_email: Option<String>,
    pub total_price: Decimal,
    /// Opaque snapshot of the cart contents as delivered.
    pub line_items: serde_json::Value,
    pub abandoned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbandonedCartUpsert {
    pub cart_token: String,
    pub tenant_id: Uuid,
    pub customer_id: Option<i64>,
    pub customer_email: Option<String>,
    pub total_price: Decimal,
    pub line_items: serde_json::Value,
    pub abandoned_at: Option<DateTime<Utc>>,
}
