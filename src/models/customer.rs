use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored customer row. `orders_count` and `total_spent` are cached aggregates
/// over the customer's orders and are only ever written by the aggregate recalculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: i64,
    pub tenant_id: Uuid,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub orders_count: i32,
    pub total_spent: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identity fields of a customer as reconciled from a storefront payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerUpsert {
    pub id: i64,
    pub tenant_id: Uuid,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Result of recomputing one customer's cached aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateChange {
    pub customer_id: i64,
    pub previous_orders_count: i32,
    pub previous_total_spent: Decimal,
    pub orders_count: i32,
    pub total_spent: Decimal,
}

impl AggregateChange {
    /// True when the cached values had drifted from the order rows and were overwritten.
    pub fn drift_repaired(&self) -> bool {
        self.previous_orders_count != self.orders_count
            || self.previous_total_spent != self.total_spent
    }
}
