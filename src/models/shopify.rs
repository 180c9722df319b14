// Wire shapes of the storefront Admin API and its webhooks.
//
// Every field is optional here: payloads are not statically guaranteed, so
// they are deserialized loosely and then validated into strict records by
// the reconciler. Ids and money arrive as either JSON numbers or strings.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use std::str::FromStr;

use crate::services::ingest_error::{IngestError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyCustomer {
    pub id: Option<Value>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyVariant {
    pub price: Option<Value>,
    pub inventory_quantity: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyProduct {
    pub id: Option<Value>,
    pub title: Option<String>,
    pub vendor: Option<String>,
    pub product_type: Option<String>,
    pub variants: Option<Vec<ShopifyVariant>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyLineItem {
    pub product_id: Option<Value>,
    pub title: Option<String>,
    pub quantity: Option<i64>,
    pub price: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyOrder {
    pub id: Option<Value>,
    pub customer: Option<ShopifyCustomer>,
    pub checkout_id: Option<Value>,
    pub order_number: Option<i64>,
    pub total_price: Option<Value>,
    pub subtotal_price: Option<Value>,
    pub total_tax: Option<Value>,
    pub financial_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub line_items: Option<Vec<ShopifyLineItem>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyCheckout {
    pub id: Option<Value>,
    pub token: Option<String>,
    pub cart_token: Option<String>,
    pub email: Option<String>,
    pub customer: Option<ShopifyCustomer>,
    pub total_price: Option<Value>,
    pub completed_at: Option<DateTime<Utc>>,
    pub line_items: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyCart {
    pub token: Option<String>,
    pub email: Option<String>,
    pub customer: Option<ShopifyCustomer>,
    pub total_price: Option<Value>,
    pub line_items: Option<Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Deserialize a loosely-typed payload, turning shape errors into validation failures.
pub fn parse_payload<T: DeserializeOwned>(kind: &str, payload: &Value) -> Result<T> {
    if !payload.is_object() {
        return Err(IngestError::validation(format!("{} payload must be a JSON object", kind)));
    }
    T::deserialize(payload)
        .map_err(|e| IngestError::validation(format!("malformed {} payload: {}", kind, e)))
}

/// Parse an optional external id (JSON number or numeric string).
pub fn parse_external_id(field: &str, value: Option<&Value>) -> Result<Option<i64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| IngestError::validation(format!("{} is not an integer id: {}", field, n))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| IngestError::validation(format!("{} is not an integer id: {:?}", field, s))),
        Some(other) => Err(IngestError::validation(format!(
            "{} has unexpected type: {}",
            field, other
        ))),
    }
}

/// Parse a required external id; absence is a validation error.
pub fn require_external_id(kind: &str, field: &str, value: Option<&Value>) -> Result<i64> {
    parse_external_id(field, value)?
        .ok_or_else(|| IngestError::validation(format!("{} payload is missing {}", kind, field)))
}

// Money columns are NUMERIC(14,2): magnitudes must stay below 10^12.
const MONEY_LIMIT: i64 = 1_000_000_000_000;

/// Parse a monetary amount into fixed-point with two decimal places,
/// rounding half away from zero.
///
/// Absent or null amounts are zero. A present amount that does not parse,
/// or that does not fit the money columns, is rejected rather than coerced.
pub fn parse_money(field: &str, value: Option<&Value>) -> Result<Decimal> {
    let raw = match value {
        None | Some(Value::Null) => return Ok(Decimal::ZERO),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Decimal::ZERO),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(IngestError::validation(format!(
                "{} has unexpected type: {}",
                field, other
            )))
        }
    };

    let amount = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map(|amount| amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .map_err(|_| IngestError::validation(format!("{} is not a valid amount: {:?}", field, raw)))?;

    if amount.abs() >= Decimal::new(MONEY_LIMIT, 0) {
        return Err(IngestError::validation(format!(
            "{} is out of range: {}",
            field, amount
        )));
    }

    Ok(amount)
}

/// Treat blank strings from the storefront as absent.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
