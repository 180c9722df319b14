use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four pull phases of a bulk sync, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Customers,
    Products,
    Orders,
    AbandonedCheckouts,
}

impl SyncPhase {
    pub const ALL: [SyncPhase; 4] = [
        SyncPhase::Customers,
        SyncPhase::Products,
        SyncPhase::Orders,
        SyncPhase::AbandonedCheckouts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Customers => "customers",
            SyncPhase::Products => "products",
            SyncPhase::Orders => "orders",
            SyncPhase::AbandonedCheckouts => "abandoned_checkouts",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseFailure {
    pub phase: SyncPhase,
    pub error_type: String,
    pub reason: String,
}

/// Raw tenant-wide figures read from the order and customer tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenantTotals {
    pub total_revenue: Decimal,
    pub total_orders: i64,
    pub total_customers: i64,
}

/// Tenant-wide statistics reported at the end of a bulk sync. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TenantSummary {
    pub total_revenue: Decimal,
    pub total_orders: i64,
    pub total_customers: i64,
    pub average_order_value: Decimal,
    /// Customers whose cached aggregates were repaired by this pass.
    pub drift_repaired: u64,
}

impl TenantSummary {
    pub fn from_totals(totals: TenantTotals, drift_repaired: u64) -> Self {
        let average_order_value = if totals.total_orders == 0 {
            Decimal::ZERO
        } else {
            (totals.total_revenue / Decimal::from(totals.total_orders)).round_dp(2)
        };

        Self {
            total_revenue: totals.total_revenue.round_dp(2),
            total_orders: totals.total_orders,
            total_customers: totals.total_customers,
            average_order_value,
            drift_repaired,
        }
    }
}

/// Result of `sync_all_data`: per-kind counts plus end-of-sync statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub customers: i32,
    pub products: i32,
    pub orders: i32,
    pub abandoned_carts: i32,
    pub records_skipped: i32,
    pub stats: TenantSummary,
    pub failed_phases: Vec<PhaseFailure>,
}

impl SyncSummary {
    pub fn set_count(&mut self, phase: SyncPhase, count: i32) {
        match phase {
            SyncPhase::Customers => self.customers = count,
            SyncPhase::Products => self.products = count,
            SyncPhase::Orders => self.orders = count,
            SyncPhase::AbandonedCheckouts => self.abandoned_carts = count,
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.failed_phases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_average_order_value_with_no_orders_is_zero() {
        let summary = TenantSummary::from_totals(TenantTotals::default(), 0);
        assert_eq!(summary.average_order_value, Decimal::ZERO);
    }

    #[test]
    fn test_average_order_value_rounds_to_cents() {
        let summary = TenantSummary::from_totals(
            TenantTotals {
                total_revenue: dec!(100.00),
                total_orders: 3,
                total_customers: 2,
            },
            1,
        );
        assert_eq!(summary.average_order_value, dec!(33.33));
        assert_eq!(summary.drift_repaired, 1);
    }
}
