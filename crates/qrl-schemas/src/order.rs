use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::Signal;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// The side that exits a position opened on this side (long-only MVP:
    /// open = buy, close = sell).
    pub fn closing_side(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    #[default]
    Market,
    Limit,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "market",
            OrderKind::Limit => "limit",
        }
    }
}

/// Order lifecycle status.
///
/// `PENDING → SUBMITTED → (PARTIAL_FILL)* → {FILLED|CANCELLED|REJECTED|EXPIRED}`
/// Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartialFill,
    CancelRequested,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitted => "submitted",
            OrderStatus::PartialFill => "partial_fill",
            OrderStatus::CancelRequested => "cancel_requested",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
        }
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// The persisted representation of a trading intent submitted to a broker.
///
/// Invariants:
/// - `filled_qty` is monotonically non-decreasing, `0 ≤ filled_qty ≤ quantity`
/// - `status == Filled` iff `filled_qty == quantity`
/// - `broker_order_id` is unique once set and never changes afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Client-assigned UUID; unique across the system.
    pub order_id: Uuid,
    /// Broker-assigned id; set on successful submit.
    pub broker_order_id: Option<String>,
    pub account_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    /// Required iff `kind == Limit`.
    pub limit_price: Option<Decimal>,
    pub quantity: i64,
    pub filled_qty: i64,
    pub avg_fill_price: Option<Decimal>,
    pub status: OrderStatus,
    pub error_message: Option<String>,
    /// Set only for orders created by the close-position flow.
    pub close_request_id: Option<Uuid>,
    /// Monotonic broker-side update sequence, when the broker provides one.
    pub broker_update_seq: Option<i64>,
    /// Consecutive reconciliation runs where the broker reported no such order.
    pub reconcile_not_found_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a PENDING order from an approved signal.
    pub fn from_signal(signal: &Signal, order_id: Uuid, account_id: &str) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            broker_order_id: None,
            account_id: account_id.to_string(),
            strategy_id: signal.strategy_id.clone(),
            symbol: signal.symbol.clone(),
            side: signal.action,
            kind: signal.order_type,
            limit_price: signal.limit_price,
            quantity: signal.quantity,
            filled_qty: 0,
            avg_fill_price: None,
            status: OrderStatus::Pending,
            error_message: None,
            close_request_id: None,
            broker_update_seq: None,
            reconcile_not_found_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining_qty(&self) -> i64 {
        self.quantity - self.filled_qty
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Fill
// ---------------------------------------------------------------------------

/// A partial or complete execution report from a broker.
///
/// `fill_id` is the broker's unique trade/execution id and is the sole
/// idempotency key for fill processing: the same `fill_id` must never be
/// applied twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    /// The broker's order id this fill belongs to.
    pub broker_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn terminal_states_are_terminal() {
        for st in [
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ] {
            assert!(st.is_terminal(), "{st:?} must be terminal");
        }
        for st in [
            OrderStatus::Pending,
            OrderStatus::Submitted,
            OrderStatus::PartialFill,
            OrderStatus::CancelRequested,
        ] {
            assert!(st.is_active(), "{st:?} must be active");
        }
    }

    #[test]
    fn order_from_signal_starts_pending() {
        let signal = Signal {
            strategy_id: "s1".into(),
            symbol: "AAPL".into(),
            action: Side::Buy,
            quantity: 100,
            order_type: OrderKind::Market,
            limit_price: None,
            client_id: None,
            reason: String::new(),
            timestamp: Utc::now(),
        };
        let order = Order::from_signal(&signal, Uuid::new_v4(), "acct-1");
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.filled_qty, 0);
        assert_eq!(order.remaining_qty(), 100);
        assert!(order.broker_order_id.is_none());
    }

    #[test]
    fn order_round_trip_preserves_all_fields() {
        let signal = Signal {
            strategy_id: "s1".into(),
            symbol: "AAPL".into(),
            action: Side::Buy,
            quantity: 100,
            order_type: OrderKind::Limit,
            limit_price: Some(dec!(187.25)),
            client_id: Some("c-1".into()),
            reason: "breakout".into(),
            timestamp: Utc::now(),
        };
        let mut order = Order::from_signal(&signal, Uuid::new_v4(), "acct-1");
        order.broker_order_id = Some("B-9".into());
        order.status = OrderStatus::PartialFill;
        order.filled_qty = 40;
        order.avg_fill_price = Some(dec!(187.10));
        order.close_request_id = Some(Uuid::new_v4());
        order.broker_update_seq = Some(7);
        order.reconcile_not_found_count = 2;

        let json = serde_json::to_string(&order).unwrap();
        let restored: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order, restored);
    }

    #[test]
    fn fill_round_trip_is_identity() {
        let fill = Fill {
            fill_id: "F1".into(),
            broker_order_id: "B-77".into(),
            symbol: "MSFT".into(),
            side: Side::Sell,
            quantity: 25,
            price: dec!(411.50),
            timestamp: Utc::now(),
        };
        let restored = Fill::from_json(&fill.to_json().unwrap()).unwrap();
        assert_eq!(fill, restored);
    }
}
