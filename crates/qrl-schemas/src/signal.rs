use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::{OrderKind, Side};

/// A trading intent emitted by a strategy.
///
/// Signals express intent, not orders: the risk gate validates them and the
/// order lifecycle manager converts approved signals into broker orders.
/// `client_id` scopes the idempotency key used for signal replay protection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: String,
    pub action: Side,
    pub quantity: i64,
    #[serde(default)]
    pub order_type: OrderKind,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Client-assigned replay scope; combined with strategy and symbol to
    /// form the signal idempotency key.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }

    /// Key under which duplicate submissions of the same intent collapse.
    pub fn idempotency_key(&self) -> String {
        match &self.client_id {
            Some(cid) => format!("{}:{}:{}", self.strategy_id, self.symbol, cid),
            None => format!("{}:{}", self.strategy_id, self.symbol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Signal {
        Signal {
            strategy_id: "momentum-1".into(),
            symbol: "AAPL".into(),
            action: Side::Buy,
            quantity: 100,
            order_type: OrderKind::Limit,
            limit_price: Some(dec!(187.25)),
            client_id: Some("c-42".into()),
            reason: "breakout".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn json_round_trip_is_identity() {
        let s = sample();
        let restored = Signal::from_json(&s.to_json().unwrap()).unwrap();
        assert_eq!(s, restored);
    }

    #[test]
    fn idempotency_key_includes_client_id() {
        let s = sample();
        assert_eq!(s.idempotency_key(), "momentum-1:AAPL:c-42");
    }

    #[test]
    fn missing_optional_fields_default() {
        let raw = r#"{"strategy_id":"m","symbol":"MSFT","action":"sell","quantity":5,"timestamp":"2026-01-05T10:00:00Z"}"#;
        let s = Signal::from_json(raw).unwrap();
        assert_eq!(s.order_type, OrderKind::Market);
        assert!(s.limit_price.is_none());
        assert!(s.client_id.is_none());
    }
}
