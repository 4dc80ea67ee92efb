use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::position::AssetType;

/// A position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: i64,
    pub avg_cost: Decimal,
    pub asset_type: AssetType,
}

/// Account state as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub account_id: String,
    pub cash: Decimal,
    pub buying_power: Decimal,
    pub margin_used: Decimal,
    pub total_equity: Decimal,
}

/// Broker-side order status as returned by `get_order_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerOrderStatus {
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    /// The broker has no record of the order.
    NotFound,
}

/// A market-data quote with freshness information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Relative bid/ask spread; `None` when the bid is not positive.
    pub fn spread_pct(&self) -> Option<Decimal> {
        if self.bid > Decimal::ZERO {
            Some((self.ask - self.bid) / self.bid)
        } else {
            None
        }
    }

    pub fn is_usable(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn spread_pct_requires_positive_bid() {
        let mut q = Quote {
            symbol: "AAPL".into(),
            bid: dec!(100),
            ask: dec!(101),
            last: dec!(100.5),
            timestamp: Utc::now(),
        };
        assert_eq!(q.spread_pct(), Some(dec!(0.01)));
        q.bid = Decimal::ZERO;
        assert_eq!(q.spread_pct(), None);
        assert!(!q.is_usable());
    }
}
