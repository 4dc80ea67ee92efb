use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Stock,
    Option,
}

impl AssetType {
    /// Contract multiplier applied when valuing the position.
    pub fn multiplier(&self) -> i64 {
        match self {
            AssetType::Stock => 1,
            AssetType::Option => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Stock => "stock",
            AssetType::Option => "option",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
    CloseRetryable,
    CloseFailed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closing => "closing",
            PositionStatus::Closed => "closed",
            PositionStatus::CloseRetryable => "close_retryable",
            PositionStatus::CloseFailed => "close_failed",
        }
    }

    /// States in which a non-null `active_close_request_id` must exist.
    pub fn has_active_close(&self) -> bool {
        matches!(self, PositionStatus::Closing | PositionStatus::CloseRetryable)
    }
}

/// A held position. Long-only in the MVP: `quantity >= 0`.
///
/// Invariant: `active_close_request_id` is non-null iff
/// `status ∈ {closing, close_retryable}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub account_id: String,
    pub symbol: String,
    pub asset_type: AssetType,
    pub strategy_id: Option<String>,
    pub status: PositionStatus,
    pub quantity: i64,
    pub avg_cost: Decimal,
    pub current_price: Decimal,
    /// Option expiry date; None for stocks.
    pub expiry: Option<NaiveDate>,
    pub active_close_request_id: Option<Uuid>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn market_value(&self) -> Decimal {
        Decimal::from(self.quantity * self.asset_type.multiplier()) * self.current_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.avg_cost)
            * Decimal::from(self.quantity * self.asset_type.multiplier())
    }

    /// Check the close-tracking invariant; a violation is a programmer error
    /// surfaced as a corruption alert by callers.
    pub fn close_tracking_consistent(&self) -> bool {
        self.status.has_active_close() == self.active_close_request_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn open_position() -> Position {
        Position {
            id: 1,
            account_id: "acct-1".into(),
            symbol: "AAPL".into(),
            asset_type: AssetType::Stock,
            strategy_id: Some("s1".into()),
            status: PositionStatus::Open,
            quantity: 50,
            avg_cost: dec!(150.00),
            current_price: dec!(155.00),
            expiry: None,
            active_close_request_id: None,
            opened_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn stock_market_value_has_no_multiplier() {
        let p = open_position();
        assert_eq!(p.market_value(), dec!(7750.00));
        assert_eq!(p.unrealized_pnl(), dec!(250.00));
    }

    #[test]
    fn option_market_value_uses_contract_multiplier() {
        let mut p = open_position();
        p.asset_type = AssetType::Option;
        p.quantity = 2;
        assert_eq!(p.market_value(), dec!(31000.00));
    }

    #[test]
    fn close_tracking_invariant() {
        let mut p = open_position();
        assert!(p.close_tracking_consistent());

        p.status = PositionStatus::Closing;
        assert!(!p.close_tracking_consistent());

        p.active_close_request_id = Some(Uuid::new_v4());
        assert!(p.close_tracking_consistent());

        p.status = PositionStatus::Closed;
        assert!(!p.close_tracking_consistent());
    }
}
