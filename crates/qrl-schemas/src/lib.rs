//! qrl-schemas
//!
//! Shared domain types for the quantrail core. Every workspace member that
//! speaks about orders, fills, positions, close requests, or broker state
//! imports the canonical shapes from here — no crate re-declares them.
//!
//! Wire forms are serde; monetary values are `rust_decimal::Decimal` and
//! quantities are `i64` throughout.

mod broker;
mod close_request;
mod governance;
mod order;
mod outbox;
mod position;
mod signal;

pub use broker::{BrokerAccount, BrokerOrderStatus, BrokerPosition, Quote};
pub use close_request::{CloseRequest, CloseRequestStatus};
pub use governance::{GovernanceContext, StopMode};
pub use order::{Fill, Order, OrderKind, OrderStatus, Side};
pub use outbox::{OutboxEvent, OutboxPayload, OutboxStatus, PAYLOAD_MAX_BYTES};
pub use position::{AssetType, Position, PositionStatus};
pub use signal::Signal;

use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Named stream channels shared by publishers and consumers.
pub mod channels {
    pub const APPROVED_SIGNALS: &str = "approved_signals";
    pub const FILLS: &str = "fills";
    pub const RECONCILIATION_RESULT: &str = "reconciliation:result";
    pub const RECONCILIATION_DISCREPANCY: &str = "reconciliation:discrepancy";
}

/// Point-in-time view of the portfolio consumed by the risk gate and the
/// reconciler. Produced by the portfolio store; never mutated by readers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PortfolioSnapshot {
    pub account_id: String,
    pub cash: Decimal,
    pub buying_power: Decimal,
    pub equity: Decimal,
    /// Highest equity observed since tracking started.
    pub peak_equity: Decimal,
    /// Realized + unrealized PnL accumulated today (negative = loss).
    pub daily_pnl: Decimal,
    /// Open positions keyed by symbol: (quantity, avg_cost, current_price).
    pub positions: BTreeMap<String, PositionView>,
}

/// Per-symbol slice of [`PortfolioSnapshot`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PositionView {
    pub quantity: i64,
    pub avg_cost: Decimal,
    pub current_price: Decimal,
}

impl PortfolioSnapshot {
    /// Market value of all open positions at current prices.
    pub fn gross_exposure(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| Decimal::from(p.quantity) * p.current_price)
            .sum()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn holds(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }
}
