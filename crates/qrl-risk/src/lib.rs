//! qrl-risk
//!
//! Synchronous pre-trade risk gate. [`RiskEngine::evaluate`] runs a fixed
//! check chain over a signal and a portfolio snapshot and returns the full
//! pass/fail picture — on a failure the remaining checks still execute, so
//! operators see every violated limit, not just the first.
//!
//! Check order: `kill_switch`, `strategy_paused`, `symbol_allowed`,
//! `position_limits`, `portfolio_limits`, `loss_limits`, `greeks_limits`.
//!
//! The engine owns the sticky kill switch: a loss-limit breach flips it with
//! a reason, and every later evaluation fails `kill_switch` until an
//! operator resets it.
//!
//! Everything here is pure and non-suspending; the Greeks gate plug-in is a
//! sync trait fed by a snapshot provider.

mod engine;
mod greeks;
mod types;

pub use engine::RiskEngine;
pub use greeks::{
    AggregatedGreeks, GreeksCheckDetails, GreeksCheckResult, GreeksGate, GreeksGateConfig,
    GreeksLimitCheck, GreeksProvider, GreeksReason, GreeksVector, GREEK_DIMS,
};
pub use types::{CheckFailure, CheckName, KillSwitchState, RiskResult};
