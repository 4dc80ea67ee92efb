use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::greeks::GreeksCheckResult;
use qrl_schemas::Signal;

/// The checks in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    KillSwitch,
    StrategyPaused,
    SymbolAllowed,
    PositionLimits,
    PortfolioLimits,
    LossLimits,
    GreeksLimits,
}

impl CheckName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckName::KillSwitch => "kill_switch",
            CheckName::StrategyPaused => "strategy_paused",
            CheckName::SymbolAllowed => "symbol_allowed",
            CheckName::PositionLimits => "position_limits",
            CheckName::PortfolioLimits => "portfolio_limits",
            CheckName::LossLimits => "loss_limits",
            CheckName::GreeksLimits => "greeks_limits",
        }
    }
}

/// A failed check with its operator-facing reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckFailure {
    pub check: CheckName,
    pub reason: String,
}

/// Outcome of a full gate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskResult {
    pub approved: bool,
    pub signal: Signal,
    pub checks_passed: Vec<CheckName>,
    pub checks_failed: Vec<CheckFailure>,
    /// The first failure's reason; convenience for callers and alerts.
    pub rejection_reason: Option<String>,
    pub greeks_check_result: Option<GreeksCheckResult>,
}

impl RiskResult {
    pub fn failed(&self, check: CheckName) -> bool {
        self.checks_failed.iter().any(|f| f.check == check)
    }
}

/// Sticky emergency stop owned by the risk engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub engaged: bool,
    pub reason: Option<String>,
    pub engaged_at: Option<DateTime<Utc>>,
}

impl KillSwitchState {
    pub fn engage(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        // First engagement wins; a later breach never overwrites the
        // original cause.
        if !self.engaged {
            self.engaged = true;
            self.reason = Some(reason.into());
            self.engaged_at = Some(now);
        }
    }

    /// Operator reset.
    pub fn reset(&mut self) {
        self.engaged = false;
        self.reason = None;
        self.engaged_at = None;
    }
}
