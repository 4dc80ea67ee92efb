//! Operator-facing trading state machine.
//!
//! ```text
//! RUNNING ──pause()──► PAUSED ──resume()──► RUNNING
//!    │                   │
//!    └──halt()──► HALTED ◄┘
//!                   │ enable_resume()   (sets can_resume, stays HALTED)
//!                   └──resume()──► RUNNING   (only if can_resume)
//! ```
//!
//! HALTED is sticky: `resume` on a fresh halt fails until an explicit
//! `enable_resume` — two distinct operator actions are required to leave an
//! emergency stop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingStateValue {
    Running,
    Paused,
    Halted,
}

impl TradingStateValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingStateValue::Running => "RUNNING",
            TradingStateValue::Paused => "PAUSED",
            TradingStateValue::Halted => "HALTED",
        }
    }
}

/// Snapshot of the current trading state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingState {
    pub state: TradingStateValue,
    pub since: DateTime<Utc>,
    pub changed_by: String,
    pub reason: Option<String>,
    pub can_resume: bool,
}

/// Manages the trading-state machine. All methods take `now` so transitions
/// are deterministic under test.
#[derive(Debug, Clone)]
pub struct TradingStateManager {
    state: TradingState,
}

impl TradingStateManager {
    /// Starts RUNNING.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: TradingState {
                state: TradingStateValue::Running,
                since: now,
                changed_by: "system".to_string(),
                reason: None,
                can_resume: true,
            },
        }
    }

    pub fn state(&self) -> &TradingState {
        &self.state
    }

    /// Emergency stop. Sets HALTED with `can_resume = false`.
    pub fn halt(&mut self, changed_by: &str, reason: &str, now: DateTime<Utc>) {
        self.state = TradingState {
            state: TradingStateValue::Halted,
            since: now,
            changed_by: changed_by.to_string(),
            reason: Some(reason.to_string()),
            can_resume: false,
        };
    }

    /// Temporary stop. Close operations remain allowed.
    pub fn pause(&mut self, changed_by: &str, reason: Option<&str>, now: DateTime<Utc>) {
        self.state = TradingState {
            state: TradingStateValue::Paused,
            since: now,
            changed_by: changed_by.to_string(),
            reason: reason.map(str::to_string),
            can_resume: true,
        };
    }

    /// Permit a later `resume` from HALTED. No effect in other states.
    pub fn enable_resume(&mut self, changed_by: &str) {
        if self.state.state != TradingStateValue::Halted {
            return;
        }
        self.state.changed_by = changed_by.to_string();
        self.state.can_resume = true;
    }

    /// Return to RUNNING. Fails (returns false) when `can_resume` is unset —
    /// i.e. on a halt that has not been explicitly enabled.
    pub fn resume(&mut self, changed_by: &str, now: DateTime<Utc>) -> bool {
        if !self.state.can_resume {
            return false;
        }
        self.state = TradingState {
            state: TradingStateValue::Running,
            since: now,
            changed_by: changed_by.to_string(),
            reason: None,
            can_resume: true,
        };
        true
    }

    /// New (opening) trades allowed only while RUNNING.
    pub fn is_trading_allowed(&self) -> bool {
        self.state.state == TradingStateValue::Running
    }

    /// Closing positions allowed while RUNNING or PAUSED.
    pub fn is_close_allowed(&self) -> bool {
        matches!(
            self.state.state,
            TradingStateValue::Running | TradingStateValue::Paused
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr() -> TradingStateManager {
        TradingStateManager::new(Utc::now())
    }

    #[test]
    fn starts_running() {
        let m = mgr();
        assert_eq!(m.state().state, TradingStateValue::Running);
        assert!(m.is_trading_allowed());
        assert!(m.is_close_allowed());
    }

    #[test]
    fn pause_allows_close_only() {
        let mut m = mgr();
        m.pause("op-1", Some("maintenance"), Utc::now());
        assert!(!m.is_trading_allowed());
        assert!(m.is_close_allowed());
    }

    #[test]
    fn paused_resume_always_succeeds() {
        let mut m = mgr();
        m.pause("op-1", None, Utc::now());
        assert!(m.resume("op-1", Utc::now()));
        assert!(m.is_trading_allowed());
    }

    #[test]
    fn halt_is_sticky_until_enable_resume() {
        let mut m = mgr();
        m.halt("op-1", "broker drift", Utc::now());
        assert!(!m.is_trading_allowed());
        assert!(!m.is_close_allowed());

        assert!(!m.resume("op-1", Utc::now()), "resume without enable must fail");
        assert_eq!(m.state().state, TradingStateValue::Halted);

        m.enable_resume("op-2");
        assert_eq!(m.state().state, TradingStateValue::Halted, "enable does not resume");
        assert!(m.resume("op-2", Utc::now()));
        assert_eq!(m.state().state, TradingStateValue::Running);
    }

    #[test]
    fn enable_resume_outside_halted_is_noop() {
        let mut m = mgr();
        m.pause("op-1", None, Utc::now());
        m.enable_resume("op-2");
        assert_eq!(m.state().changed_by, "op-1");
    }

    #[test]
    fn halt_preserves_reason() {
        let mut m = mgr();
        m.halt("kill-switch", "Daily loss limit breached", Utc::now());
        assert_eq!(
            m.state().reason.as_deref(),
            Some("Daily loss limit breached")
        );
    }
}
