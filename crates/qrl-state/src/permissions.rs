//! Per-action permission table derived from the degradation mode.

use serde::{Deserialize, Serialize};

use crate::mode::SystemMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Open,
    Send,
    Amend,
    Cancel,
    ReduceOnly,
    Query,
}

impl ActionType {
    pub const ALL: [ActionType; 6] = [
        ActionType::Open,
        ActionType::Send,
        ActionType::Amend,
        ActionType::Cancel,
        ActionType::ReduceOnly,
        ActionType::Query,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Open => "open",
            ActionType::Send => "send",
            ActionType::Amend => "amend",
            ActionType::Cancel => "cancel",
            ActionType::ReduceOnly => "reduce_only",
            ActionType::Query => "query",
        }
    }
}

/// Verdict for one action in one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub allowed: bool,
    /// Allowed but under degraded conditions the caller should surface.
    pub restricted: bool,
    /// Attach an operator-visible warning.
    pub warning: bool,
    /// Decision was made from cached/local data only.
    pub local_only: bool,
}

impl Permission {
    const fn full() -> Self {
        Self {
            allowed: true,
            restricted: false,
            warning: false,
            local_only: false,
        }
    }

    const fn denied() -> Self {
        Self {
            allowed: false,
            restricted: false,
            warning: false,
            local_only: false,
        }
    }

    const fn restricted() -> Self {
        Self {
            allowed: true,
            restricted: true,
            warning: true,
            local_only: false,
        }
    }

    const fn local_only() -> Self {
        Self {
            allowed: true,
            restricted: true,
            warning: true,
            local_only: true,
        }
    }
}

/// The permission policy table.
///
/// | mode                  | open | send | amend | cancel | reduce_only | query |
/// |-----------------------|------|------|-------|--------|-------------|-------|
/// | normal                | ✓    | ✓    | ✓     | ✓      | ✓           | ✓     |
/// | degraded              | ✓ R  | ✓ R  | ✓ R   | ✓      | ✓           | ✓     |
/// | safe_mode             | ✗    | ✗    | ✗     | ✓      | ✓ R         | ✓     |
/// | safe_mode_disconnected| ✗    | ✗    | ✗     | ✓ L    | ✓ L         | ✓ L   |
/// | halt                  | ✗    | ✗    | ✗     | ✗      | ✗           | ✓     |
/// | recovering            | ✗    | ✗    | ✗     | ✓      | ✓ R         | ✓     |
///
/// R = restricted+warning, L = local_only (decisions from cache).
pub fn permission(mode: SystemMode, action: ActionType) -> Permission {
    use ActionType::*;
    use SystemMode::*;

    match (mode, action) {
        (Normal, _) => Permission::full(),

        (Degraded, Open | Send | Amend) => Permission::restricted(),
        (Degraded, _) => Permission::full(),

        (SafeMode, Open | Send | Amend) => Permission::denied(),
        (SafeMode, ReduceOnly) => Permission::restricted(),
        (SafeMode, Cancel | Query) => Permission::full(),

        (SafeModeDisconnected, Open | Send | Amend) => Permission::denied(),
        (SafeModeDisconnected, Cancel | ReduceOnly | Query) => Permission::local_only(),

        (Halt, Query) => Permission::full(),
        (Halt, _) => Permission::denied(),

        (Recovering, Open | Send | Amend) => Permission::denied(),
        (Recovering, ReduceOnly) => Permission::restricted(),
        (Recovering, Cancel | Query) => Permission::full(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_allows_everything() {
        for action in ActionType::ALL {
            let p = permission(SystemMode::Normal, action);
            assert!(p.allowed && !p.restricted && !p.local_only);
        }
    }

    #[test]
    fn disconnected_denies_open_allows_reduce_only_locally() {
        let open = permission(SystemMode::SafeModeDisconnected, ActionType::Open);
        assert!(!open.allowed);

        let reduce = permission(SystemMode::SafeModeDisconnected, ActionType::ReduceOnly);
        assert!(reduce.allowed);
        assert!(reduce.local_only);
    }

    #[test]
    fn halt_only_allows_query() {
        for action in ActionType::ALL {
            let p = permission(SystemMode::Halt, action);
            assert_eq!(p.allowed, action == ActionType::Query);
        }
    }

    #[test]
    fn degraded_warns_on_new_risk() {
        let send = permission(SystemMode::Degraded, ActionType::Send);
        assert!(send.allowed && send.restricted && send.warning);
        let cancel = permission(SystemMode::Degraded, ActionType::Cancel);
        assert!(cancel.allowed && !cancel.restricted);
    }
}
