use serde::{Deserialize, Serialize};

/// Stop-loss mode resolved by the governance layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    #[default]
    Baseline,
    Wide,
    FundamentalGuarded,
}

/// Read-only scalar view of resolved governance decisions.
///
/// This is the sole interface between the governance layer and the core:
/// only scalars and symbol lists cross the boundary, never raw governance
/// entities. Defaults describe an ungoverned system (multipliers 1.0,
/// empty pool meaning "no pool restriction").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceContext {
    pub active_pool: Vec<String>,
    pub pacing_multiplier: f64,
    pub risk_budget_multiplier: f64,
    pub veto_downgrade_active: bool,
    pub stop_mode: StopMode,
    pub pool_version: String,
    pub regime_state: String,
}

impl Default for GovernanceContext {
    fn default() -> Self {
        Self {
            active_pool: Vec::new(),
            pacing_multiplier: 1.0,
            risk_budget_multiplier: 1.0,
            veto_downgrade_active: false,
            stop_mode: StopMode::Baseline,
            pool_version: "none".to_string(),
            regime_state: "NORMAL".to_string(),
        }
    }
}

impl GovernanceContext {
    /// An empty pool means no pool restriction is in force.
    pub fn pool_allows(&self, symbol: &str) -> bool {
        self.active_pool.is_empty() || self.active_pool.iter().any(|s| s == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_allows_everything() {
        let ctx = GovernanceContext::default();
        assert!(ctx.pool_allows("AAPL"));
    }

    #[test]
    fn non_empty_pool_restricts() {
        let ctx = GovernanceContext {
            active_pool: vec!["AAPL".into(), "MSFT".into()],
            ..GovernanceContext::default()
        };
        assert!(ctx.pool_allows("AAPL"));
        assert!(!ctx.pool_allows("TSLA"));
    }
}
