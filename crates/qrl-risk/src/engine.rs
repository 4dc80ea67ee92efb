//! The risk gate check chain.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::warn;

use qrl_config::RiskLimitsConfig;
use qrl_schemas::{GovernanceContext, PortfolioSnapshot, Side, Signal};
use qrl_state::TradingStateManager;

use crate::greeks::GreeksLimitCheck;
use crate::types::{CheckFailure, CheckName, KillSwitchState, RiskResult};

/// The synchronous pre-trade gate. Owns the sticky kill switch and the
/// per-strategy pause set; limits come from configuration.
pub struct RiskEngine {
    config: RiskLimitsConfig,
    kill_switch: KillSwitchState,
    paused_strategies: BTreeSet<String>,
    /// Resolved governance scalars; only the scalar view crosses into the
    /// gate, never raw governance entities.
    governance: Option<GovernanceContext>,
}

impl RiskEngine {
    pub fn new(config: RiskLimitsConfig) -> Self {
        Self {
            config,
            kill_switch: KillSwitchState::default(),
            paused_strategies: BTreeSet::new(),
            governance: None,
        }
    }

    pub fn set_governance(&mut self, context: Option<GovernanceContext>) {
        self.governance = context;
    }

    /// Risk-budget multiplier from governance (1.0 when ungoverned).
    fn risk_budget_multiplier(&self) -> Decimal {
        self.governance
            .as_ref()
            .and_then(|g| Decimal::try_from(g.risk_budget_multiplier).ok())
            .unwrap_or(Decimal::ONE)
    }

    pub fn kill_switch(&self) -> &KillSwitchState {
        &self.kill_switch
    }

    pub fn engage_kill_switch(&mut self, reason: &str, now: DateTime<Utc>) {
        self.kill_switch.engage(reason, now);
    }

    pub fn reset_kill_switch(&mut self) {
        self.kill_switch.reset();
    }

    pub fn pause_strategy(&mut self, strategy_id: &str) {
        self.paused_strategies.insert(strategy_id.to_string());
    }

    pub fn resume_strategy(&mut self, strategy_id: &str) {
        self.paused_strategies.remove(strategy_id);
    }

    /// Run the full chain. Checks run in fixed order and ALL of them
    /// execute regardless of earlier failures — accumulated reasons aid
    /// operator diagnosis.
    ///
    /// `ref_price` is the market reference price for value-based checks;
    /// limit orders fall back to their limit price when it is absent.
    pub fn evaluate(
        &mut self,
        signal: &Signal,
        snapshot: &PortfolioSnapshot,
        trading_state: &TradingStateManager,
        greeks_gate: Option<&dyn GreeksLimitCheck>,
        ref_price: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> RiskResult {
        let mut passed: Vec<CheckName> = Vec::new();
        let mut failed: Vec<CheckFailure> = Vec::new();
        let mut greeks_result = None;

        let price = signal.limit_price.or(ref_price);

        let record = |name: CheckName, outcome: Result<(), String>,
                          passed: &mut Vec<CheckName>,
                          failed: &mut Vec<CheckFailure>| match outcome {
            Ok(()) => passed.push(name),
            Err(reason) => failed.push(CheckFailure { check: name, reason }),
        };

        record(
            CheckName::KillSwitch,
            self.check_kill_switch(signal, trading_state),
            &mut passed,
            &mut failed,
        );
        record(
            CheckName::StrategyPaused,
            self.check_strategy_paused(signal),
            &mut passed,
            &mut failed,
        );
        record(
            CheckName::SymbolAllowed,
            self.check_symbol_allowed(signal),
            &mut passed,
            &mut failed,
        );
        record(
            CheckName::PositionLimits,
            self.check_position_limits(signal, snapshot, price),
            &mut passed,
            &mut failed,
        );
        record(
            CheckName::PortfolioLimits,
            self.check_portfolio_limits(signal, snapshot, price),
            &mut passed,
            &mut failed,
        );
        record(
            CheckName::LossLimits,
            self.check_loss_limits(snapshot, now),
            &mut passed,
            &mut failed,
        );

        match greeks_gate {
            Some(gate) => {
                let result = gate.check_order(signal, now);
                if result.ok {
                    passed.push(CheckName::GreeksLimits);
                } else {
                    failed.push(CheckFailure {
                        check: CheckName::GreeksLimits,
                        reason: format!("Greeks gate rejected: {:?}", result.reason_code),
                    });
                }
                greeks_result = Some(result);
            }
            // No gate installed: the check passes.
            None => passed.push(CheckName::GreeksLimits),
        }

        let approved = failed.is_empty();
        if !approved {
            warn!(
                strategy = %signal.strategy_id,
                symbol = %signal.symbol,
                failed = ?failed.iter().map(|f| f.check).collect::<Vec<_>>(),
                "signal rejected by risk gate"
            );
        }

        RiskResult {
            approved,
            signal: signal.clone(),
            rejection_reason: failed.first().map(|f| f.reason.clone()),
            checks_passed: passed,
            checks_failed: failed,
            greeks_check_result: greeks_result,
        }
    }

    // -----------------------------------------------------------------------
    // Individual checks
    // -----------------------------------------------------------------------

    /// Also covers the trading-state gate: buys need RUNNING, sells
    /// (position-reducing in the long-only model) are held to the
    /// close-allowed states.
    fn check_kill_switch(
        &self,
        signal: &Signal,
        trading_state: &TradingStateManager,
    ) -> Result<(), String> {
        if self.kill_switch.engaged {
            return Err(format!(
                "Kill switch active: {}",
                self.kill_switch.reason.as_deref().unwrap_or("unknown")
            ));
        }
        match signal.action {
            Side::Buy if !trading_state.is_trading_allowed() => Err(format!(
                "Trading state {} does not allow new orders",
                trading_state.state().state.as_str()
            )),
            Side::Sell if !trading_state.is_close_allowed() => Err(format!(
                "Trading state {} does not allow closing orders",
                trading_state.state().state.as_str()
            )),
            _ => Ok(()),
        }
    }

    fn check_strategy_paused(&self, signal: &Signal) -> Result<(), String> {
        if self.paused_strategies.contains(&signal.strategy_id) {
            Err(format!("Strategy {} is paused", signal.strategy_id))
        } else {
            Ok(())
        }
    }

    /// Blocklist takes precedence over allowlist; an empty allowlist means
    /// "allow all non-blocked". The governance pool, when one is active,
    /// further restricts buys.
    fn check_symbol_allowed(&self, signal: &Signal) -> Result<(), String> {
        if self.config.symbol_blocklist.iter().any(|s| s == &signal.symbol) {
            return Err(format!("Symbol {} is blocked", signal.symbol));
        }
        if !self.config.symbol_allowlist.is_empty()
            && !self.config.symbol_allowlist.iter().any(|s| s == &signal.symbol)
        {
            return Err(format!("Symbol {} is not in the allowlist", signal.symbol));
        }
        if signal.action == Side::Buy {
            if let Some(governance) = &self.governance {
                if !governance.pool_allows(&signal.symbol) {
                    return Err(format!(
                        "Symbol {} is outside the governance pool (version {})",
                        signal.symbol, governance.pool_version
                    ));
                }
            }
        }
        Ok(())
    }

    /// Sell orders pass trivially (they reduce risk). Buys enforce the
    /// per-order quantity, per-order value, and position-fraction limits —
    /// exactly-at-limit passes, any excess fails.
    fn check_position_limits(
        &self,
        signal: &Signal,
        snapshot: &PortfolioSnapshot,
        price: Option<Decimal>,
    ) -> Result<(), String> {
        if signal.action == Side::Sell {
            return Ok(());
        }

        if signal.quantity > self.config.max_per_order {
            return Err(format!(
                "Quantity {} exceeds max per order {}",
                signal.quantity, self.config.max_per_order
            ));
        }

        let Some(price) = price else {
            return Err("No reference price available for value checks".to_string());
        };

        let value = Decimal::from(signal.quantity) * price;
        let max_value = self.config.max_order_value * self.risk_budget_multiplier();
        if value > max_value {
            return Err(format!(
                "Order value {value} exceeds max order value {max_value}"
            ));
        }

        if snapshot.equity > Decimal::ZERO {
            let position_pct = value / snapshot.equity;
            if position_pct > self.config.max_position_pct {
                return Err(format!(
                    "Position fraction {position_pct:.4} exceeds max {}",
                    self.config.max_position_pct
                ));
            }
        }

        Ok(())
    }

    /// New symbols are rejected at the open-position cap; adding to an
    /// existing symbol is allowed. Buys also enforce buying power and the
    /// no-leverage projected-exposure bound.
    fn check_portfolio_limits(
        &self,
        signal: &Signal,
        snapshot: &PortfolioSnapshot,
        price: Option<Decimal>,
    ) -> Result<(), String> {
        if signal.action == Side::Sell {
            return Ok(());
        }

        if !snapshot.holds(&signal.symbol)
            && snapshot.open_position_count() >= self.config.max_positions
        {
            return Err(format!(
                "Open position count {} is at the cap {}",
                snapshot.open_position_count(),
                self.config.max_positions
            ));
        }

        let Some(price) = price else {
            return Err("No reference price available for exposure checks".to_string());
        };
        let value = Decimal::from(signal.quantity) * price;

        if value > snapshot.buying_power {
            return Err(format!(
                "Order value {value} exceeds buying power {}",
                snapshot.buying_power
            ));
        }

        let projected = snapshot.gross_exposure() + value;
        if projected > snapshot.equity {
            return Err(format!(
                "Projected exposure {projected} exceeds equity {}",
                snapshot.equity
            ));
        }

        Ok(())
    }

    /// A breach flips the kill switch (sticky) and fails the check. The
    /// daily-loss comparison is inclusive: a loss exactly at the limit
    /// trips on the next evaluation.
    fn check_loss_limits(
        &mut self,
        snapshot: &PortfolioSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        if self.config.daily_loss_limit > Decimal::ZERO
            && snapshot.daily_pnl <= -self.config.daily_loss_limit
        {
            let reason = format!(
                "Daily loss limit breached: pnl={} limit={}",
                snapshot.daily_pnl, self.config.daily_loss_limit
            );
            self.kill_switch.engage(&reason, now);
            return Err(reason);
        }

        if self.config.max_drawdown_pct > Decimal::ZERO && snapshot.peak_equity > Decimal::ZERO {
            let drawdown = (snapshot.peak_equity - snapshot.equity) / snapshot.peak_equity;
            if drawdown > self.config.max_drawdown_pct {
                let reason = format!(
                    "Max drawdown breached: drawdown={drawdown:.4} limit={}",
                    self.config.max_drawdown_pct
                );
                self.kill_switch.engage(&reason, now);
                return Err(reason);
            }
        }

        Ok(())
    }
}
