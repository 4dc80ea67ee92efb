//! Typed configuration sections for the core subsystems.
//!
//! Every section and every field has a serde default so that a partial (or
//! empty) YAML document yields a runnable configuration. Defaults mirror the
//! values the safety plane was tuned with; overriding them is an operator
//! action that lands in the config hash.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub risk: RiskLimitsConfig,
    pub degradation: DegradationConfig,
    pub outbox: OutboxConfig,
    pub reconcile: ReconcileConfig,
    pub alerts: AlertRoutingConfig,
    pub wal: WalConfig,
    /// Resolved governance scalars; absent means ungoverned (all
    /// multipliers 1.0, no pool restriction).
    pub governance: Option<qrl_schemas::GovernanceContext>,
}

// ---------------------------------------------------------------------------
// Risk limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimitsConfig {
    /// Max quantity per single order (buys).
    pub max_per_order: i64,
    /// Max notional value per single order (buys).
    pub max_order_value: Decimal,
    /// Max fraction of equity a single position may represent.
    pub max_position_pct: Decimal,
    /// Max number of simultaneously open symbols.
    pub max_positions: usize,
    /// Daily loss (positive number) beyond which the kill switch flips.
    pub daily_loss_limit: Decimal,
    /// Peak-to-trough drawdown fraction beyond which the kill switch flips.
    pub max_drawdown_pct: Decimal,
    /// Symbols always rejected; takes precedence over the allowlist.
    pub symbol_blocklist: Vec<String>,
    /// Empty allowlist means "allow all non-blocked symbols".
    pub symbol_allowlist: Vec<String>,
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        Self {
            max_per_order: 1_000,
            max_order_value: dec!(50_000),
            max_position_pct: dec!(0.20),
            max_positions: 10,
            daily_loss_limit: dec!(1_000),
            max_drawdown_pct: dec!(0.10),
            symbol_blocklist: Vec::new(),
            symbol_allowlist: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Degradation
// ---------------------------------------------------------------------------

/// Hysteresis window for a single failure source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisConfig {
    pub fail_threshold_count: u32,
    pub fail_threshold_seconds: u64,
    pub recovery_stable_seconds: u64,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            fail_threshold_count: 3,
            fail_threshold_seconds: 60,
            recovery_stable_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    pub broker: HysteresisConfig,
    pub market_data: HysteresisConfig,
    pub database: HysteresisConfig,
    /// Minimum dwell time in safe mode before any recovery transition.
    pub min_safe_mode_seconds: u64,
    /// Default TTL for operator force-overrides.
    pub override_ttl_seconds: u64,
    /// When true, an expired override demotes to unknown instead of
    /// resuming health-driven control directly.
    pub unknown_on_ttl_expiry: bool,
    /// Event bus capacity; overflow drops and counts.
    pub bus_capacity: usize,
    /// Staleness threshold for cached position data served in
    /// safe_mode_disconnected.
    pub position_cache_stale_ms: u64,
}

impl DegradationConfig {
    /// Stable window required to leave `recovering`: the widest of the
    /// per-source recovery windows.
    pub fn recovery_window_secs(&self) -> u64 {
        self.broker
            .recovery_stable_seconds
            .max(self.market_data.recovery_stable_seconds)
            .max(self.database.recovery_stable_seconds)
    }
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            broker: HysteresisConfig::default(),
            market_data: HysteresisConfig::default(),
            database: HysteresisConfig::default(),
            min_safe_mode_seconds: 300,
            override_ttl_seconds: 1_800,
            unknown_on_ttl_expiry: false,
            bus_capacity: 1_024,
            position_cache_stale_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub workers: usize,
    pub claim_batch: i64,
    pub max_retries: i32,
    pub poll_interval_secs: u64,
    /// Terminal events older than this are deleted by the cleaner.
    pub retention_days: i64,
    /// Aggressive-limit crossing on a normal spread (sell bid×(1−x), buy ask×(1+x)).
    pub cross_pct: Decimal,
    /// Spread beyond which the quote is considered wide.
    pub wide_spread_pct: Decimal,
    /// Fallback crossing applied to `last` on a wide spread.
    pub fallback_pct: Decimal,
    /// Absolute price floor for computed limit prices.
    pub min_price: Decimal,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            claim_batch: 10,
            max_retries: 3,
            poll_interval_secs: 1,
            retention_days: 7,
            cross_pct: dec!(0.05),
            wide_spread_pct: dec!(0.20),
            fallback_pct: dec!(0.10),
            min_price: dec!(0.01),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Absolute cash tolerance.
    pub cash_tolerance: Decimal,
    /// Relative equity tolerance (fraction, e.g. 0.005 = 0.5%).
    pub equity_tolerance_pct: Decimal,
    pub interval_secs: u64,
    /// Non-terminal orders untouched for longer than this are stuck candidates.
    pub zombie_order_age_secs: i64,
    /// Consecutive broker not-found observations before marking EXPIRED.
    pub not_found_threshold: i32,
    /// Acquire the advisory lock before running (multi-instance deployments).
    pub distributed: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            cash_tolerance: dec!(1.00),
            equity_tolerance_pct: dec!(0.005),
            interval_secs: 300,
            zombie_order_age_secs: 3_600,
            not_found_threshold: 3,
            distributed: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Alert routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertRoutingConfig {
    /// Delivery worker count.
    pub workers: usize,
    /// Max concurrent channel invocations across all workers.
    pub max_in_flight: usize,
    /// Per-delivery timeout in seconds.
    pub delivery_timeout_secs: u64,
    /// Queue capacity between emitters and the hub.
    pub queue_capacity: usize,
}

impl Default for AlertRoutingConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_in_flight: 4,
            delivery_timeout_secs: 10,
            queue_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// WAL buffer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub max_age_secs: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: 16 * 1024 * 1024,
            max_age_secs: 600,
        }
    }
}
