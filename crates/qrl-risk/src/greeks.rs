//! Pre-order Greeks limit gate (plug-in of the risk chain).
//!
//! Fail-closed by default: a missing or stale Greeks snapshot rejects the
//! order with `DATA_UNAVAILABLE` / `DATA_STALE`. Otherwise
//! `projected = current + impact` per dimension and any
//! `|projected| > hard_limit` is a `HARD_BREACH`. The full
//! current/impact/projected/limits picture is attached to the result for
//! audit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use qrl_schemas::Signal;

/// The tracked Greek dimensions, canonical field names.
pub const GREEK_DIMS: &[&str] = &["dollar_delta", "gamma_dollar", "vega_per_1pct", "theta_per_day"];

/// A value per Greek dimension.
pub type GreeksVector = BTreeMap<String, Decimal>;

/// Latest aggregated portfolio Greeks with their as-of timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedGreeks {
    pub as_of: DateTime<Utc>,
    pub values: GreeksVector,
}

/// Source of Greeks snapshots and per-order impacts. Implemented by the
/// pricing collaborator; both calls are non-suspending snapshot reads.
pub trait GreeksProvider: Send + Sync {
    /// Most recent aggregated Greeks, if any have been computed.
    fn current(&self) -> Option<AggregatedGreeks>;

    /// This order's per-Greek impact. `None` when the symbol cannot be
    /// priced (treated as data-unavailable).
    fn order_impact(&self, signal: &Signal) -> Option<GreeksVector>;
}

#[derive(Debug, Clone)]
pub struct GreeksGateConfig {
    pub max_staleness_seconds: i64,
    pub hard_limits: GreeksVector,
    /// `false` = fail-closed (default); `true` = allow on missing/stale data.
    pub fail_open: bool,
}

impl Default for GreeksGateConfig {
    fn default() -> Self {
        Self {
            max_staleness_seconds: 60,
            hard_limits: GreeksVector::new(),
            fail_open: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GreeksReason {
    Approved,
    DataUnavailable,
    DataStale,
    HardBreach,
}

/// Everything the audit trail needs about one Greeks evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreeksCheckDetails {
    pub as_of: DateTime<Utc>,
    pub staleness_seconds: i64,
    pub current: GreeksVector,
    pub impact: GreeksVector,
    pub projected: GreeksVector,
    pub limits: GreeksVector,
    pub breach_dims: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreeksCheckResult {
    pub ok: bool,
    pub reason_code: GreeksReason,
    pub details: Option<GreeksCheckDetails>,
}

/// Object-safe view of the gate used by the risk engine; lets callers plug
/// any provider without generics leaking into the chain.
pub trait GreeksLimitCheck: Send + Sync {
    fn check_order(&self, signal: &Signal, now: DateTime<Utc>) -> GreeksCheckResult;
}

impl<P: GreeksProvider> GreeksLimitCheck for GreeksGate<P> {
    fn check_order(&self, signal: &Signal, now: DateTime<Utc>) -> GreeksCheckResult {
        GreeksGate::check_order(self, signal, now)
    }
}

pub struct GreeksGate<P: GreeksProvider> {
    provider: P,
    config: GreeksGateConfig,
}

impl<P: GreeksProvider> GreeksGate<P> {
    pub fn new(provider: P, config: GreeksGateConfig) -> Self {
        Self { provider, config }
    }

    pub fn check_order(&self, signal: &Signal, now: DateTime<Utc>) -> GreeksCheckResult {
        let Some(current) = self.provider.current() else {
            return self.data_failure(GreeksReason::DataUnavailable);
        };

        let staleness = (now - current.as_of).num_seconds();
        if staleness > self.config.max_staleness_seconds {
            return self.data_failure(GreeksReason::DataStale);
        }

        let Some(impact) = self.provider.order_impact(signal) else {
            return self.data_failure(GreeksReason::DataUnavailable);
        };

        let mut projected = GreeksVector::new();
        for dim in GREEK_DIMS {
            let cur = current.values.get(*dim).copied().unwrap_or(Decimal::ZERO);
            let imp = impact.get(*dim).copied().unwrap_or(Decimal::ZERO);
            projected.insert((*dim).to_string(), cur + imp);
        }

        let mut breach_dims = Vec::new();
        for dim in GREEK_DIMS {
            let Some(limit) = self.config.hard_limits.get(*dim) else {
                continue;
            };
            if projected[*dim].abs() > *limit {
                breach_dims.push((*dim).to_string());
            }
        }

        let details = GreeksCheckDetails {
            as_of: current.as_of,
            staleness_seconds: staleness,
            current: current.values,
            impact,
            projected,
            limits: self.config.hard_limits.clone(),
            breach_dims: breach_dims.clone(),
        };

        if breach_dims.is_empty() {
            GreeksCheckResult {
                ok: true,
                reason_code: GreeksReason::Approved,
                details: Some(details),
            }
        } else {
            tracing::warn!(dims = ?breach_dims, "order breaches Greeks hard limits");
            GreeksCheckResult {
                ok: false,
                reason_code: GreeksReason::HardBreach,
                details: Some(details),
            }
        }
    }

    fn data_failure(&self, reason: GreeksReason) -> GreeksCheckResult {
        if self.config.fail_open {
            tracing::warn!(?reason, "Greeks data failure, fail-open allows order");
            GreeksCheckResult {
                ok: true,
                reason_code: GreeksReason::Approved,
                details: None,
            }
        } else {
            GreeksCheckResult {
                ok: false,
                reason_code: reason,
                details: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use qrl_schemas::{OrderKind, Side};
    use rust_decimal_macros::dec;

    struct FixedProvider {
        greeks: Option<AggregatedGreeks>,
        impact: Option<GreeksVector>,
    }

    impl GreeksProvider for FixedProvider {
        fn current(&self) -> Option<AggregatedGreeks> {
            self.greeks.clone()
        }
        fn order_impact(&self, _signal: &Signal) -> Option<GreeksVector> {
            self.impact.clone()
        }
    }

    fn vector(delta: Decimal) -> GreeksVector {
        let mut v = GreeksVector::new();
        v.insert("dollar_delta".into(), delta);
        v.insert("gamma_dollar".into(), Decimal::ZERO);
        v.insert("vega_per_1pct".into(), Decimal::ZERO);
        v.insert("theta_per_day".into(), Decimal::ZERO);
        v
    }

    fn signal() -> Signal {
        Signal {
            strategy_id: "s1".into(),
            symbol: "AAPL".into(),
            action: Side::Buy,
            quantity: 10,
            order_type: OrderKind::Market,
            limit_price: None,
            client_id: None,
            reason: String::new(),
            timestamp: Utc::now(),
        }
    }

    fn config(delta_limit: Decimal) -> GreeksGateConfig {
        GreeksGateConfig {
            max_staleness_seconds: 60,
            hard_limits: {
                let mut v = GreeksVector::new();
                v.insert("dollar_delta".into(), delta_limit);
                v
            },
            fail_open: false,
        }
    }

    #[test]
    fn missing_data_fails_closed() {
        let gate = GreeksGate::new(
            FixedProvider {
                greeks: None,
                impact: None,
            },
            config(dec!(10000)),
        );
        let result = gate.check_order(&signal(), Utc::now());
        assert!(!result.ok);
        assert_eq!(result.reason_code, GreeksReason::DataUnavailable);
    }

    #[test]
    fn stale_data_fails_closed() {
        let now = Utc::now();
        let gate = GreeksGate::new(
            FixedProvider {
                greeks: Some(AggregatedGreeks {
                    as_of: now - Duration::seconds(120),
                    values: vector(dec!(100)),
                }),
                impact: Some(vector(dec!(1))),
            },
            config(dec!(10000)),
        );
        let result = gate.check_order(&signal(), now);
        assert!(!result.ok);
        assert_eq!(result.reason_code, GreeksReason::DataStale);
    }

    #[test]
    fn fail_open_allows_on_missing_data() {
        let mut cfg = config(dec!(10000));
        cfg.fail_open = true;
        let gate = GreeksGate::new(
            FixedProvider {
                greeks: None,
                impact: None,
            },
            cfg,
        );
        let result = gate.check_order(&signal(), Utc::now());
        assert!(result.ok);
        assert!(result.details.is_none());
    }

    #[test]
    fn projected_breach_is_rejected_with_details() {
        let now = Utc::now();
        let gate = GreeksGate::new(
            FixedProvider {
                greeks: Some(AggregatedGreeks {
                    as_of: now,
                    values: vector(dec!(9000)),
                }),
                impact: Some(vector(dec!(2000))),
            },
            config(dec!(10000)),
        );
        let result = gate.check_order(&signal(), now);
        assert!(!result.ok);
        assert_eq!(result.reason_code, GreeksReason::HardBreach);
        let details = result.details.unwrap();
        assert_eq!(details.projected["dollar_delta"], dec!(11000));
        assert_eq!(details.breach_dims, vec!["dollar_delta".to_string()]);
    }

    #[test]
    fn abs_comparison_catches_negative_breach() {
        let now = Utc::now();
        let gate = GreeksGate::new(
            FixedProvider {
                greeks: Some(AggregatedGreeks {
                    as_of: now,
                    values: vector(dec!(-9000)),
                }),
                impact: Some(vector(dec!(-2000))),
            },
            config(dec!(10000)),
        );
        let result = gate.check_order(&signal(), now);
        assert_eq!(result.reason_code, GreeksReason::HardBreach);
    }

    #[test]
    fn within_limits_approves() {
        let now = Utc::now();
        let gate = GreeksGate::new(
            FixedProvider {
                greeks: Some(AggregatedGreeks {
                    as_of: now,
                    values: vector(dec!(100)),
                }),
                impact: Some(vector(dec!(50))),
            },
            config(dec!(10000)),
        );
        let result = gate.check_order(&signal(), now);
        assert!(result.ok);
        assert_eq!(result.reason_code, GreeksReason::Approved);
        assert!(result.details.is_some());
    }

    #[test]
    fn exactly_at_limit_passes() {
        let now = Utc::now();
        let gate = GreeksGate::new(
            FixedProvider {
                greeks: Some(AggregatedGreeks {
                    as_of: now,
                    values: vector(dec!(9000)),
                }),
                impact: Some(vector(dec!(1000))),
            },
            config(dec!(10000)),
        );
        let result = gate.check_order(&signal(), now);
        assert!(result.ok, "|projected| == limit is not a breach");
    }
}
