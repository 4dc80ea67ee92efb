//! Component health checkers and the monitor tick.
//!
//! Each checker probes one dependency (database, broker, market-data
//! freshness); the monitor runs them on an interval and caches the results
//! for `/health/detailed` and `/health/component/{name}`. Failures also
//! feed the degradation machine's hysteresis windows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use qrl_broker::{BrokerAdapter, MarketData};
use qrl_state::{FailureSource, ModeMachine, StateBus, StateEvent};

use crate::api_types::ComponentHealth;
use crate::state::AppState;

#[async_trait]
pub trait ComponentChecker: Send + Sync {
    fn name(&self) -> &str;
    /// The degradation source this checker's failures count against.
    fn failure_source(&self) -> Option<FailureSource>;
    async fn check(&self) -> ComponentHealth;
}

fn health(name: &str, healthy: bool, detail: Option<String>) -> ComponentHealth {
    ComponentHealth {
        name: name.to_string(),
        healthy,
        detail,
        checked_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Checkers
// ---------------------------------------------------------------------------

pub struct DatabaseChecker {
    pool: sqlx::PgPool,
}

impl DatabaseChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ComponentChecker for DatabaseChecker {
    fn name(&self) -> &str {
        "database"
    }

    fn failure_source(&self) -> Option<FailureSource> {
        Some(FailureSource::Database)
    }

    async fn check(&self) -> ComponentHealth {
        match qrl_db::status(&self.pool).await {
            Ok(status) if status.ok && status.has_schema => health("database", true, None),
            Ok(status) => health(
                "database",
                false,
                Some(format!("connected but schema missing: {status:?}")),
            ),
            Err(err) => health("database", false, Some(err.to_string())),
        }
    }
}

pub struct BrokerChecker<B: BrokerAdapter> {
    broker: Arc<B>,
    account_id: String,
}

impl<B: BrokerAdapter> BrokerChecker<B> {
    pub fn new(broker: Arc<B>, account_id: impl Into<String>) -> Self {
        Self {
            broker,
            account_id: account_id.into(),
        }
    }
}

#[async_trait]
impl<B: BrokerAdapter> ComponentChecker for BrokerChecker<B> {
    fn name(&self) -> &str {
        "broker"
    }

    fn failure_source(&self) -> Option<FailureSource> {
        Some(FailureSource::Broker)
    }

    async fn check(&self) -> ComponentHealth {
        match self.broker.get_account(&self.account_id).await {
            Ok(_) => health("broker", true, None),
            Err(err) => health("broker", false, Some(err.to_string())),
        }
    }
}

pub struct MarketDataChecker {
    market_data: Arc<dyn MarketData>,
    probe_symbol: String,
    max_age: chrono::Duration,
}

impl MarketDataChecker {
    pub fn new(market_data: Arc<dyn MarketData>, probe_symbol: impl Into<String>, max_age_secs: i64) -> Self {
        Self {
            market_data,
            probe_symbol: probe_symbol.into(),
            max_age: chrono::Duration::seconds(max_age_secs),
        }
    }
}

#[async_trait]
impl ComponentChecker for MarketDataChecker {
    fn name(&self) -> &str {
        "market_data"
    }

    fn failure_source(&self) -> Option<FailureSource> {
        Some(FailureSource::MarketData)
    }

    async fn check(&self) -> ComponentHealth {
        match self.market_data.get_quote(&self.probe_symbol).await {
            Ok(quote) => {
                let age = quote.age_at(Utc::now());
                if age > self.max_age {
                    health(
                        "market_data",
                        false,
                        Some(format!("quote stale: {}s old", age.num_seconds())),
                    )
                } else {
                    health("market_data", true, None)
                }
            }
            Err(err) => health("market_data", false, Some(err.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Monitor tick
// ---------------------------------------------------------------------------

/// Run every checker once, cache results on the app state, and feed the
/// degradation machine.
pub async fn run_checks(
    checkers: &[Arc<dyn ComponentChecker>],
    app: &AppState,
    mode: &RwLock<ModeMachine>,
    bus: &StateBus,
) {
    let mut results = Vec::with_capacity(checkers.len());
    for checker in checkers {
        let result = checker.check().await;
        if let Some(source) = checker.failure_source() {
            let transition = {
                let mut machine = mode.write().await;
                if result.healthy {
                    machine.record_success(source, Utc::now())
                } else {
                    machine.record_failure(source, Utc::now())
                }
            };
            if let Some(transition) = transition {
                warn!(
                    from = transition.from.as_str(),
                    to = transition.to.as_str(),
                    "mode transition from health check"
                );
                bus.publish(StateEvent::ModeChanged(transition));
            }
        }
        debug!(component = %result.name, healthy = result.healthy, "health check");
        results.push(result);
    }
    app.set_component_health(results).await;
}

/// Spawn the periodic health monitor.
pub fn spawn_health_monitor(
    checkers: Vec<Arc<dyn ComponentChecker>>,
    app: AppState,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            run_checks(&checkers, &app, &app.mode, &app.bus).await;

            // Expire force-overrides on the same cadence.
            let transition = {
                let mut machine = app.mode.write().await;
                machine.tick(Utc::now())
            };
            if let Some(transition) = transition {
                app.bus.publish(StateEvent::ModeChanged(transition));
            }
        }
    })
}
