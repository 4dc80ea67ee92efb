//! Environment contract: connection URLs, timeouts, trade environment,
//! alert destinations. Values are read once at startup and injected; no
//! component reads the process environment after boot.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::time::Duration;

/// Execution environment. PROD talks to a live broker; SIMULATE wires the
/// deterministic paper broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeEnv {
    Simulate,
    Prod,
}

impl TradeEnv {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "SIMULATE" => Ok(TradeEnv::Simulate),
            "PROD" => Ok(TradeEnv::Prod),
            other => bail!("TRADE_ENV must be SIMULATE or PROD, got {other:?}"),
        }
    }
}

/// RPC deadlines. Timed-out calls are treated as transient failures and
/// routed to the owning retry boundary.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub broker: Duration,
    pub market_data: Duration,
    pub db: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            broker: Duration::from_millis(5_000),
            market_data: Duration::from_millis(5_000),
            db: Duration::from_millis(3_000),
        }
    }
}

/// Everything the daemon reads from the process environment.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    pub db_url: String,
    pub redis_url: Option<String>,
    pub trade_env: TradeEnv,
    pub timeouts: Timeouts,
    /// Destination key → resolved address (e.g. "email:risk" → mailbox).
    pub alert_destinations: BTreeMap<String, String>,
    /// HTTP mail-gateway endpoint for the email channel.
    pub email_gateway: Option<String>,
}

/// Destination keys and their environment variable names.
const DESTINATION_ENV_MAP: &[(&str, &str)] = &[
    ("email:default", "ALERT_EMAIL_DEFAULT"),
    ("email:risk", "ALERT_EMAIL_RISK"),
    ("email:ops", "ALERT_EMAIL_OPS"),
    ("webhook:default", "ALERT_WEBHOOK_DEFAULT"),
    ("webhook:wecom", "ALERT_WEBHOOK_WECOM"),
];

impl EnvSettings {
    /// Read the full contract from the process environment.
    ///
    /// `DB_URL` is required; everything else has a default or is optional.
    pub fn from_env() -> Result<Self> {
        let db_url = std::env::var("DB_URL").context("missing env var DB_URL")?;
        let redis_url = std::env::var("REDIS_URL").ok();
        let trade_env = match std::env::var("TRADE_ENV") {
            Ok(v) => TradeEnv::parse(&v)?,
            Err(_) => TradeEnv::Simulate,
        };

        let timeouts = Timeouts {
            broker: duration_ms("BROKER_TIMEOUT_MS", 5_000)?,
            market_data: duration_ms("MARKET_DATA_TIMEOUT_MS", 5_000)?,
            db: duration_ms("DB_TIMEOUT_MS", 3_000)?,
        };

        let mut alert_destinations = BTreeMap::new();
        for (key, var) in DESTINATION_ENV_MAP {
            if let Ok(addr) = std::env::var(var) {
                if !addr.is_empty() {
                    alert_destinations.insert(key.to_string(), addr);
                }
            }
        }

        Ok(Self {
            db_url,
            redis_url,
            trade_env,
            timeouts,
            alert_destinations,
            email_gateway: std::env::var("ALERT_EMAIL_GATEWAY").ok(),
        })
    }
}

fn duration_ms(var: &str, default_ms: u64) -> Result<Duration> {
    match std::env::var(var) {
        Ok(v) => {
            let ms: u64 = v
                .parse()
                .with_context(|| format!("{var} must be an integer millisecond count"))?;
            Ok(Duration::from_millis(ms))
        }
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}
