//! Alert construction: fingerprint, dedupe key, validation.
//!
//! The fingerprint is a deterministic hash over the alert's type and scope
//! keys. Option-expiring alerts fingerprint on `position_id` instead of
//! symbol — the symbol repeats across rolling contracts and would collapse
//! distinct positions into one alert.
//!
//! The dedupe key appends a suffix to the fingerprint:
//! - transient alerts: a coarse time bucket, so the same condition re-fires
//!   after the bucket rolls;
//! - recurring-but-stable alerts (e.g. option-expiring at a given
//!   threshold): a fixed `:permanent:threshold_{N}` marker, so the alert
//!   fires once per threshold for the life of the position.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::model::{AlertEvent, AlertType, Severity, DETAILS_MAX_BYTES};

/// Default time bucket for transient dedupe keys.
const DEFAULT_BUCKET_SECS: i64 = 3600;

/// How repeated occurrences of an alert collapse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupePolicy {
    /// Fingerprint + time bucket: re-fires each bucket.
    TimeBucket { bucket_secs: i64 },
    /// Fingerprint + fixed marker: fires once per threshold, permanently.
    PermanentThreshold { threshold: i64 },
}

impl Default for DedupePolicy {
    fn default() -> Self {
        DedupePolicy::TimeBucket {
            bucket_secs: DEFAULT_BUCKET_SECS,
        }
    }
}

/// Builder for alerts; terminal call is [`AlertBuild::build`].
#[derive(Debug, Clone)]
pub struct AlertBuild {
    alert_type: AlertType,
    severity: Severity,
    summary: String,
    details: Option<Value>,
    account_id: Option<String>,
    symbol: Option<String>,
    strategy_id: Option<String>,
    position_id: Option<i64>,
    policy: DedupePolicy,
    event_timestamp: DateTime<Utc>,
}

/// Start building an alert.
pub fn create_alert(
    alert_type: AlertType,
    severity: Severity,
    summary: impl Into<String>,
) -> AlertBuild {
    AlertBuild {
        alert_type,
        severity,
        summary: summary.into(),
        details: None,
        account_id: None,
        symbol: None,
        strategy_id: None,
        position_id: None,
        policy: DedupePolicy::default(),
        event_timestamp: Utc::now(),
    }
}

impl AlertBuild {
    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    pub fn position(mut self, position_id: i64) -> Self {
        self.position_id = Some(position_id);
        self
    }

    pub fn dedupe(mut self, policy: DedupePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.event_timestamp = timestamp;
        self
    }

    pub fn build(self) -> AlertEvent {
        let fingerprint = compute_fingerprint(
            self.alert_type,
            self.account_id.as_deref(),
            self.symbol.as_deref(),
            self.strategy_id.as_deref(),
            self.position_id,
            self.details.as_ref(),
        );
        let dedupe_key = compute_dedupe_key(&fingerprint, &self.policy, self.event_timestamp);

        AlertEvent {
            alert_type: self.alert_type,
            severity: self.severity,
            fingerprint,
            dedupe_key,
            summary: self.summary,
            details: self.details,
            account_id: self.account_id,
            symbol: self.symbol,
            strategy_id: self.strategy_id,
            position_id: self.position_id,
            event_timestamp: self.event_timestamp,
        }
    }
}

/// Deterministic hash of type + scope keys + the stable details subset.
fn compute_fingerprint(
    alert_type: AlertType,
    account_id: Option<&str>,
    symbol: Option<&str>,
    strategy_id: Option<&str>,
    position_id: Option<i64>,
    details: Option<&Value>,
) -> String {
    // Option-expiring scopes on the position, not the (non-unique) symbol.
    let scope = if alert_type == AlertType::OptionExpiring {
        position_id.map(|id| id.to_string()).unwrap_or_default()
    } else {
        symbol.unwrap_or_default().to_string()
    };

    // Stable subset of details: scalar fields only, sorted by key. Nested
    // values (timings, measurements) churn per occurrence and would defeat
    // deduplication.
    let stable_details = details
        .and_then(Value::as_object)
        .map(|map| {
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|k| !matches!(map[k.as_str()], Value::Object(_) | Value::Array(_)))
                .collect();
            keys.sort();
            keys.into_iter()
                .map(|k| format!("{k}={}", map[k.as_str()]))
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(alert_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(account_id.unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(scope.as_bytes());
    hasher.update(b"|");
    hasher.update(strategy_id.unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(stable_details.as_bytes());
    hex::encode(hasher.finalize())
}

fn compute_dedupe_key(
    fingerprint: &str,
    policy: &DedupePolicy,
    event_timestamp: DateTime<Utc>,
) -> String {
    match policy {
        DedupePolicy::TimeBucket { bucket_secs } => {
            let bucket = event_timestamp.timestamp() / bucket_secs;
            format!("{fingerprint}:{bucket}")
        }
        DedupePolicy::PermanentThreshold { threshold } => {
            format!("{fingerprint}:permanent:threshold_{threshold}")
        }
    }
}

/// Validate an alert before persisting. Only the details budget can fail.
pub fn validate_alert(alert: &AlertEvent) -> Result<(), String> {
    if let Some(details) = &alert.details {
        let size = details.to_string().len();
        if size > DETAILS_MAX_BYTES {
            return Err(format!(
                "alert details is {size} bytes, budget is {DETAILS_MAX_BYTES}"
            ));
        }
    }
    Ok(())
}
