use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard budget for the serialized `details` blob; enforced at construction
/// and by a DB check constraint.
pub const DETAILS_MAX_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    OrderRejected,
    DailyLossLimit,
    KillSwitchActivated,
    PositionLimitHit,
    OptionExpiring,
    ReconciliationDiscrepancy,
    ConnectionLost,
    ConnectionRestored,
    ModeTransition,
    AuditIntegrity,
    WalOverflow,
    AlertDeliveryFailed,
    StaleMarketData,
    CloseRequestFailed,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::OrderRejected => "order_rejected",
            AlertType::DailyLossLimit => "daily_loss_limit",
            AlertType::KillSwitchActivated => "kill_switch_activated",
            AlertType::PositionLimitHit => "position_limit_hit",
            AlertType::OptionExpiring => "option_expiring",
            AlertType::ReconciliationDiscrepancy => "reconciliation_discrepancy",
            AlertType::ConnectionLost => "connection_lost",
            AlertType::ConnectionRestored => "connection_restored",
            AlertType::ModeTransition => "mode_transition",
            AlertType::AuditIntegrity => "audit_integrity",
            AlertType::WalOverflow => "wal_overflow",
            AlertType::AlertDeliveryFailed => "alert_delivery_failed",
            AlertType::StaleMarketData => "stale_market_data",
            AlertType::CloseRequestFailed => "close_request_failed",
        }
    }
}

/// Recovery-typed alerts bypass deduplication: every occurrence is news.
pub const RECOVERY_TYPES: &[AlertType] = &[AlertType::ConnectionRestored];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Sev1,
    Sev2,
    Sev3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Sev1 => "SEV1",
            Severity::Sev2 => "SEV2",
            Severity::Sev3 => "SEV3",
        }
    }
}

/// A fully built alert, ready to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub fingerprint: String,
    pub dedupe_key: String,
    pub summary: String,
    pub details: Option<serde_json::Value>,
    pub account_id: Option<String>,
    pub symbol: Option<String>,
    pub strategy_id: Option<String>,
    pub position_id: Option<i64>,
    pub event_timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn is_recovery(&self) -> bool {
        RECOVERY_TYPES.contains(&self.alert_type)
    }
}
