use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyType {
    /// Broker holds a position we do not know about.
    MissingLocal,
    /// We hold a position the broker does not report.
    MissingBroker,
    QuantityMismatch,
    CostMismatch,
    CashMismatch,
    EquityMismatch,
    /// A non-terminal local order the broker no longer knows.
    ZombieOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscrepancySeverity {
    Critical,
    Warning,
    Info,
}

impl DiscrepancyType {
    /// Default severity per discrepancy type.
    pub fn severity(&self) -> DiscrepancySeverity {
        match self {
            DiscrepancyType::MissingLocal
            | DiscrepancyType::MissingBroker
            | DiscrepancyType::QuantityMismatch
            | DiscrepancyType::ZombieOrder => DiscrepancySeverity::Critical,
            DiscrepancyType::CashMismatch | DiscrepancyType::EquityMismatch => {
                DiscrepancySeverity::Warning
            }
            DiscrepancyType::CostMismatch => DiscrepancySeverity::Info,
        }
    }
}

/// One observed difference between local and broker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    #[serde(rename = "type")]
    pub kind: DiscrepancyType,
    pub severity: DiscrepancySeverity,
    pub account_id: String,
    /// None for account-level discrepancies (cash, equity).
    pub symbol: Option<String>,
    pub local_value: Option<Decimal>,
    pub broker_value: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub trigger: RunTrigger,
    pub instance_id: String,
}

/// Outcome of one reconciliation run, published on `reconciliation:result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub run_id: Uuid,
    pub is_clean: bool,
    pub discrepancies: Vec<Discrepancy>,
    pub positions_checked: usize,
    pub duration_ms: u64,
    pub context: RunContext,
}

impl ReconciliationResult {
    pub fn critical_count(&self) -> usize {
        self.discrepancies
            .iter()
            .filter(|d| d.severity == DiscrepancySeverity::Critical)
            .count()
    }
}
