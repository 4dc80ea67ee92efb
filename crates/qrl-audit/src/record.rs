use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    System,
    Operator,
    Strategy,
    Reconciler,
    Worker,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::System => "system",
            ActorType::Operator => "operator",
            ActorType::Strategy => "strategy",
            ActorType::Reconciler => "reconciler",
            ActorType::Worker => "worker",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "info",
            AuditSeverity::Warning => "warning",
            AuditSeverity::Critical => "critical",
        }
    }
}

/// How the value columns are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueMode {
    /// Values stored inline (possibly with a computed diff).
    Diff,
    /// Values exceeded the size budget; only `value_hash` is stored.
    Reference,
}

impl ValueMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueMode::Diff => "diff",
            ValueMode::Reference => "reference",
        }
    }
}

/// Write tier. Tier-0 events are written synchronously inside the
/// originating transaction; Tier-1 events may be batched but preserve
/// append order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Critical,
    Standard,
}

/// Event types that must always be written synchronously (Tier-0).
pub const TIER0_EVENT_TYPES: &[&str] = &[
    "trading_halted",
    "kill_switch_activated",
    "mode_force_override",
    "audit_integrity",
];

/// An audit event as submitted by an emitter, before chaining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_type: String,
    pub actor_id: String,
    pub actor_type: ActorType,
    pub resource_type: String,
    pub resource_id: String,
    pub request_id: Option<String>,
    pub source: String,
    pub severity: AuditSeverity,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        event_type: impl Into<String>,
        actor_id: impl Into<String>,
        actor_type: ActorType,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            actor_id: actor_id.into(),
            actor_type,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            request_id: None,
            source: "core".to_string(),
            severity: AuditSeverity::Info,
            old_value: None,
            new_value: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_values(mut self, old: Option<Value>, new: Option<Value>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn tier(&self) -> Tier {
        if TIER0_EVENT_TYPES.contains(&self.event_type.as_str()) {
            Tier::Critical
        } else {
            Tier::Standard
        }
    }
}

/// A fully chained audit row as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainedAuditEvent {
    pub sequence_id: i64,
    pub checksum: String,
    pub prev_checksum: Option<String>,
    pub event_type: String,
    pub actor_id: String,
    pub actor_type: ActorType,
    pub resource_type: String,
    pub resource_id: String,
    pub request_id: Option<String>,
    pub source: String,
    pub severity: AuditSeverity,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub value_mode: ValueMode,
    pub value_hash: Option<String>,
    pub diff: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl ChainedAuditEvent {
    /// The record view used when recomputing the checksum.
    pub fn as_record(&self) -> AuditRecord {
        AuditRecord {
            event_type: self.event_type.clone(),
            actor_id: self.actor_id.clone(),
            actor_type: self.actor_type,
            resource_type: self.resource_type.clone(),
            resource_id: self.resource_id.clone(),
            request_id: self.request_id.clone(),
            source: self.source.clone(),
            severity: self.severity,
            old_value: self.old_value.clone(),
            new_value: self.new_value.clone(),
            created_at: self.created_at,
        }
    }
}
