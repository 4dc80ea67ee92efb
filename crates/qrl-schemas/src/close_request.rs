use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseRequestStatus {
    Pending,
    Submitted,
    Completed,
    Failed,
}

impl CloseRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseRequestStatus::Pending => "pending",
            CloseRequestStatus::Submitted => "submitted",
            CloseRequestStatus::Completed => "completed",
            CloseRequestStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CloseRequestStatus::Completed | CloseRequestStatus::Failed)
    }
}

/// An explicit intent to exit a position.
///
/// `(position_id, idempotency_key)` is unique: replaying a close with the
/// same key returns the existing request instead of creating a duplicate.
/// `remaining_qty` is a stored generated column in the database; the
/// accessor here recomputes it, and a divergence between the two on read is
/// treated as corruption by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseRequest {
    pub id: Uuid,
    pub position_id: i64,
    pub idempotency_key: String,
    pub status: CloseRequestStatus,
    pub symbol: String,
    pub side: Side,
    pub target_qty: i64,
    pub filled_qty: i64,
    pub retry_count: i32,
    pub max_retries: i32,
    /// Operator-supplied reason for the close, if one was given.
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CloseRequest {
    pub fn remaining_qty(&self) -> i64 {
        self.target_qty - self.filled_qty
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}
