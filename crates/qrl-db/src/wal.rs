//! In-memory WAL buffer for degraded-database operation.
//!
//! When the database is unreachable, mutating core operations append an
//! entry keyed by an idempotent key. On recovery, entries replay in
//! creation order, each inside its own transaction, deduplicated through
//! the idempotency store. Caps by count, bytes, and age force a `halt`
//! mode transition when exceeded — the buffer protects against a blip, not
//! an outage.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Limits beyond which the buffer reports overflow.
#[derive(Debug, Clone)]
pub struct WalCaps {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub max_age: Duration,
}

impl WalCaps {
    pub fn new(max_entries: usize, max_bytes: usize, max_age_secs: u64) -> Self {
        Self {
            max_entries,
            max_bytes,
            max_age: Duration::seconds(max_age_secs as i64),
        }
    }
}

/// One buffered intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub idempotent_key: String,
    pub resource_type: String,
    pub resource_id: String,
    pub old_state: Option<serde_json::Value>,
    pub new_state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl WalEntry {
    fn byte_size(&self) -> usize {
        self.new_state.to_string().len()
            + self.old_state.as_ref().map(|v| v.to_string().len()).unwrap_or(0)
            + self.idempotent_key.len()
            + self.resource_type.len()
            + self.resource_id.len()
    }
}

/// Why the buffer overflowed; carried into the halt-mode transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalOverflow {
    Entries,
    Bytes,
    Age,
}

/// The buffer itself. Single-owner: lives behind the degradation service's
/// lock; no interior synchronization.
#[derive(Debug)]
pub struct WalBuffer {
    caps: WalCaps,
    entries: VecDeque<WalEntry>,
    bytes: usize,
}

impl WalBuffer {
    pub fn new(caps: WalCaps) -> Self {
        Self {
            caps,
            entries: VecDeque::new(),
            bytes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Append an entry. Duplicate idempotent keys are dropped (the original
    /// intent already buffered). Returns the overflow kind when a cap is
    /// exceeded after the append — callers must transition to `halt`.
    pub fn append(&mut self, entry: WalEntry, now: DateTime<Utc>) -> Option<WalOverflow> {
        if self
            .entries
            .iter()
            .any(|e| e.idempotent_key == entry.idempotent_key)
        {
            return self.check_caps(now);
        }
        self.bytes += entry.byte_size();
        self.entries.push_back(entry);
        self.check_caps(now)
    }

    fn check_caps(&self, now: DateTime<Utc>) -> Option<WalOverflow> {
        if self.entries.len() > self.caps.max_entries {
            return Some(WalOverflow::Entries);
        }
        if self.bytes > self.caps.max_bytes {
            return Some(WalOverflow::Bytes);
        }
        if let Some(oldest) = self.entries.front() {
            if now - oldest.created_at > self.caps.max_age {
                return Some(WalOverflow::Age);
            }
        }
        None
    }

    /// Drain entries in creation order for replay. The caller replays each
    /// inside its own transaction, idempotent by `idempotent_key`, and calls
    /// [`WalBuffer::requeue_front`] for any entry whose replay failed.
    pub fn drain(&mut self) -> Vec<WalEntry> {
        self.bytes = 0;
        self.entries.drain(..).collect()
    }

    /// Put a failed entry back at the front, preserving replay order.
    pub fn requeue_front(&mut self, entry: WalEntry) {
        self.bytes += entry.byte_size();
        self.entries.push_front(entry);
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Applies one buffered intent to the recovered database. Each call runs in
/// its own transaction on the implementor's side.
#[async_trait::async_trait]
pub trait WalReplayHandler: Send + Sync {
    /// True when the entry's idempotent key has already been applied.
    async fn already_applied(&self, idempotent_key: &str) -> anyhow::Result<bool>;

    /// Apply the entry and record its idempotent key, atomically.
    async fn apply(&self, entry: &WalEntry) -> anyhow::Result<()>;
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub applied: usize,
    pub skipped: usize,
    /// Entries left in the buffer because a replay failed mid-stream.
    pub remaining: usize,
}

/// Drain the buffer in creation order through the handler.
///
/// A failing entry is requeued at the front along with everything after it;
/// replay stops there so ordering is preserved for the next attempt.
pub async fn replay(
    wal: &mut WalBuffer,
    handler: &dyn WalReplayHandler,
) -> anyhow::Result<ReplayOutcome> {
    let mut outcome = ReplayOutcome::default();
    let mut pending = wal.drain();

    while !pending.is_empty() {
        let entry = pending.remove(0);
        if handler.already_applied(&entry.idempotent_key).await? {
            outcome.skipped += 1;
            continue;
        }
        match handler.apply(&entry).await {
            Ok(()) => outcome.applied += 1,
            Err(err) => {
                tracing::warn!(
                    key = %entry.idempotent_key,
                    error = %err,
                    "WAL replay failed; requeueing"
                );
                // Restore order: failed entry first, then the untouched tail.
                for later in pending.drain(..).rev() {
                    wal.requeue_front(later);
                }
                wal.requeue_front(entry);
                outcome.remaining = wal.len();
                return Ok(outcome);
            }
        }
    }
    Ok(outcome)
}
