//! The audit append service.
//!
//! Appends are serialized by an exclusive per-chain lock: read the head
//! `(sequence_id, checksum)`, compute the next checksum, write. Tier-0
//! events go through [`AuditService::append`] synchronously on the caller's
//! path; Tier-1 events may be handed to the batch writer, which drains a
//! bounded queue in arrival order so the chain stays totally ordered.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SubsecRound;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};

use crate::chain::{compute_checksum, verify_chain, ChainVerification};
use crate::diff::{compute_diff, enforce_size_limit};
use crate::record::{AuditRecord, ChainedAuditEvent, ValueMode};
use crate::redact::{redact_sensitive_fields, RedactionRules};

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Persistence seam for the audit chain.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// The last row's `(sequence_id, checksum)`, or `None` on an empty chain.
    async fn chain_head(&self) -> Result<Option<(i64, String)>>;

    async fn insert(&self, event: &ChainedAuditEvent) -> Result<()>;

    /// Rows with `from <= sequence_id <= to`, ascending.
    async fn fetch_range(&self, from: i64, to: i64) -> Result<Vec<ChainedAuditEvent>>;
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct AuditService {
    store: Arc<dyn AuditStore>,
    rules: RedactionRules,
    /// Exclusive per-chain append lock.
    append_lock: Mutex<()>,
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditStore>, rules: RedactionRules) -> Self {
        Self {
            store,
            rules,
            append_lock: Mutex::new(()),
        }
    }

    /// Redact, diff, and size-guard a record's values.
    ///
    /// Returns the prepared record plus `(value_mode, value_hash, diff)`.
    /// The checksum is computed over the prepared (stored) values, so
    /// verification never needs the raw inputs.
    fn prepare(
        &self,
        mut record: AuditRecord,
    ) -> (AuditRecord, ValueMode, Option<String>, Option<serde_json::Value>) {
        // Postgres stores microseconds; hash what the database will return
        // so verification over re-read rows reproduces the checksum.
        record.created_at = record.created_at.trunc_subsecs(6);

        record.old_value =
            redact_sensitive_fields(record.old_value.as_ref(), &record.resource_type, &self.rules);
        record.new_value =
            redact_sensitive_fields(record.new_value.as_ref(), &record.resource_type, &self.rules);

        let diff = compute_diff(record.old_value.as_ref(), record.new_value.as_ref());

        // Size guard: new_value first (it is the value of record on creation),
        // then old_value. Either exceeding the budget switches the row to
        // reference mode.
        let (new_value, new_hash, new_mode) = enforce_size_limit(record.new_value.as_ref());
        let (old_value, old_hash, old_mode) = enforce_size_limit(record.old_value.as_ref());

        record.new_value = new_value;
        record.old_value = old_value;

        if new_mode == ValueMode::Reference {
            (record, ValueMode::Reference, new_hash, diff)
        } else if old_mode == ValueMode::Reference {
            (record, ValueMode::Reference, old_hash, diff)
        } else {
            (record, ValueMode::Diff, None, diff)
        }
    }

    /// Append one event under the chain lock. Used directly for Tier-0
    /// events; the batch writer funnels Tier-1 events here as well.
    pub async fn append(&self, record: AuditRecord) -> Result<ChainedAuditEvent> {
        let (record, value_mode, value_hash, diff) = self.prepare(record);

        let _guard = self.append_lock.lock().await;

        let head = self.store.chain_head().await.context("read chain head")?;
        let (sequence_id, prev_checksum) = match head {
            Some((seq, checksum)) => (seq + 1, Some(checksum)),
            None => (1, None),
        };

        let checksum = compute_checksum(&record, sequence_id, prev_checksum.as_deref());

        let event = ChainedAuditEvent {
            sequence_id,
            checksum,
            prev_checksum,
            event_type: record.event_type,
            actor_id: record.actor_id,
            actor_type: record.actor_type,
            resource_type: record.resource_type,
            resource_id: record.resource_id,
            request_id: record.request_id,
            source: record.source,
            severity: record.severity,
            old_value: record.old_value,
            new_value: record.new_value,
            value_mode,
            value_hash,
            diff,
            created_at: record.created_at,
        };

        self.store.insert(&event).await.context("insert audit event")?;
        Ok(event)
    }

    /// Verify a contiguous sequence range against the store.
    pub async fn verify_range(&self, from: i64, to: i64) -> Result<ChainVerification> {
        let rows = self.store.fetch_range(from, to).await?;
        Ok(verify_chain(&rows))
    }

    /// Verify the newest `window` rows of the chain. Used by the scheduled
    /// integrity sweep; an empty chain verifies trivially.
    pub async fn verify_recent(&self, window: i64) -> Result<ChainVerification> {
        match self.store.chain_head().await? {
            Some((head, _)) => {
                let from = (head - window + 1).max(1);
                self.verify_range(from, head).await
            }
            None => Ok(ChainVerification {
                ok: true,
                errors: Vec::new(),
                rows_checked: 0,
            }),
        }
    }
}

/// Spawn the Tier-1 batch writer. Returns the submission handle; the writer
/// drains in arrival order, so ordering within any actor-resource pair is
/// preserved. A full queue drops the event with an error log — audit Tier-1
/// is best-effort by contract, Tier-0 callers use [`AuditService::append`].
pub fn spawn_batch_writer(
    service: Arc<AuditService>,
    capacity: usize,
) -> mpsc::Sender<AuditRecord> {
    let (tx, mut rx) = mpsc::channel::<AuditRecord>(capacity);
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if let Err(err) = service.append(record).await {
                error!(error = %err, "tier-1 audit append failed");
            }
        }
        warn!("audit batch writer stopped: queue closed");
    });
    tx
}

// ---------------------------------------------------------------------------
// In-memory store (tests, SIMULATE bootstrap)
// ---------------------------------------------------------------------------

/// Store backed by a Vec; rows live as long as the process.
#[derive(Default)]
pub struct MemoryAuditStore {
    rows: std::sync::Mutex<Vec<ChainedAuditEvent>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<ChainedAuditEvent> {
        self.rows.lock().expect("audit store lock").clone()
    }

    /// Test hook: overwrite a stored row in place (tamper simulation).
    pub fn tamper(&self, index: usize, mutate: impl FnOnce(&mut ChainedAuditEvent)) {
        let mut rows = self.rows.lock().expect("audit store lock");
        if let Some(row) = rows.get_mut(index) {
            mutate(row);
        }
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn chain_head(&self) -> Result<Option<(i64, String)>> {
        let rows = self.rows.lock().expect("audit store lock");
        Ok(rows.last().map(|r| (r.sequence_id, r.checksum.clone())))
    }

    async fn insert(&self, event: &ChainedAuditEvent) -> Result<()> {
        let mut rows = self.rows.lock().expect("audit store lock");
        rows.push(event.clone());
        Ok(())
    }

    async fn fetch_range(&self, from: i64, to: i64) -> Result<Vec<ChainedAuditEvent>> {
        let rows = self.rows.lock().expect("audit store lock");
        Ok(rows
            .iter()
            .filter(|r| r.sequence_id >= from && r.sequence_id <= to)
            .cloned()
            .collect())
    }
}
