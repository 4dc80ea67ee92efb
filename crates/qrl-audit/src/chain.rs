//! Checksum computation and full-range chain verification.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::canonical::{canonical_string, serialize_value};
use crate::record::{AuditRecord, ChainedAuditEvent};

/// Fields folded into the checksum, in their canonical names.
/// `sequence_id` and `prev_checksum` are appended by [`compute_checksum`].
const CHECKSUM_FIELDS: &[&str] = &[
    "event_type",
    "actor_id",
    "actor_type",
    "resource_type",
    "resource_id",
    "request_id",
    "source",
    "severity",
    "old_value",
    "new_value",
    "created_at",
];

/// Compute the SHA-256 checksum for a record at a given chain position.
pub fn compute_checksum(record: &AuditRecord, sequence_id: i64, prev_checksum: Option<&str>) -> String {
    let record_json = serde_json::to_value(record).expect("audit record serializes");

    let mut content = Map::new();
    for field in CHECKSUM_FIELDS {
        let value = record_json.get(*field).cloned().unwrap_or(Value::Null);
        content.insert((*field).to_string(), serialize_value(&value));
    }
    content.insert("sequence_id".to_string(), Value::from(sequence_id));
    content.insert(
        "prev_checksum".to_string(),
        match prev_checksum {
            Some(c) => Value::String(c.to_string()),
            None => Value::Null,
        },
    );

    let canonical = canonical_string(&Value::Object(content));
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// A single verification failure, anchored to the row where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainError {
    pub sequence_id: i64,
    pub reason: String,
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sequence_id={}: {}", self.sequence_id, self.reason)
    }
}

/// Outcome of [`verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub ok: bool,
    pub errors: Vec<ChainError>,
    pub rows_checked: usize,
}

/// Verify a contiguous, ascending-ordered range of audit rows.
///
/// The range may start anywhere in the chain. Checks, for every row:
/// - the chain's genesis row (`sequence_id == 1`) has a null `prev_checksum`
/// - `sequence_id` strictly increases
/// - `prev_checksum` equals the previous row's `checksum`
/// - the stored checksum equals the recomputed one
///
/// All errors are collected; verification never short-circuits.
pub fn verify_chain(events: &[ChainedAuditEvent]) -> ChainVerification {
    let mut errors: Vec<ChainError> = Vec::new();
    let mut prev_sequence_id: Option<i64> = None;
    let mut prev_checksum: Option<String> = None;

    for (i, event) in events.iter().enumerate() {
        if event.sequence_id == 1 && event.prev_checksum.is_some() {
            errors.push(ChainError {
                sequence_id: event.sequence_id,
                reason: format!(
                    "genesis row must have null prev_checksum, got {:?}",
                    event.prev_checksum
                ),
            });
        }

        if let Some(prev_seq) = prev_sequence_id {
            if event.sequence_id <= prev_seq {
                errors.push(ChainError {
                    sequence_id: event.sequence_id,
                    reason: format!(
                        "sequence not monotonically increasing: {} <= {}",
                        event.sequence_id, prev_seq
                    ),
                });
            }
        }

        if i > 0 && event.prev_checksum != prev_checksum {
            errors.push(ChainError {
                sequence_id: event.sequence_id,
                reason: format!(
                    "chain broken: prev_checksum={:?} does not match previous row's checksum={:?}",
                    event.prev_checksum, prev_checksum
                ),
            });
        }

        let recomputed = compute_checksum(
            &event.as_record(),
            event.sequence_id,
            event.prev_checksum.as_deref(),
        );
        if event.checksum != recomputed {
            errors.push(ChainError {
                sequence_id: event.sequence_id,
                reason: format!(
                    "checksum mismatch: stored={}, recomputed={}",
                    event.checksum, recomputed
                ),
            });
        }

        prev_sequence_id = Some(event.sequence_id);
        prev_checksum = Some(event.checksum.clone());
    }

    ChainVerification {
        ok: errors.is_empty(),
        errors,
        rows_checked: events.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ActorType, AuditSeverity, ValueMode};
    use chrono::Utc;
    use serde_json::json;

    fn chained(seq: i64, prev: Option<&str>, new_value: Value) -> ChainedAuditEvent {
        let record = AuditRecord {
            event_type: "order_filled".into(),
            actor_id: "system".into(),
            actor_type: ActorType::System,
            resource_type: "order".into(),
            resource_id: format!("o-{seq}"),
            request_id: None,
            source: "core".into(),
            severity: AuditSeverity::Info,
            old_value: None,
            new_value: Some(new_value),
            created_at: Utc::now(),
        };
        let checksum = compute_checksum(&record, seq, prev);
        ChainedAuditEvent {
            sequence_id: seq,
            checksum,
            prev_checksum: prev.map(str::to_string),
            event_type: record.event_type.clone(),
            actor_id: record.actor_id.clone(),
            actor_type: record.actor_type,
            resource_type: record.resource_type.clone(),
            resource_id: record.resource_id.clone(),
            request_id: None,
            source: record.source.clone(),
            severity: record.severity,
            old_value: None,
            new_value: record.new_value.clone(),
            value_mode: ValueMode::Diff,
            value_hash: None,
            diff: None,
            created_at: record.created_at,
        }
    }

    fn chain_of_three() -> Vec<ChainedAuditEvent> {
        let e1 = chained(1, None, json!({"filled_qty": 40}));
        let e2 = chained(2, Some(&e1.checksum), json!({"filled_qty": 100}));
        let e3 = chained(3, Some(&e2.checksum), json!({"status": "filled"}));
        vec![e1, e2, e3]
    }

    #[test]
    fn intact_chain_verifies() {
        let result = verify_chain(&chain_of_three());
        assert!(result.ok, "errors: {:?}", result.errors);
        assert_eq!(result.rows_checked, 3);
    }

    #[test]
    fn empty_range_is_valid() {
        assert!(verify_chain(&[]).ok);
    }

    #[test]
    fn mid_chain_range_verifies_without_genesis() {
        let events = chain_of_three();
        // Rows 2..3 form a valid contiguous range even though the first row
        // in the slice carries a non-null prev_checksum.
        let result = verify_chain(&events[1..]);
        assert!(result.ok, "errors: {:?}", result.errors);
        assert_eq!(result.rows_checked, 2);
    }

    #[test]
    fn mutated_value_is_detected_at_its_row() {
        let mut events = chain_of_three();
        events[1].new_value = Some(json!({"filled_qty": 999}));

        let result = verify_chain(&events);
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.sequence_id == 2));
    }

    #[test]
    fn broken_link_is_detected() {
        let mut events = chain_of_three();
        events[2].prev_checksum = Some("deadbeef".into());

        let result = verify_chain(&events);
        assert!(!result.ok);
        // Both the link and the recomputed checksum of row 3 fail.
        assert!(result.errors.iter().all(|e| e.sequence_id == 3));
        assert!(result.errors.len() >= 1);
    }

    #[test]
    fn non_monotonic_sequence_is_detected() {
        let mut events = chain_of_three();
        events[2].sequence_id = 2;

        let result = verify_chain(&events);
        assert!(!result.ok);
        assert!(result
            .errors
            .iter()
            .any(|e| e.reason.contains("monotonically")));
    }

    #[test]
    fn all_errors_are_reported_not_just_the_first() {
        let mut events = chain_of_three();
        events[0].prev_checksum = Some("bogus".into());
        events[1].new_value = Some(json!({"tampered": true}));

        let result = verify_chain(&events);
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.sequence_id == 1));
        assert!(result.errors.iter().any(|e| e.sequence_id == 2));
    }
}
