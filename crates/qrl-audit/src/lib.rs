//! qrl-audit
//!
//! Append-only audit chain with per-row SHA-256 linking.
//!
//! Every row carries `checksum = SHA256(canonical_json(checksum_fields ⊕
//! {sequence_id, prev_checksum}))` and `prev_checksum` equal to the previous
//! row's checksum (null for the first row). Sequence ids are monotonic and
//! gap-free; appends take an exclusive per-chain lock.
//!
//! Before a row is written its values pass through three stages:
//! 1. **Redaction** — sensitive fields masked (`XX****YY`, `****`).
//! 2. **Diffing** — `old_value`/`new_value` produce a flat operation list.
//! 3. **Size guard** — oversized values switch to `reference` mode carrying
//!    only a hash.
//!
//! [`verify_chain`] re-walks any contiguous range and reports every error it
//! finds; it never short-circuits.

mod canonical;
mod chain;
mod diff;
mod record;
mod redact;
mod service;

pub use canonical::{canonical_string, sort_keys};
pub use chain::{compute_checksum, verify_chain, ChainError, ChainVerification};
pub use diff::{compute_diff, enforce_size_limit, MAX_VALUE_SIZE_BYTES};
pub use record::{
    ActorType, AuditRecord, AuditSeverity, ChainedAuditEvent, Tier, ValueMode, TIER0_EVENT_TYPES,
};
pub use redact::{mask_string, redact_sensitive_fields, RedactionRules};
pub use service::{spawn_batch_writer, AuditService, AuditStore, MemoryAuditStore};
