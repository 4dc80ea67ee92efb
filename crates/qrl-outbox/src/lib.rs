//! qrl-outbox
//!
//! Transactional outbound messaging. The close-position write path commits
//! the state change and the outbox row in one transaction; worker tasks
//! claim pending rows with `FOR UPDATE SKIP LOCKED`, call the broker, and
//! mark each row complete, retryable, or failed. A separate cleaner deletes
//! terminal rows past retention while preserving `pending`/`processing`
//! regardless of age.
//!
//! Ordering note: the enqueue discipline allows at most one active close
//! request per position (single writer per resource), so claim order per
//! resource is total even with multiple workers.

mod access;
mod close_flow;
mod pricing;
mod worker;

pub use access::{
    CloseAccess, MemoryCloseAccess, MemoryOutboxAccess, OutboxAccess, PgCloseAccess,
    PgOutboxAccess,
};
pub use close_flow::{close_position, ClosePositionError, ClosePositionResponse};
pub use pricing::{compute_limit_price, PricingError};
pub use worker::{
    run_outbox_cleaner, run_outbox_worker, OrderSubmitter, OutboxWorker, SubmitOutcome,
};
