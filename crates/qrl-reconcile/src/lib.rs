//! qrl-reconcile
//!
//! Periodic diff of local state against the broker. Position and account
//! comparison is pure ([`compare_positions`], [`compare_account`]); the
//! service wraps it with snapshot fetching, zombie-order detection, the
//! advisory-lock singleton guard, and result emission on the
//! `reconciliation:result` / `reconciliation:discrepancy` channels.

mod comparator;
mod service;
mod types;
mod zombie;

pub use comparator::{compare_account, compare_positions};
pub use service::{
    LockProvider, NoopLock, PgAdvisoryLock, PortfolioView, ReconcileService, RECONCILE_LOCK_NAME,
};
pub use types::{
    Discrepancy, DiscrepancySeverity, DiscrepancyType, ReconciliationResult, RunContext,
    RunTrigger,
};
pub use zombie::{ZombieOrderAccess, ZombieSweepOutcome};
