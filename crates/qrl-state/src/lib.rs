//! qrl-state
//!
//! The two orthogonal finite state machines that gate every action in the
//! core, plus their supporting pieces:
//!
//! - [`TradingStateManager`] — the operator-facing FSM over
//!   `RUNNING | PAUSED | HALTED`. HALTED is sticky: `resume` succeeds only
//!   after an explicit `enable_resume`.
//! - [`ModeMachine`] — the health-driven degradation FSM over
//!   `normal … halt`. Transitions are hysteresis-driven; operator
//!   force-overrides carry a TTL.
//! - [`permission`] — the per-action permission table derived from the
//!   current mode.
//! - [`StateBus`] — bounded, non-blocking transition notification bus.
//! - [`StalenessCache`] — dual-timestamp cache backing `local_only`
//!   decisions in `safe_mode_disconnected`.
//!
//! All transition logic is pure and deterministic: the clock is always an
//! argument, never read inside.

mod bus;
mod cache;
mod mode;
mod permissions;
mod trading;

pub use bus::{BusReceiver, BusStats, StateBus, StateEvent};
pub use cache::{CachedEntry, StalenessCache};
pub use mode::{
    FailureSource, ModeMachine, ModeTransition, SystemMode, TransitionCause,
};
pub use permissions::{permission, ActionType, Permission};
pub use trading::{TradingState, TradingStateManager, TradingStateValue};
