//! qrl-daemon
//!
//! The HTTP/JSON surface and service wiring of the quantrail core. All
//! singleton-shaped services (audit, alerts, trading state, degradation
//! mode) are explicitly constructed at startup and injected into handlers
//! through [`state::AppState`]; nothing is a process global.
//!
//! `build_router` is the single router entry point; `main.rs` attaches
//! middleware. Handlers stay `pub(crate)` so the scenario tests in `tests/`
//! compose the bare router.

pub mod api_types;
pub mod health;
pub mod ports;
pub mod routes;
pub mod state;
pub mod sweeps;
pub mod wiring;
