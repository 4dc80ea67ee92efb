//! qrl-orders
//!
//! The order lifecycle manager: approved signals become PENDING orders,
//! broker submits move them to SUBMITTED or REJECTED, and fills walk them
//! through PARTIAL_FILL to FILLED with volume-weighted average pricing.
//!
//! Concurrency contract: the manager's in-memory indices (`active_orders`,
//! `broker_id_map`, `processed_fills`) are mutated only by the task that
//! owns the manager. Broker adapters delivering fills from foreign threads
//! hand them off through [`FillIngress`], the single cross-thread
//! submission primitive; no locks guard the indices because nothing else
//! touches them.

mod ingress;
mod manager;
mod store;

pub use ingress::{FillIngress, FillReceiver, IngressStats};
pub use manager::{run_order_manager, OrderCommand, OrderError, OrderManager, OrderManagerHandle};
pub use store::{MemoryOrderStore, MemoryPortfolio, OrderStore, PgOrderStore, PortfolioSink};
