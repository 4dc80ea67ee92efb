//! qrl-broker
//!
//! The broker and market-data seams of the core, plus the deterministic
//! paper broker that backs `TRADE_ENV=SIMULATE` and the test suites.
//!
//! Fill delivery contract: `subscribe_fills` registers a callback that MAY
//! run on a thread foreign to the scheduler. Consumers must route fills
//! through a cross-thread submission primitive (see `qrl-orders`) and never
//! mutate shared state inside the callback.

mod adapter;
mod market;
mod paper;

pub use adapter::{BrokerAdapter, BrokerError, FillCallback};
pub use market::{MarketData, MarketDataError};
pub use paper::{PaperBroker, PaperBrokerConfig, PaperMarketData};
