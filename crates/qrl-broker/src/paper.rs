//! Deterministic paper broker.
//!
//! No randomness, no network. Orders are acknowledged immediately with
//! counter-derived ids and filled at the configured mark price. Knobs exist
//! to exercise the hard paths of the order manager: fills split into
//! partials, duplicate fill emission, delivery from a foreign thread, and
//! forced rejections.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use qrl_schemas::{
    BrokerAccount, BrokerOrderStatus, BrokerPosition, Fill, Order, Quote,
};

use crate::adapter::{BrokerAdapter, BrokerError, FillCallback};
use crate::market::{MarketData, MarketDataError};

#[derive(Debug, Clone)]
pub struct PaperBrokerConfig {
    /// Fill price per symbol; orders on unknown symbols are rejected.
    pub marks: BTreeMap<String, Decimal>,
    /// Split fills into (qty, qty) pairs when the order is large enough.
    pub partial_fill_split: Option<i64>,
    /// Emit every fill twice with the same fill_id (duplicate injection).
    pub duplicate_fills: bool,
    /// Deliver fills from a spawned OS thread instead of the caller's task.
    pub foreign_thread_fills: bool,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            marks: BTreeMap::new(),
            partial_fill_split: None,
            duplicate_fills: false,
            foreign_thread_fills: false,
        }
    }
}

/// Running counters for deterministic ids.
pub struct PaperBroker {
    config: Mutex<PaperBrokerConfig>,
    next_order_id: AtomicU64,
    next_fill_id: AtomicU64,
    callback: Mutex<Option<FillCallback>>,
    /// broker_order_id → last reported status.
    statuses: Mutex<BTreeMap<String, BrokerOrderStatus>>,
    positions: Mutex<Vec<BrokerPosition>>,
    account: Mutex<BrokerAccount>,
}

impl PaperBroker {
    pub fn new(config: PaperBrokerConfig) -> Self {
        Self {
            config: Mutex::new(config),
            next_order_id: AtomicU64::new(1),
            next_fill_id: AtomicU64::new(1),
            callback: Mutex::new(None),
            statuses: Mutex::new(BTreeMap::new()),
            positions: Mutex::new(Vec::new()),
            account: Mutex::new(BrokerAccount {
                account_id: "paper".to_string(),
                cash: Decimal::from(100_000),
                buying_power: Decimal::from(100_000),
                margin_used: Decimal::ZERO,
                total_equity: Decimal::from(100_000),
            }),
        }
    }

    pub fn set_mark(&self, symbol: &str, price: Decimal) {
        self.config
            .lock()
            .expect("paper config lock")
            .marks
            .insert(symbol.to_string(), price);
    }

    pub fn set_positions(&self, positions: Vec<BrokerPosition>) {
        *self.positions.lock().expect("paper positions lock") = positions;
    }

    pub fn set_account(&self, account: BrokerAccount) {
        *self.account.lock().expect("paper account lock") = account;
    }

    /// Test hook: deliver an arbitrary fill through the registered callback.
    pub fn inject_fill(&self, fill: Fill) {
        self.deliver(fill);
    }

    fn deliver(&self, fill: Fill) {
        let callback = self.callback.lock().expect("paper callback lock").clone();
        let Some(callback) = callback else { return };

        let foreign = self
            .config
            .lock()
            .expect("paper config lock")
            .foreign_thread_fills;
        if foreign {
            // Exercise the cross-thread ingress path the way a vendor SDK
            // would: invoke from a thread the scheduler does not own.
            let handle = std::thread::spawn(move || callback(fill));
            let _ = handle.join();
        } else {
            callback(fill);
        }
    }

    fn fills_for(&self, order: &Order, broker_order_id: &str, mark: Decimal) -> Vec<Fill> {
        let split = self.config.lock().expect("paper config lock").partial_fill_split;
        let mut parts: Vec<i64> = Vec::new();
        match split {
            Some(first) if order.quantity > first => {
                parts.push(first);
                parts.push(order.quantity - first);
            }
            _ => parts.push(order.quantity),
        }

        parts
            .into_iter()
            .map(|qty| Fill {
                fill_id: format!("FILL-{:06}", self.next_fill_id.fetch_add(1, Ordering::SeqCst)),
                broker_order_id: broker_order_id.to_string(),
                symbol: order.symbol.clone(),
                side: order.side,
                quantity: qty,
                price: mark,
                timestamp: Utc::now(),
            })
            .collect()
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new(PaperBrokerConfig::default())
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    async fn submit_order(&self, order: &Order) -> Result<String, BrokerError> {
        let mark = {
            let cfg = self.config.lock().expect("paper config lock");
            cfg.marks.get(&order.symbol).copied()
        };
        let Some(mark) = mark else {
            return Err(BrokerError::Rejected {
                reason: format!("no market for {}", order.symbol),
            });
        };

        let broker_order_id =
            format!("ORD-{:06}", self.next_order_id.fetch_add(1, Ordering::SeqCst));
        self.statuses
            .lock()
            .expect("paper statuses lock")
            .insert(broker_order_id.clone(), BrokerOrderStatus::Filled);

        let fills = self.fills_for(order, &broker_order_id, mark);
        let duplicate = self.config.lock().expect("paper config lock").duplicate_fills;
        for fill in fills {
            self.deliver(fill.clone());
            if duplicate {
                self.deliver(fill);
            }
        }

        Ok(broker_order_id)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<bool, BrokerError> {
        let mut statuses = self.statuses.lock().expect("paper statuses lock");
        match statuses.get(broker_order_id) {
            Some(BrokerOrderStatus::Filled) => Ok(false),
            Some(_) => {
                statuses.insert(broker_order_id.to_string(), BrokerOrderStatus::Cancelled);
                Ok(true)
            }
            None => Err(BrokerError::Rejected {
                reason: format!("unknown order {broker_order_id}"),
            }),
        }
    }

    async fn get_order_status(
        &self,
        broker_order_id: &str,
    ) -> Result<BrokerOrderStatus, BrokerError> {
        Ok(self
            .statuses
            .lock()
            .expect("paper statuses lock")
            .get(broker_order_id)
            .cloned()
            .unwrap_or(BrokerOrderStatus::NotFound))
    }

    fn subscribe_fills(&self, callback: FillCallback) {
        *self.callback.lock().expect("paper callback lock") = Some(callback);
    }

    async fn get_positions(&self, _account_id: &str) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.positions.lock().expect("paper positions lock").clone())
    }

    async fn get_account(&self, _account_id: &str) -> Result<BrokerAccount, BrokerError> {
        Ok(self.account.lock().expect("paper account lock").clone())
    }
}

/// Quote source derived from the paper broker's marks: bid/ask straddle the
/// mark by ±0.05%.
pub struct PaperMarketData {
    marks: Mutex<BTreeMap<String, Quote>>,
}

impl PaperMarketData {
    pub fn new() -> Self {
        Self {
            marks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_quote(&self, quote: Quote) {
        self.marks
            .lock()
            .expect("paper md lock")
            .insert(quote.symbol.clone(), quote);
    }

    pub fn set_mark(&self, symbol: &str, mark: Decimal) {
        let half_spread = mark * Decimal::new(5, 4); // 0.05%
        self.set_quote(Quote {
            symbol: symbol.to_string(),
            bid: mark - half_spread,
            ask: mark + half_spread,
            last: mark,
            timestamp: Utc::now(),
        });
    }
}

impl Default for PaperMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketData for PaperMarketData {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        self.marks
            .lock()
            .expect("paper md lock")
            .get(symbol)
            .cloned()
            .ok_or_else(|| MarketDataError::Unavailable {
                symbol: symbol.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrl_schemas::{OrderKind, Side, Signal};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn order(symbol: &str, qty: i64) -> Order {
        let signal = Signal {
            strategy_id: "s1".into(),
            symbol: symbol.into(),
            action: Side::Buy,
            quantity: qty,
            order_type: OrderKind::Market,
            limit_price: None,
            client_id: None,
            reason: String::new(),
            timestamp: Utc::now(),
        };
        Order::from_signal(&signal, Uuid::new_v4(), "paper")
    }

    #[tokio::test]
    async fn submit_fills_at_mark() {
        let broker = PaperBroker::default();
        broker.set_mark("AAPL", dec!(100));

        let fills: Arc<Mutex<Vec<Fill>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fills);
        broker.subscribe_fills(Arc::new(move |f| sink.lock().unwrap().push(f)));

        let id = broker.submit_order(&order("AAPL", 100)).await.unwrap();
        assert_eq!(id, "ORD-000001");

        let fills = fills.lock().unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].quantity, 100);
        assert_eq!(fills[0].price, dec!(100));
    }

    #[tokio::test]
    async fn partial_split_emits_two_fills() {
        let broker = PaperBroker::new(PaperBrokerConfig {
            partial_fill_split: Some(40),
            ..PaperBrokerConfig::default()
        });
        broker.set_mark("AAPL", dec!(100));

        let fills: Arc<Mutex<Vec<Fill>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fills);
        broker.subscribe_fills(Arc::new(move |f| sink.lock().unwrap().push(f)));

        broker.submit_order(&order("AAPL", 100)).await.unwrap();
        let fills = fills.lock().unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].quantity, 40);
        assert_eq!(fills[1].quantity, 60);
        assert_ne!(fills[0].fill_id, fills[1].fill_id);
    }

    #[tokio::test]
    async fn duplicate_injection_repeats_fill_ids() {
        let broker = PaperBroker::new(PaperBrokerConfig {
            duplicate_fills: true,
            ..PaperBrokerConfig::default()
        });
        broker.set_mark("AAPL", dec!(100));

        let fills: Arc<Mutex<Vec<Fill>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fills);
        broker.subscribe_fills(Arc::new(move |f| sink.lock().unwrap().push(f)));

        broker.submit_order(&order("AAPL", 100)).await.unwrap();
        let fills = fills.lock().unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].fill_id, fills[1].fill_id);
    }

    #[tokio::test]
    async fn unknown_symbol_is_rejected() {
        let broker = PaperBroker::default();
        let err = broker.submit_order(&order("ZZZZ", 1)).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn cancel_of_filled_order_returns_false() {
        let broker = PaperBroker::default();
        broker.set_mark("AAPL", dec!(100));
        broker.subscribe_fills(Arc::new(|_| {}));
        let id = broker.submit_order(&order("AAPL", 1)).await.unwrap();
        assert!(!broker.cancel_order(&id).await.unwrap());
    }
}
