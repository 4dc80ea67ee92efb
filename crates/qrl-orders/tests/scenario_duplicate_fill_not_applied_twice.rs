//! Scenario: the broker emits the same fill_id twice; the second emission
//! is a no-op — one portfolio update, no double-counted quantity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal_macros::dec;

use qrl_broker::{BrokerAdapter, BrokerError, FillCallback};
use qrl_db::stream::MemoryStream;
use qrl_orders::{MemoryOrderStore, MemoryPortfolio, OrderManager};
use qrl_schemas::{
    BrokerAccount, BrokerOrderStatus, BrokerPosition, Fill, Order, OrderKind, OrderStatus, Side,
    Signal,
};

struct AckBroker;

#[async_trait]
impl BrokerAdapter for AckBroker {
    async fn submit_order(&self, _order: &Order) -> Result<String, BrokerError> {
        Ok("B-1".to_string())
    }
    async fn cancel_order(&self, _id: &str) -> Result<bool, BrokerError> {
        Ok(true)
    }
    async fn get_order_status(&self, _id: &str) -> Result<BrokerOrderStatus, BrokerError> {
        Ok(BrokerOrderStatus::Accepted)
    }
    fn subscribe_fills(&self, _callback: FillCallback) {}
    async fn get_positions(&self, _account: &str) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(vec![])
    }
    async fn get_account(&self, _account: &str) -> Result<BrokerAccount, BrokerError> {
        Ok(BrokerAccount {
            account_id: "acct-1".into(),
            cash: dec!(0),
            buying_power: dec!(0),
            margin_used: dec!(0),
            total_equity: dec!(0),
        })
    }
}

fn signal() -> Signal {
    Signal {
        strategy_id: "s1".into(),
        symbol: "AAPL".into(),
        action: Side::Buy,
        quantity: 100,
        order_type: OrderKind::Market,
        limit_price: None,
        client_id: None,
        reason: String::new(),
        timestamp: Utc::now(),
    }
}

fn f1() -> Fill {
    Fill {
        fill_id: "F1".into(),
        broker_order_id: "B-1".into(),
        symbol: "AAPL".into(),
        side: Side::Buy,
        quantity: 100,
        price: dec!(100),
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn duplicate_fill_id_is_dropped() {
    let store = Arc::new(MemoryOrderStore::new());
    let portfolio = Arc::new(MemoryPortfolio::new());
    let mut mgr = OrderManager::new(
        Arc::new(AckBroker),
        Arc::clone(&store) as Arc<dyn qrl_orders::OrderStore>,
        Arc::clone(&portfolio) as Arc<dyn qrl_orders::PortfolioSink>,
        Arc::new(MemoryStream::new()),
        "acct-1",
        Duration::from_secs(5),
    );

    let order = mgr.process_signal(&signal()).await.unwrap();

    mgr.handle_fill(&f1()).await.unwrap();
    mgr.handle_fill(&f1()).await.unwrap(); // same fill_id again

    let stored = store.orders();
    let final_order = stored.iter().find(|o| o.order_id == order.order_id).unwrap();
    assert_eq!(final_order.filled_qty, 100, "duplicate must not double-apply");
    assert_eq!(final_order.status, OrderStatus::Filled);
    assert_eq!(portfolio.fill_count(), 1, "exactly one portfolio update");
}

#[tokio::test]
async fn unknown_broker_order_is_logged_and_dropped() {
    let store = Arc::new(MemoryOrderStore::new());
    let portfolio = Arc::new(MemoryPortfolio::new());
    let mut mgr = OrderManager::new(
        Arc::new(AckBroker),
        Arc::clone(&store) as Arc<dyn qrl_orders::OrderStore>,
        Arc::clone(&portfolio) as Arc<dyn qrl_orders::PortfolioSink>,
        Arc::new(MemoryStream::new()),
        "acct-1",
        Duration::from_secs(5),
    );

    let mut fill = f1();
    fill.broker_order_id = "B-UNKNOWN".into();
    mgr.handle_fill(&fill).await.unwrap();
    assert_eq!(portfolio.fill_count(), 0);
}

#[tokio::test]
async fn strategy_handler_error_never_affects_order_state() {
    let store = Arc::new(MemoryOrderStore::new());
    let portfolio = Arc::new(MemoryPortfolio::new());
    let mut mgr = OrderManager::new(
        Arc::new(AckBroker),
        Arc::clone(&store) as Arc<dyn qrl_orders::OrderStore>,
        Arc::clone(&portfolio) as Arc<dyn qrl_orders::PortfolioSink>,
        Arc::new(MemoryStream::new()),
        "acct-1",
        Duration::from_secs(5),
    );
    mgr.register_fill_handler("s1", Arc::new(|_fill| Err("strategy blew up".to_string())));

    let order = mgr.process_signal(&signal()).await.unwrap();
    mgr.handle_fill(&f1()).await.unwrap();

    let stored = store.orders();
    let final_order = stored.iter().find(|o| o.order_id == order.order_id).unwrap();
    assert_eq!(final_order.status, OrderStatus::Filled);
    assert_eq!(final_order.filled_qty, 100);
}
