//! Persistence seams of the order manager, with the Postgres adapters and
//! the in-memory doubles the scenario tests run on.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use qrl_schemas::{Fill, Order, Side};

/// Order persistence: PENDING insert, submit outcome, fill application.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn persist_new(&self, order: &Order) -> Result<()>;
    async fn update_submit_outcome(&self, order: &Order) -> Result<()>;
    async fn apply_fill(&self, order: &Order, fill: &Fill) -> Result<()>;
    async fn get(&self, order_id: Uuid) -> Result<Option<Order>>;
}

/// The portfolio collaborator's fill entry point.
#[async_trait]
pub trait PortfolioSink: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn record_fill(
        &self,
        account_id: &str,
        symbol: &str,
        side: Side,
        quantity: i64,
        price: Decimal,
        strategy_id: Option<&str>,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Postgres adapters
// ---------------------------------------------------------------------------

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn persist_new(&self, order: &Order) -> Result<()> {
        qrl_db::orders::insert_order(&self.pool, order).await
    }

    async fn update_submit_outcome(&self, order: &Order) -> Result<()> {
        qrl_db::orders::update_submit_outcome(&self.pool, order).await
    }

    async fn apply_fill(&self, order: &Order, fill: &Fill) -> Result<()> {
        qrl_db::orders::apply_fill(&self.pool, order, fill).await
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>> {
        qrl_db::orders::get_order(&self.pool, order_id).await
    }
}

#[async_trait]
impl PortfolioSink for PgPool {
    async fn record_fill(
        &self,
        account_id: &str,
        symbol: &str,
        side: Side,
        quantity: i64,
        price: Decimal,
        strategy_id: Option<&str>,
    ) -> Result<()> {
        qrl_db::positions::record_fill(self, account_id, symbol, side, quantity, price, strategy_id)
            .await
    }
}

// ---------------------------------------------------------------------------
// In-memory doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().expect("order store lock").values().cloned().collect()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn persist_new(&self, order: &Order) -> Result<()> {
        self.orders
            .lock()
            .expect("order store lock")
            .insert(order.order_id, order.clone());
        Ok(())
    }

    async fn update_submit_outcome(&self, order: &Order) -> Result<()> {
        self.orders
            .lock()
            .expect("order store lock")
            .insert(order.order_id, order.clone());
        Ok(())
    }

    async fn apply_fill(&self, order: &Order, _fill: &Fill) -> Result<()> {
        self.orders
            .lock()
            .expect("order store lock")
            .insert(order.order_id, order.clone());
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.lock().expect("order store lock").get(&order_id).cloned())
    }
}

/// Records every `record_fill` call for assertions.
#[derive(Default)]
pub struct MemoryPortfolio {
    pub fills: Mutex<Vec<(String, String, Side, i64, Decimal)>>,
}

impl MemoryPortfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill_count(&self) -> usize {
        self.fills.lock().expect("portfolio lock").len()
    }
}

#[async_trait]
impl PortfolioSink for MemoryPortfolio {
    async fn record_fill(
        &self,
        account_id: &str,
        symbol: &str,
        side: Side,
        quantity: i64,
        price: Decimal,
        _strategy_id: Option<&str>,
    ) -> Result<()> {
        self.fills.lock().expect("portfolio lock").push((
            account_id.to_string(),
            symbol.to_string(),
            side,
            quantity,
            price,
        ));
        Ok(())
    }
}
