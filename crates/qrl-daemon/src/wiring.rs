//! Adapters that join the domain crates together at startup.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use qrl_broker::BrokerAdapter;
use qrl_orders::OrderManagerHandle;
use qrl_outbox::{OrderSubmitter, SubmitOutcome};
use qrl_reconcile::PortfolioView;
use qrl_schemas::{OrderKind, OrderStatus, Position, Side, Signal};

use crate::ports::EmergencyActions;

// ---------------------------------------------------------------------------
// Outbox → order manager
// ---------------------------------------------------------------------------

/// Close orders from the outbox worker enter the same lifecycle manager as
/// signal-driven orders; the close request id rides along for provenance.
pub struct OrderManagerSubmitter {
    handle: OrderManagerHandle,
}

impl OrderManagerSubmitter {
    pub fn new(handle: OrderManagerHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl OrderSubmitter for OrderManagerSubmitter {
    async fn submit_close_order(
        &self,
        symbol: &str,
        side: Side,
        qty: i64,
        limit_price: Decimal,
        close_request_id: Uuid,
    ) -> Result<SubmitOutcome> {
        let signal = Signal {
            strategy_id: "close-flow".to_string(),
            symbol: symbol.to_string(),
            action: side,
            quantity: qty,
            order_type: OrderKind::Limit,
            limit_price: Some(limit_price),
            // The close request id keys signal idempotency: a worker retry
            // after a partial failure reuses the same order.
            client_id: Some(close_request_id.to_string()),
            reason: "position close".to_string(),
            timestamp: Utc::now(),
        };

        let order = self
            .handle
            .process_signal_for_close(signal, Some(close_request_id))
            .await?;

        Ok(SubmitOutcome {
            order_id: order.order_id,
            rejected: order.status == OrderStatus::Rejected,
            error_message: order.error_message,
        })
    }
}

// ---------------------------------------------------------------------------
// Reconciler → portfolio store
// ---------------------------------------------------------------------------

pub struct PgPortfolioView {
    pool: sqlx::PgPool,
    account_id: String,
}

impl PgPortfolioView {
    pub fn new(pool: sqlx::PgPool, account_id: impl Into<String>) -> Self {
        Self {
            pool,
            account_id: account_id.into(),
        }
    }
}

#[async_trait]
impl PortfolioView for PgPortfolioView {
    async fn local_positions(&self) -> Result<Vec<Position>> {
        qrl_db::positions::open_positions(&self.pool, &self.account_id).await
    }

    async fn local_account(&self) -> Result<(Decimal, Decimal)> {
        let snapshot = qrl_db::positions::snapshot(&self.pool, &self.account_id).await?;
        Ok((snapshot.cash, snapshot.equity))
    }
}

// ---------------------------------------------------------------------------
// Kill switch → broker + close flow
// ---------------------------------------------------------------------------

pub struct BrokerEmergency<B: BrokerAdapter> {
    pool: sqlx::PgPool,
    broker: Arc<B>,
    account_id: String,
    close_max_retries: i32,
}

impl<B: BrokerAdapter> BrokerEmergency<B> {
    pub fn new(
        pool: sqlx::PgPool,
        broker: Arc<B>,
        account_id: impl Into<String>,
        close_max_retries: i32,
    ) -> Self {
        Self {
            pool,
            broker,
            account_id: account_id.into(),
            close_max_retries,
        }
    }
}

#[async_trait]
impl<B: BrokerAdapter> EmergencyActions for BrokerEmergency<B> {
    async fn cancel_all_orders(&self) -> Result<usize> {
        let orders = qrl_db::orders::active_orders(&self.pool).await?;
        let mut cancelled = 0;
        for order in orders {
            let Some(broker_order_id) = &order.broker_order_id else {
                continue;
            };
            match self.broker.cancel_order(broker_order_id).await {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(order_id = %order.order_id, error = %err, "cancel failed during kill switch")
                }
            }
        }
        Ok(cancelled)
    }

    async fn flatten_all_positions(&self) -> Result<usize> {
        let positions = qrl_db::positions::open_positions(&self.pool, &self.account_id).await?;
        let mut flattened = 0;
        for position in positions {
            if position.quantity == 0 || position.status.has_active_close() {
                continue;
            }
            // One deterministic key per position per day keeps the flatten
            // idempotent across repeated kill-switch invocations.
            let key = format!(
                "kill-switch:{}:{}",
                position.id,
                Utc::now().date_naive()
            );
            match qrl_outbox::close_position(
                &self.pool,
                position.id,
                &key,
                Some("kill switch flatten"),
                self.close_max_retries,
            )
            .await
            {
                Ok(_) => flattened += 1,
                Err(qrl_outbox::ClosePositionError::AlreadyClosing(_)) => {}
                Err(err) => {
                    warn!(position_id = position.id, error = %err, "flatten failed during kill switch")
                }
            }
        }
        Ok(flattened)
    }
}
