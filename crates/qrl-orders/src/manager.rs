//! The order lifecycle manager and its task driver.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use qrl_broker::{BrokerAdapter, BrokerError};
use qrl_db::stream::EventStream;
use qrl_schemas::{channels, Fill, Order, OrderStatus, Signal};

use crate::ingress::FillReceiver;
use crate::store::{OrderStore, PortfolioSink};

/// Best-effort per-strategy fill notification.
pub type StrategyFillHandler = Arc<dyn Fn(&Fill) -> Result<(), String> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("order store failure: {0}")]
    Store(#[from] anyhow::Error),

    #[error("order manager is not running")]
    NotRunning,
}

/// Manages order lifecycle from signal to fill. Owned and mutated by a
/// single task; see the crate docs for the threading contract.
pub struct OrderManager<B: BrokerAdapter> {
    broker: Arc<B>,
    store: Arc<dyn OrderStore>,
    portfolio: Arc<dyn PortfolioSink>,
    stream: Arc<dyn EventStream>,
    account_id: String,
    broker_timeout: Duration,

    active_orders: HashMap<Uuid, Order>,
    /// broker_order_id → client order id.
    broker_id_map: HashMap<String, Uuid>,
    /// Idempotency: every applied fill_id, forever (per process lifetime).
    processed_fills: HashSet<String>,
    /// Signal idempotency key → order id (replay returns the same order).
    signal_keys: HashMap<String, Uuid>,
    fill_handlers: HashMap<String, StrategyFillHandler>,
}

impl<B: BrokerAdapter> OrderManager<B> {
    pub fn new(
        broker: Arc<B>,
        store: Arc<dyn OrderStore>,
        portfolio: Arc<dyn PortfolioSink>,
        stream: Arc<dyn EventStream>,
        account_id: impl Into<String>,
        broker_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            store,
            portfolio,
            stream,
            account_id: account_id.into(),
            broker_timeout,
            active_orders: HashMap::new(),
            broker_id_map: HashMap::new(),
            processed_fills: HashSet::new(),
            signal_keys: HashMap::new(),
            fill_handlers: HashMap::new(),
        }
    }

    pub fn register_fill_handler(&mut self, strategy_id: &str, handler: StrategyFillHandler) {
        self.fill_handlers.insert(strategy_id.to_string(), handler);
    }

    pub fn active_order_count(&self) -> usize {
        self.active_orders.len()
    }

    pub fn get_active(&self, order_id: Uuid) -> Option<&Order> {
        self.active_orders.get(&order_id)
    }

    /// Convert an approved signal into a broker order.
    ///
    /// The order persists as PENDING before the broker sees it, so a crash
    /// between persist and submit leaves a row the reconciler can resolve
    /// instead of a phantom broker order.
    pub async fn process_signal(&mut self, signal: &Signal) -> Result<Order, OrderError> {
        self.process_signal_for_close(signal, None).await
    }

    /// Same as [`process_signal`][Self::process_signal], tagging the order
    /// with the close request it executes (outbox close flow).
    pub async fn process_signal_for_close(
        &mut self,
        signal: &Signal,
        close_request_id: Option<Uuid>,
    ) -> Result<Order, OrderError> {
        // Signal idempotency: a replayed signal returns the original order.
        let key = signal.idempotency_key();
        if let Some(order_id) = self.signal_keys.get(&key) {
            if let Some(order) = self.active_orders.get(order_id) {
                debug!(%key, "signal replay; returning active order");
                return Ok(order.clone());
            }
            if let Some(order) = self.store.get(*order_id).await? {
                debug!(%key, "signal replay; returning persisted order");
                return Ok(order);
            }
        }

        let mut order = Order::from_signal(signal, Uuid::new_v4(), &self.account_id);
        order.close_request_id = close_request_id;
        self.store.persist_new(&order).await?;
        self.signal_keys.insert(key, order.order_id);
        self.active_orders.insert(order.order_id, order.clone());

        let submit = tokio::time::timeout(self.broker_timeout, self.broker.submit_order(&order));
        match submit.await {
            Ok(Ok(broker_order_id)) => {
                order.broker_order_id = Some(broker_order_id.clone());
                order.status = OrderStatus::Submitted;
                order.updated_at = Utc::now();
                self.broker_id_map.insert(broker_order_id, order.order_id);
                info!(order_id = %order.order_id, symbol = %order.symbol, "order submitted");
            }
            Ok(Err(err)) => {
                order.status = OrderStatus::Rejected;
                order.error_message = Some(err.to_string());
                order.updated_at = Utc::now();
                warn!(order_id = %order.order_id, error = %err, "broker rejected order");
            }
            Err(_elapsed) => {
                // The submit may have reached the broker; the reconciler
                // will surface any phantom. Locally the order is rejected.
                let err = BrokerError::Timeout;
                order.status = OrderStatus::Rejected;
                order.error_message = Some(err.to_string());
                order.updated_at = Utc::now();
                warn!(order_id = %order.order_id, "broker submit timed out");
            }
        }

        self.store.update_submit_outcome(&order).await?;
        if order.is_terminal() {
            self.purge(&order);
        } else {
            self.active_orders.insert(order.order_id, order.clone());
        }
        Ok(order)
    }

    /// Apply one broker fill. Idempotent by `fill.fill_id`; duplicates are
    /// dropped before any state is touched.
    pub async fn handle_fill(&mut self, fill: &Fill) -> Result<(), OrderError> {
        if self.processed_fills.contains(&fill.fill_id) {
            debug!(fill_id = %fill.fill_id, "duplicate fill dropped");
            return Ok(());
        }
        self.processed_fills.insert(fill.fill_id.clone());

        let Some(order_id) = self.broker_id_map.get(&fill.broker_order_id).copied() else {
            warn!(
                fill_id = %fill.fill_id,
                broker_order_id = %fill.broker_order_id,
                "fill for unknown broker order dropped"
            );
            return Ok(());
        };
        let Some(order) = self.active_orders.get_mut(&order_id) else {
            warn!(fill_id = %fill.fill_id, %order_id, "fill for inactive order dropped");
            return Ok(());
        };

        let prev_qty = order.filled_qty;
        let prev_avg = order.avg_fill_price.unwrap_or(Decimal::ZERO);

        order.filled_qty = prev_qty + fill.quantity;
        order.avg_fill_price = Some(vwap(prev_qty, prev_avg, fill.quantity, fill.price));
        order.status = if order.filled_qty >= order.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartialFill
        };
        order.updated_at = Utc::now();
        let order = order.clone();

        self.store.apply_fill(&order, fill).await?;

        self.portfolio
            .record_fill(
                &self.account_id,
                &order.symbol,
                order.side,
                fill.quantity,
                fill.price,
                Some(&order.strategy_id),
            )
            .await?;

        if let Ok(payload) = fill.to_json() {
            if let Err(err) = self.stream.publish(channels::FILLS, &payload).await {
                warn!(error = %err, "fill event publish failed");
            }
        }

        self.notify_strategy(&order, fill);

        if order.status == OrderStatus::Filled {
            self.purge(&order);
            info!(order_id = %order.order_id, avg = ?order.avg_fill_price, "order filled");
        }
        Ok(())
    }

    /// Best-effort strategy notification: a handler error is logged and
    /// never affects order state.
    fn notify_strategy(&self, order: &Order, fill: &Fill) {
        if let Some(handler) = self.fill_handlers.get(&order.strategy_id) {
            if let Err(err) = handler(fill) {
                error!(
                    strategy = %order.strategy_id,
                    fill_id = %fill.fill_id,
                    error = %err,
                    "strategy fill handler failed"
                );
            }
        }
    }

    fn purge(&mut self, order: &Order) {
        self.active_orders.remove(&order.order_id);
        if let Some(broker_id) = &order.broker_order_id {
            self.broker_id_map.remove(broker_id);
        }
    }
}

/// Volume-weighted average price across the fills so far.
fn vwap(prev_qty: i64, prev_avg: Decimal, fill_qty: i64, fill_price: Decimal) -> Decimal {
    let total_qty = prev_qty + fill_qty;
    if total_qty == 0 {
        return Decimal::ZERO;
    }
    (prev_avg * Decimal::from(prev_qty) + fill_price * Decimal::from(fill_qty))
        / Decimal::from(total_qty)
}

// ---------------------------------------------------------------------------
// Task driver + handle
// ---------------------------------------------------------------------------

/// Commands accepted by the manager task.
pub enum OrderCommand {
    ProcessSignal {
        signal: Signal,
        close_request_id: Option<Uuid>,
        respond_to: oneshot::Sender<Result<Order, OrderError>>,
    },
    RegisterFillHandler {
        strategy_id: String,
        handler: StrategyFillHandler,
    },
    GetOrder {
        order_id: Uuid,
        respond_to: oneshot::Sender<Option<Order>>,
    },
}

/// Cloneable handle used by the daemon, the outbox workers, and tests.
#[derive(Clone)]
pub struct OrderManagerHandle {
    tx: mpsc::Sender<OrderCommand>,
}

impl OrderManagerHandle {
    pub async fn process_signal(&self, signal: Signal) -> Result<Order, OrderError> {
        self.process_signal_for_close(signal, None).await
    }

    pub async fn process_signal_for_close(
        &self,
        signal: Signal,
        close_request_id: Option<Uuid>,
    ) -> Result<Order, OrderError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(OrderCommand::ProcessSignal {
                signal,
                close_request_id,
                respond_to,
            })
            .await
            .map_err(|_| OrderError::NotRunning)?;
        rx.await.map_err(|_| OrderError::NotRunning)?
    }

    pub async fn register_fill_handler(
        &self,
        strategy_id: &str,
        handler: StrategyFillHandler,
    ) -> Result<(), OrderError> {
        self.tx
            .send(OrderCommand::RegisterFillHandler {
                strategy_id: strategy_id.to_string(),
                handler,
            })
            .await
            .map_err(|_| OrderError::NotRunning)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, OrderError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(OrderCommand::GetOrder { order_id, respond_to })
            .await
            .map_err(|_| OrderError::NotRunning)?;
        rx.await.map_err(|_| OrderError::NotRunning)
    }
}

/// Spawn the manager task: the single execution context that owns the
/// in-memory indices. Fills and commands interleave through `select!`, so
/// fills for one order apply in arrival order.
pub fn run_order_manager<B: BrokerAdapter + 'static>(
    mut manager: OrderManager<B>,
    mut fills: FillReceiver,
    command_capacity: usize,
) -> OrderManagerHandle {
    let (tx, mut rx) = mpsc::channel::<OrderCommand>(command_capacity);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_fill = fills.recv() => {
                    match maybe_fill {
                        Some(fill) => {
                            if let Err(err) = manager.handle_fill(&fill).await {
                                error!(error = %err, "fill handling failed");
                            }
                        }
                        None => {
                            info!("fill ingress closed; order manager stopping");
                            break;
                        }
                    }
                }
                maybe_cmd = rx.recv() => {
                    match maybe_cmd {
                        Some(OrderCommand::ProcessSignal { signal, close_request_id, respond_to }) => {
                            let result = manager
                                .process_signal_for_close(&signal, close_request_id)
                                .await;
                            let _ = respond_to.send(result);
                        }
                        Some(OrderCommand::RegisterFillHandler { strategy_id, handler }) => {
                            manager.register_fill_handler(&strategy_id, handler);
                        }
                        Some(OrderCommand::GetOrder { order_id, respond_to }) => {
                            let local = manager.get_active(order_id).cloned();
                            let result = match local {
                                Some(order) => Some(order),
                                None => manager.store.get(order_id).await.ok().flatten(),
                            };
                            let _ = respond_to.send(result);
                        }
                        None => {
                            info!("command channel closed; order manager stopping");
                            break;
                        }
                    }
                }
            }
        }
    });

    OrderManagerHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn vwap_of_two_fills() {
        let after_first = vwap(0, Decimal::ZERO, 40, dec!(100.00));
        assert_eq!(after_first, dec!(100.00));
        let after_second = vwap(40, after_first, 60, dec!(101.00));
        assert_eq!(after_second, dec!(100.60));
    }

    #[test]
    fn vwap_with_zero_total_is_zero() {
        assert_eq!(vwap(0, Decimal::ZERO, 0, dec!(5)), Decimal::ZERO);
    }
}
