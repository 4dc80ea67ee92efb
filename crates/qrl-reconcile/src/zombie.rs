//! Stuck/zombie order detection.
//!
//! Non-terminal orders untouched for longer than the configured age are
//! checked against the broker. Each run where the broker reports no such
//! order increments `reconcile_not_found_count`; at the threshold the order
//! is marked EXPIRED and surfaced as a critical discrepancy.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use qrl_broker::BrokerAdapter;
use qrl_config::ReconcileConfig;
use qrl_schemas::{BrokerOrderStatus, Order};

use crate::types::{Discrepancy, DiscrepancyType};

/// Order-table operations the sweep needs.
#[async_trait]
pub trait ZombieOrderAccess: Send + Sync {
    async fn stale_active_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>>;
    async fn increment_not_found(&self, order_id: Uuid) -> Result<i32>;
    async fn mark_expired(&self, order_id: Uuid) -> Result<()>;
}

#[async_trait]
impl ZombieOrderAccess for sqlx::PgPool {
    async fn stale_active_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        qrl_db::orders::stale_active_orders(self, cutoff).await
    }

    async fn increment_not_found(&self, order_id: Uuid) -> Result<i32> {
        qrl_db::orders::increment_not_found(self, order_id).await
    }

    async fn mark_expired(&self, order_id: Uuid) -> Result<()> {
        qrl_db::orders::mark_expired(self, order_id).await
    }
}

#[derive(Debug, Default)]
pub struct ZombieSweepOutcome {
    pub flagged: usize,
    pub expired: Vec<Uuid>,
    pub discrepancies: Vec<Discrepancy>,
}

/// Run one zombie sweep.
pub async fn sweep_zombie_orders<B: BrokerAdapter>(
    orders: &dyn ZombieOrderAccess,
    broker: &B,
    config: &ReconcileConfig,
    account_id: &str,
    now: DateTime<Utc>,
) -> Result<ZombieSweepOutcome> {
    let cutoff = now - Duration::seconds(config.zombie_order_age_secs);
    let stale = orders.stale_active_orders(cutoff).await?;

    let mut outcome = ZombieSweepOutcome::default();
    for order in stale {
        let Some(broker_order_id) = &order.broker_order_id else {
            // Never reached the broker: a PENDING row this old is already a
            // zombie by definition.
            warn!(order_id = %order.order_id, "stale order with no broker id");
            continue;
        };

        let status = broker.get_order_status(broker_order_id).await;
        match status {
            Ok(BrokerOrderStatus::NotFound) => {
                outcome.flagged += 1;
                let count = orders.increment_not_found(order.order_id).await?;
                if count >= config.not_found_threshold {
                    orders.mark_expired(order.order_id).await?;
                    outcome.expired.push(order.order_id);
                    outcome.discrepancies.push(Discrepancy {
                        kind: DiscrepancyType::ZombieOrder,
                        severity: DiscrepancyType::ZombieOrder.severity(),
                        account_id: account_id.to_string(),
                        symbol: Some(order.symbol.clone()),
                        local_value: Some(order.quantity.into()),
                        broker_value: None,
                        timestamp: now,
                    });
                    info!(order_id = %order.order_id, count, "zombie order expired");
                }
            }
            Ok(_) => {
                // The broker still knows the order; it is slow, not dead.
            }
            Err(err) => {
                warn!(order_id = %order.order_id, error = %err, "zombie status check failed");
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrl_broker::{BrokerError, FillCallback};
    use qrl_schemas::{BrokerAccount, BrokerPosition, OrderKind, OrderStatus, Side, Signal};
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemoryOrders {
        orders: Mutex<Vec<Order>>,
        counts: Mutex<HashMap<Uuid, i32>>,
        expired: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl ZombieOrderAccess for MemoryOrders {
        async fn stale_active_orders(&self, _cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
            Ok(self.orders.lock().unwrap().clone())
        }

        async fn increment_not_found(&self, order_id: Uuid) -> Result<i32> {
            let mut counts = self.counts.lock().unwrap();
            let count = counts.entry(order_id).or_insert(0);
            *count += 1;
            Ok(*count)
        }

        async fn mark_expired(&self, order_id: Uuid) -> Result<()> {
            self.expired.lock().unwrap().push(order_id);
            Ok(())
        }
    }

    struct NotFoundBroker;

    #[async_trait]
    impl BrokerAdapter for NotFoundBroker {
        async fn submit_order(&self, _order: &Order) -> Result<String, BrokerError> {
            unreachable!("sweep never submits")
        }
        async fn cancel_order(&self, _id: &str) -> Result<bool, BrokerError> {
            Ok(false)
        }
        async fn get_order_status(&self, _id: &str) -> Result<BrokerOrderStatus, BrokerError> {
            Ok(BrokerOrderStatus::NotFound)
        }
        fn subscribe_fills(&self, _callback: FillCallback) {}
        async fn get_positions(&self, _a: &str) -> Result<Vec<BrokerPosition>, BrokerError> {
            Ok(vec![])
        }
        async fn get_account(&self, _a: &str) -> Result<BrokerAccount, BrokerError> {
            Ok(BrokerAccount {
                account_id: "acct-1".into(),
                cash: Decimal::ZERO,
                buying_power: Decimal::ZERO,
                margin_used: Decimal::ZERO,
                total_equity: Decimal::ZERO,
            })
        }
    }

    fn stuck_order() -> Order {
        let signal = Signal {
            strategy_id: "s1".into(),
            symbol: "AAPL".into(),
            action: Side::Buy,
            quantity: 10,
            order_type: OrderKind::Market,
            limit_price: None,
            client_id: None,
            reason: String::new(),
            timestamp: Utc::now(),
        };
        let mut order = Order::from_signal(&signal, Uuid::new_v4(), "acct-1");
        order.broker_order_id = Some("B-1".into());
        order.status = OrderStatus::Submitted;
        order
    }

    #[tokio::test]
    async fn expires_after_threshold_not_found_observations() {
        let order = stuck_order();
        let orders = MemoryOrders {
            orders: Mutex::new(vec![order.clone()]),
            counts: Mutex::new(HashMap::new()),
            expired: Mutex::new(Vec::new()),
        };
        let config = ReconcileConfig::default(); // threshold 3
        let broker = NotFoundBroker;

        // Two sweeps: flagged but not expired.
        for _ in 0..2 {
            let outcome =
                sweep_zombie_orders(&orders, &broker, &config, "acct-1", Utc::now())
                    .await
                    .unwrap();
            assert!(outcome.expired.is_empty());
        }

        // Third sweep crosses the threshold.
        let outcome = sweep_zombie_orders(&orders, &broker, &config, "acct-1", Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.expired, vec![order.order_id]);
        assert_eq!(outcome.discrepancies.len(), 1);
        assert_eq!(outcome.discrepancies[0].kind, DiscrepancyType::ZombieOrder);
        assert_eq!(*orders.expired.lock().unwrap(), vec![order.order_id]);
    }
}
