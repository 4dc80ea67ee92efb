//! The reconciliation service: snapshot, compare, sweep, emit.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use qrl_broker::BrokerAdapter;
use qrl_config::ReconcileConfig;
use qrl_db::stream::EventStream;
use qrl_schemas::{channels, Position};

use crate::comparator::{compare_account, compare_positions};
use crate::types::{ReconciliationResult, RunContext, RunTrigger};
use crate::zombie::{sweep_zombie_orders, ZombieOrderAccess};

pub const RECONCILE_LOCK_NAME: &str = "reconciliation";

/// Local snapshot source (the portfolio collaborator).
#[async_trait]
pub trait PortfolioView: Send + Sync {
    async fn local_positions(&self) -> Result<Vec<Position>>;
    /// `(cash, equity)`.
    async fn local_account(&self) -> Result<(Decimal, Decimal)>;
}

/// Singleton guard for multi-instance deployments.
#[async_trait]
pub trait LockProvider: Send + Sync {
    async fn try_lock(&self, name: &str) -> Result<bool>;
    async fn unlock(&self, name: &str) -> Result<()>;
}

/// Single-instance deployments: always acquires.
pub struct NoopLock;

#[async_trait]
impl LockProvider for NoopLock {
    async fn try_lock(&self, _name: &str) -> Result<bool> {
        Ok(true)
    }
    async fn unlock(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// Postgres advisory-lock guard with the deterministic 31-bit key.
pub struct PgAdvisoryLock {
    pool: sqlx::PgPool,
}

impl PgAdvisoryLock {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockProvider for PgAdvisoryLock {
    async fn try_lock(&self, name: &str) -> Result<bool> {
        qrl_db::advisory::try_lock(&self.pool, name).await
    }
    async fn unlock(&self, name: &str) -> Result<()> {
        qrl_db::advisory::unlock(&self.pool, name).await.map(|_| ())
    }
}

pub struct ReconcileService<B: BrokerAdapter> {
    portfolio: Arc<dyn PortfolioView>,
    broker: Arc<B>,
    orders: Arc<dyn ZombieOrderAccess>,
    stream: Arc<dyn EventStream>,
    lock: Arc<dyn LockProvider>,
    config: ReconcileConfig,
    account_id: String,
    instance_id: String,
}

impl<B: BrokerAdapter> ReconcileService<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        portfolio: Arc<dyn PortfolioView>,
        broker: Arc<B>,
        orders: Arc<dyn ZombieOrderAccess>,
        stream: Arc<dyn EventStream>,
        lock: Arc<dyn LockProvider>,
        config: ReconcileConfig,
        account_id: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            portfolio,
            broker,
            orders,
            stream,
            lock,
            config,
            account_id: account_id.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Run one reconciliation. Returns `None` when another instance holds
    /// the advisory lock (their run covers this tick).
    pub async fn run(&self, trigger: RunTrigger) -> Result<Option<ReconciliationResult>> {
        if self.config.distributed && !self.lock.try_lock(RECONCILE_LOCK_NAME).await? {
            info!("reconciliation lock held elsewhere; skipping run");
            return Ok(None);
        }

        let result = self.run_locked(trigger).await;

        if self.config.distributed {
            if let Err(err) = self.lock.unlock(RECONCILE_LOCK_NAME).await {
                warn!(error = %err, "advisory unlock failed");
            }
        }
        result.map(Some)
    }

    async fn run_locked(&self, trigger: RunTrigger) -> Result<ReconciliationResult> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let now = Utc::now();

        let local_positions = self.portfolio.local_positions().await?;
        let (local_cash, local_equity) = self.portfolio.local_account().await?;
        let broker_positions = self.broker.get_positions(&self.account_id).await?;
        let broker_account = self.broker.get_account(&self.account_id).await?;

        let mut discrepancies =
            compare_positions(&self.account_id, &local_positions, &broker_positions, now);
        discrepancies.extend(compare_account(
            &self.account_id,
            local_cash,
            local_equity,
            &broker_account,
            &self.config,
            now,
        ));

        let sweep = sweep_zombie_orders(
            self.orders.as_ref(),
            self.broker.as_ref(),
            &self.config,
            &self.account_id,
            now,
        )
        .await?;
        discrepancies.extend(sweep.discrepancies);

        let result = ReconciliationResult {
            run_id,
            is_clean: discrepancies.is_empty(),
            positions_checked: local_positions.len().max(broker_positions.len()),
            discrepancies,
            duration_ms: started.elapsed().as_millis() as u64,
            context: RunContext {
                trigger,
                instance_id: self.instance_id.clone(),
            },
        };

        self.emit(&result).await;

        if result.is_clean {
            info!(%run_id, positions = result.positions_checked, "reconciliation clean");
        } else {
            warn!(
                %run_id,
                discrepancies = result.discrepancies.len(),
                critical = result.critical_count(),
                "reconciliation found discrepancies"
            );
        }
        Ok(result)
    }

    /// Publish the run result, then each discrepancy with the same run_id.
    /// Emission failures are logged, never fatal to the run.
    async fn emit(&self, result: &ReconciliationResult) {
        if let Ok(payload) = serde_json::to_string(result) {
            if let Err(err) = self
                .stream
                .publish(channels::RECONCILIATION_RESULT, &payload)
                .await
            {
                warn!(error = %err, "result publish failed");
            }
        }
        for discrepancy in &result.discrepancies {
            let envelope = serde_json::json!({
                "run_id": result.run_id,
                "discrepancy": discrepancy,
            });
            if let Err(err) = self
                .stream
                .publish(channels::RECONCILIATION_DISCREPANCY, &envelope.to_string())
                .await
            {
                warn!(error = %err, "discrepancy publish failed");
            }
        }
    }
}
