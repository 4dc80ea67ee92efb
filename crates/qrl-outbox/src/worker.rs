//! The outbox worker pool and cleaner.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use qrl_broker::MarketData;
use qrl_config::OutboxConfig;
use qrl_schemas::{CloseRequestStatus, OutboxEvent, OutboxPayload, Side};

use crate::access::{CloseAccess, OutboxAccess};
use crate::pricing::compute_limit_price;

/// Outcome of a close-order submission through the order lifecycle manager.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub order_id: Uuid,
    pub rejected: bool,
    pub error_message: Option<String>,
}

/// The worker's view of the order lifecycle manager.
#[async_trait]
pub trait OrderSubmitter: Send + Sync {
    async fn submit_close_order(
        &self,
        symbol: &str,
        side: Side,
        qty: i64,
        limit_price: Decimal,
        close_request_id: Uuid,
    ) -> Result<SubmitOutcome>;
}

/// Processes claimed outbox events. One instance per worker task; all
/// state lives behind the store seams.
pub struct OutboxWorker {
    outbox: Arc<dyn OutboxAccess>,
    close: Arc<dyn CloseAccess>,
    market_data: Arc<dyn MarketData>,
    orders: Arc<dyn OrderSubmitter>,
    config: OutboxConfig,
    quote_timeout: Duration,
}

impl OutboxWorker {
    pub fn new(
        outbox: Arc<dyn OutboxAccess>,
        close: Arc<dyn CloseAccess>,
        market_data: Arc<dyn MarketData>,
        orders: Arc<dyn OrderSubmitter>,
        config: OutboxConfig,
        quote_timeout: Duration,
    ) -> Self {
        Self {
            outbox,
            close,
            market_data,
            orders,
            config,
            quote_timeout,
        }
    }

    /// Claim and process one batch. Returns the number of claimed events.
    pub async fn run_once(&self) -> Result<usize> {
        let events = self.outbox.claim_pending(self.config.claim_batch).await?;
        let count = events.len();
        for event in events {
            self.process_event(event).await;
        }
        Ok(count)
    }

    /// Process a single claimed event, owning its retry budget.
    pub async fn process_event(&self, event: OutboxEvent) {
        let result = self.dispatch(&event).await;

        match result {
            Ok(()) => {
                if let Err(err) = self.outbox.mark_completed(event.id).await {
                    error!(event_id = event.id, error = %err, "mark_completed failed");
                }
            }
            Err(err) => {
                warn!(event_id = event.id, error = %err, "outbox event failed");
                match self.outbox.release_for_retry(event.id).await {
                    Ok(retry_count) if retry_count >= self.config.max_retries => {
                        if let Err(mark_err) = self.outbox.mark_failed(event.id).await {
                            error!(event_id = event.id, error = %mark_err, "mark_failed failed");
                        }
                        self.handle_permanent_failure(&event, &err.to_string()).await;
                    }
                    Ok(retry_count) => {
                        info!(
                            event_id = event.id,
                            retry_count, "outbox event released for retry"
                        );
                    }
                    Err(retry_err) => {
                        error!(event_id = event.id, error = %retry_err, "release_for_retry failed");
                    }
                }
            }
        }
    }

    async fn dispatch(&self, event: &OutboxEvent) -> Result<()> {
        let payload = event.decode_payload()?;
        match payload {
            OutboxPayload::SubmitCloseOrder {
                close_request_id,
                position_id,
                symbol,
                side,
                qty,
            } => {
                self.handle_submit_close_order(close_request_id, position_id, &symbol, side, qty)
                    .await
            }
            OutboxPayload::CancelOrder { .. } | OutboxPayload::Extension { .. } => {
                // No handler yet; complete rather than spin the retry
                // budget on an event nothing consumes.
                warn!(event_type = %event.event_type, "unhandled outbox event type");
                Ok(())
            }
        }
    }

    async fn handle_submit_close_order(
        &self,
        close_request_id: Uuid,
        position_id: i64,
        symbol: &str,
        side: Side,
        qty: i64,
    ) -> Result<()> {
        // Idempotent skip: the request may already be past pending (a
        // previous attempt got further than its event bookkeeping did).
        let Some(close_request) = self.close.get_close_request(close_request_id).await? else {
            info!(%close_request_id, "close request vanished; skipping");
            return Ok(());
        };
        if close_request.status != CloseRequestStatus::Pending {
            info!(
                %close_request_id,
                status = close_request.status.as_str(),
                "close request already processed; skipping"
            );
            return Ok(());
        }

        let quote = tokio::time::timeout(self.quote_timeout, self.market_data.get_quote(symbol))
            .await
            .map_err(|_| anyhow!("market data timeout for {symbol}, will retry"))?
            .map_err(|err| anyhow!("quote fetch failed for {symbol}: {err}"))?;

        let limit_price = compute_limit_price(&quote, side, &self.config)?;

        let outcome = self
            .orders
            .submit_close_order(symbol, side, qty, limit_price, close_request_id)
            .await?;

        if outcome.rejected {
            // Broker said no: permanent for this request, not retryable.
            warn!(
                %close_request_id,
                error = outcome.error_message.as_deref().unwrap_or("rejected"),
                "close order rejected by broker"
            );
            self.close
                .set_close_request_status(close_request_id, CloseRequestStatus::Failed)
                .await?;
            self.close.mark_position_close_failed(position_id).await?;
        } else {
            self.close
                .set_close_request_status(close_request_id, CloseRequestStatus::Submitted)
                .await?;
            info!(%close_request_id, order_id = %outcome.order_id, %limit_price, "close order submitted");
        }
        Ok(())
    }

    /// Retry budget exhausted: fail the owning close request and position.
    async fn handle_permanent_failure(&self, event: &OutboxEvent, error: &str) {
        error!(event_id = event.id, error, "outbox event failed permanently");

        if let Ok(OutboxPayload::SubmitCloseOrder {
            close_request_id,
            position_id,
            ..
        }) = event.decode_payload()
        {
            if let Err(err) = self
                .close
                .set_close_request_status(close_request_id, CloseRequestStatus::Failed)
                .await
            {
                error!(%close_request_id, error = %err, "failed to fail close request");
            }
            if let Err(err) = self.close.mark_position_close_failed(position_id).await {
                error!(position_id, error = %err, "failed to flag position");
            }
        }
    }
}

/// Worker loop: poll, claim, process. Cancellation-safe — a shutdown signal
/// lets the in-flight batch finish before the task exits.
pub fn run_outbox_worker(
    worker: Arc<OutboxWorker>,
    poll_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match worker.run_once().await {
                        Ok(0) => {}
                        Ok(n) => info!(claimed = n, "outbox batch processed"),
                        Err(err) => error!(error = %err, "outbox claim failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("outbox worker shutting down");
                        break;
                    }
                }
            }
        }
    })
}

/// Retention cleaner: deletes terminal events past the window, preserving
/// pending/processing regardless of age.
pub fn run_outbox_cleaner(
    outbox: Arc<dyn OutboxAccess>,
    retention_days: i64,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match outbox.cleanup(retention_days).await {
                        Ok(0) => {}
                        Ok(n) => info!(deleted = n, "outbox retention cleanup"),
                        Err(err) => error!(error = %err, "outbox cleanup failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
