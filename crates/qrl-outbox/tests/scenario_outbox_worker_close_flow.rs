//! Scenarios for the outbox worker: happy-path close submission, idempotent
//! skip of already-processed requests, broker rejection handling, and the
//! bounded retry → permanent-failure path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use qrl_broker::{MarketData, MarketDataError};
use qrl_config::OutboxConfig;
use qrl_outbox::{
    CloseAccess, MemoryCloseAccess, MemoryOutboxAccess, OrderSubmitter, OutboxAccess,
    OutboxWorker, SubmitOutcome,
};
use qrl_schemas::{
    CloseRequest, CloseRequestStatus, OutboxPayload, OutboxStatus, Quote, Side,
};

struct FixedQuotes {
    quote: Option<Quote>,
}

#[async_trait]
impl MarketData for FixedQuotes {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        self.quote.clone().ok_or(MarketDataError::Unavailable {
            symbol: symbol.to_string(),
        })
    }
}

/// Scripted order submitter: records calls, returns the scripted outcome.
struct ScriptedSubmitter {
    rejected: bool,
    fail_with_error: bool,
    calls: AtomicUsize,
    last_price: Mutex<Option<Decimal>>,
}

impl ScriptedSubmitter {
    fn accepting() -> Self {
        Self {
            rejected: false,
            fail_with_error: false,
            calls: AtomicUsize::new(0),
            last_price: Mutex::new(None),
        }
    }

    fn rejecting() -> Self {
        Self {
            rejected: true,
            ..Self::accepting()
        }
    }

    fn erroring() -> Self {
        Self {
            fail_with_error: true,
            ..Self::accepting()
        }
    }
}

#[async_trait]
impl OrderSubmitter for ScriptedSubmitter {
    async fn submit_close_order(
        &self,
        _symbol: &str,
        _side: Side,
        _qty: i64,
        limit_price: Decimal,
        _close_request_id: Uuid,
    ) -> anyhow::Result<SubmitOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_price.lock().unwrap() = Some(limit_price);
        if self.fail_with_error {
            return Err(anyhow!("broker transport down"));
        }
        Ok(SubmitOutcome {
            order_id: Uuid::new_v4(),
            rejected: self.rejected,
            error_message: self.rejected.then(|| "insufficient funds".to_string()),
        })
    }
}

fn pending_close_request(id: Uuid, position_id: i64) -> CloseRequest {
    CloseRequest {
        id,
        position_id,
        idempotency_key: "K1".into(),
        status: CloseRequestStatus::Pending,
        symbol: "AAPL".into(),
        side: Side::Sell,
        target_qty: 50,
        filled_qty: 0,
        retry_count: 0,
        max_retries: 3,
        reason: None,
        created_at: Utc::now(),
        submitted_at: None,
        completed_at: None,
    }
}

fn good_quote() -> Quote {
    Quote {
        symbol: "AAPL".into(),
        bid: dec!(100),
        ask: dec!(101),
        last: dec!(100.5),
        timestamp: Utc::now(),
    }
}

struct Harness {
    outbox: Arc<MemoryOutboxAccess>,
    close: Arc<MemoryCloseAccess>,
    submitter: Arc<ScriptedSubmitter>,
    worker: OutboxWorker,
    close_request_id: Uuid,
    event_id: i64,
}

fn harness(quote: Option<Quote>, submitter: ScriptedSubmitter) -> Harness {
    let outbox = Arc::new(MemoryOutboxAccess::new());
    let close = Arc::new(MemoryCloseAccess::new());
    let submitter = Arc::new(submitter);

    let close_request_id = Uuid::new_v4();
    close.insert(pending_close_request(close_request_id, 42));
    let event_id = outbox.enqueue(&OutboxPayload::SubmitCloseOrder {
        close_request_id,
        position_id: 42,
        symbol: "AAPL".into(),
        side: Side::Sell,
        qty: 50,
    });

    let worker = OutboxWorker::new(
        Arc::clone(&outbox) as _,
        Arc::clone(&close) as _,
        Arc::new(FixedQuotes { quote }) as _,
        Arc::clone(&submitter) as _,
        OutboxConfig::default(),
        Duration::from_millis(200),
    );

    Harness {
        outbox,
        close,
        submitter,
        worker,
        close_request_id,
        event_id,
    }
}

#[tokio::test]
async fn happy_path_submits_at_crossed_price_and_completes() {
    let h = harness(Some(good_quote()), ScriptedSubmitter::accepting());

    let claimed = h.worker.run_once().await.unwrap();
    assert_eq!(claimed, 1);

    assert_eq!(h.outbox.status_of(h.event_id), Some(OutboxStatus::Completed));
    assert_eq!(
        h.close.status_of(h.close_request_id),
        Some(CloseRequestStatus::Submitted)
    );
    // Sell crossed 5% below the bid.
    assert_eq!(*h.submitter.last_price.lock().unwrap(), Some(dec!(95.00)));
}

#[tokio::test]
async fn non_pending_request_is_skipped_idempotently() {
    let h = harness(Some(good_quote()), ScriptedSubmitter::accepting());
    h.close
        .set_close_request_status(h.close_request_id, CloseRequestStatus::Submitted)
        .await
        .unwrap();

    h.worker.run_once().await.unwrap();

    assert_eq!(h.outbox.status_of(h.event_id), Some(OutboxStatus::Completed));
    assert_eq!(h.submitter.calls.load(Ordering::SeqCst), 0, "no broker call");
}

#[tokio::test]
async fn broker_rejection_fails_request_and_position_without_retry() {
    let h = harness(Some(good_quote()), ScriptedSubmitter::rejecting());

    h.worker.run_once().await.unwrap();

    // Rejection is permanent: the event completes, the request fails.
    assert_eq!(h.outbox.status_of(h.event_id), Some(OutboxStatus::Completed));
    assert_eq!(
        h.close.status_of(h.close_request_id),
        Some(CloseRequestStatus::Failed)
    );
    assert_eq!(*h.close.failed_positions.lock().unwrap(), vec![42]);
}

#[tokio::test]
async fn missing_quote_releases_for_retry() {
    let h = harness(None, ScriptedSubmitter::accepting());

    h.worker.run_once().await.unwrap();

    assert_eq!(h.outbox.status_of(h.event_id), Some(OutboxStatus::Pending));
    let event = h.outbox.events().into_iter().find(|e| e.id == h.event_id).unwrap();
    assert_eq!(event.retry_count, 1);
    assert_eq!(
        h.close.status_of(h.close_request_id),
        Some(CloseRequestStatus::Pending),
        "request untouched while retryable"
    );
}

#[tokio::test]
async fn retry_budget_exhaustion_executes_permanent_failure_policy() {
    let h = harness(None, ScriptedSubmitter::accepting());

    // max_retries = 3: three failing rounds exhaust the budget.
    for _ in 0..3 {
        h.worker.run_once().await.unwrap();
    }

    assert_eq!(h.outbox.status_of(h.event_id), Some(OutboxStatus::Failed));
    assert_eq!(
        h.close.status_of(h.close_request_id),
        Some(CloseRequestStatus::Failed)
    );
    assert_eq!(*h.close.failed_positions.lock().unwrap(), vec![42]);
}

#[tokio::test]
async fn submit_error_is_retryable() {
    let h = harness(Some(good_quote()), ScriptedSubmitter::erroring());

    h.worker.run_once().await.unwrap();

    assert_eq!(h.outbox.status_of(h.event_id), Some(OutboxStatus::Pending));
    assert_eq!(h.submitter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cleaner_preserves_pending_and_processing() {
    let outbox = Arc::new(MemoryOutboxAccess::new());
    let id = outbox.enqueue(&OutboxPayload::Extension {
        kind: "old".into(),
        data: serde_json::json!({}),
    });
    // Even with a zero-day retention window, non-terminal rows survive.
    let deleted = outbox.cleanup(0).await.unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(outbox.status_of(id), Some(OutboxStatus::Pending));
}
