//! Periodic sweeps: option-expiration alerts, reconciliation tick,
//! discrepancy subscription, idempotency purge, and the approved-signal
//! consumer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use qrl_alerts::{create_alert, AlertService, AlertType, DedupePolicy, Severity};
use qrl_broker::BrokerAdapter;
use qrl_db::stream::EventStream;
use qrl_orders::OrderManagerHandle;
use qrl_reconcile::{ReconcileService, RunTrigger};
use qrl_risk::GreeksLimitCheck;
use qrl_schemas::{channels, Signal};

use crate::state::AppState;

/// Days-to-expiry thresholds that raise `option_expiring` alerts. Each
/// threshold fires once per position (`:permanent:threshold_{N}`).
pub const EXPIRY_THRESHOLDS: &[i64] = &[7, 3, 1];

/// Sweep option positions nearing expiry and raise threshold alerts.
pub async fn option_expiry_sweep(pool: &sqlx::PgPool, alerts: &AlertService, account_id: &str) {
    let today = Utc::now().date_naive();
    let horizon = today + chrono::Duration::days(*EXPIRY_THRESHOLDS.iter().max().unwrap_or(&7));

    let positions = match qrl_db::positions::expiring_option_positions(pool, account_id, horizon).await
    {
        Ok(positions) => positions,
        Err(err) => {
            error!(error = %err, "expiry sweep query failed");
            return;
        }
    };

    for position in positions {
        let Some(expiry) = position.expiry else { continue };
        let days_left = (expiry - today).num_days();
        // The tightest threshold the position has crossed.
        let Some(threshold) = EXPIRY_THRESHOLDS
            .iter()
            .copied()
            .filter(|t| days_left <= *t)
            .min()
        else {
            continue;
        };

        alerts
            .emit(
                create_alert(
                    AlertType::OptionExpiring,
                    Severity::Sev2,
                    format!(
                        "Option position {} expires in {days_left} day(s)",
                        position.symbol
                    ),
                )
                .account(&position.account_id)
                .symbol(&position.symbol)
                .position(position.id)
                .dedupe(DedupePolicy::PermanentThreshold { threshold })
                .details(serde_json::json!({
                    "expiry": expiry.to_string(),
                    "days_left": days_left,
                    "quantity": position.quantity,
                }))
                .build(),
            )
            .await;
    }
}

/// Spawn the option-expiry sweep on a daily-ish cadence.
pub fn spawn_expiry_sweep(
    pool: sqlx::PgPool,
    alerts: Arc<AlertService>,
    account_id: String,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Ok(true) = qrl_db::advisory::try_lock(&pool, "expiration_check").await {
                option_expiry_sweep(&pool, &alerts, &account_id).await;
                let _ = qrl_db::advisory::unlock(&pool, "expiration_check").await;
            }
        }
    })
}

/// Spawn the reconciliation tick.
pub fn spawn_reconcile_tick<B: BrokerAdapter + 'static>(
    service: Arc<ReconcileService<B>>,
    alerts: Arc<AlertService>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match service.run(RunTrigger::Scheduled).await {
                Ok(Some(result)) if !result.is_clean => {
                    for discrepancy in &result.discrepancies {
                        if discrepancy.severity == qrl_reconcile::DiscrepancySeverity::Critical {
                            alerts
                                .emit(
                                    create_alert(
                                        AlertType::ReconciliationDiscrepancy,
                                        Severity::Sev1,
                                        format!(
                                            "Reconciliation discrepancy: {:?} {}",
                                            discrepancy.kind,
                                            discrepancy.symbol.as_deref().unwrap_or("-")
                                        ),
                                    )
                                    .account(&discrepancy.account_id)
                                    .details(
                                        serde_json::to_value(discrepancy)
                                            .unwrap_or(serde_json::Value::Null),
                                    )
                                    .build(),
                                )
                                .await;
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "reconciliation run failed"),
            }
        }
    })
}

/// Subscribe to the discrepancy channel and fill the HTTP ring buffer.
pub fn spawn_discrepancy_subscriber(
    stream: Arc<dyn EventStream>,
    app: AppState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match stream
                .pop(channels::RECONCILIATION_DISCREPANCY, Duration::from_secs(5))
                .await
            {
                Ok(Some(payload)) => match serde_json::from_str(&payload) {
                    Ok(value) => app.push_discrepancy(value).await,
                    Err(err) => warn!(error = %err, "bad discrepancy payload"),
                },
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "discrepancy pop failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}

/// Subscribe to the state bus and append a Tier-1 audit row for every mode
/// transition and trading-state transition, through the order-preserving
/// batch writer. Halts are the exception: those are Tier-0 and written
/// synchronously by their handlers before the response goes out.
pub fn spawn_state_audit_subscriber(
    mut bus_rx: qrl_state::BusReceiver,
    audit_tx: tokio::sync::mpsc::Sender<qrl_audit::AuditRecord>,
) -> tokio::task::JoinHandle<()> {
    use qrl_audit::{ActorType, AuditRecord, AuditSeverity};
    use qrl_state::{StateEvent, TradingStateValue};

    tokio::spawn(async move {
        while let Some(event) = bus_rx.recv().await {
            let record = match event {
                StateEvent::ModeChanged(transition) => Some(
                    AuditRecord::new(
                        "mode_transition",
                        "system",
                        ActorType::System,
                        "system_mode",
                        "global",
                    )
                    .with_severity(AuditSeverity::Warning)
                    .with_values(
                        Some(serde_json::json!({"mode": transition.from.as_str()})),
                        Some(serde_json::json!({
                            "mode": transition.to.as_str(),
                            "cause": transition.cause,
                        })),
                    ),
                ),
                // The halt entry (HALTED with can_resume unset) already
                // produced its Tier-0 row on the request path; enable_resume
                // re-publishes HALTED with can_resume set and is Tier-1.
                StateEvent::TradingStateChanged(state)
                    if state.state != TradingStateValue::Halted || state.can_resume =>
                {
                    Some(
                        AuditRecord::new(
                            "trading_state_changed",
                            &state.changed_by,
                            ActorType::Operator,
                            "trading_state",
                            "global",
                        )
                        .with_severity(AuditSeverity::Warning)
                        .with_values(
                            None,
                            Some(serde_json::json!({
                                "state": state.state.as_str(),
                                "reason": state.reason,
                                "can_resume": state.can_resume,
                            })),
                        ),
                    )
                }
                _ => None,
            };

            if let Some(record) = record {
                if audit_tx.send(record).await.is_err() {
                    warn!("audit batch writer gone; state audit subscriber stopping");
                    break;
                }
            }
        }
    })
}

/// How many chain-tail rows each integrity tick re-verifies. Consecutive
/// windows overlap through the stored prev-checksums, so sustained ticks
/// cover the whole chain.
pub const AUDIT_VERIFY_WINDOW: i64 = 512;

/// Spawn the audit-chain integrity sweep.
///
/// A verification failure is an integrity error: transition the system to
/// `halt`, write the Tier-0 `audit_integrity` record, and raise a SEV1
/// alert. No auto-heal — the chain stays broken until an operator
/// intervenes.
pub fn spawn_audit_integrity_sweep(
    app: AppState,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    use qrl_audit::{ActorType, AuditRecord, AuditSeverity};
    use qrl_state::{StateEvent, TransitionCause};

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            let verification = match app.audit.verify_recent(AUDIT_VERIFY_WINDOW).await {
                Ok(verification) => verification,
                Err(err) => {
                    error!(error = %err, "audit integrity sweep could not read the chain");
                    continue;
                }
            };
            if verification.ok {
                continue;
            }

            let detail = verification
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            error!(errors = verification.errors.len(), %detail, "audit chain verification failed");

            let transition = {
                let mut mode = app.mode.write().await;
                mode.request_halt(
                    TransitionCause::IntegrityFailure {
                        detail: detail.clone(),
                    },
                    Utc::now(),
                )
            };
            if let Some(transition) = transition {
                app.bus.publish(StateEvent::ModeChanged(transition));
            }

            // Tier-0: written synchronously, not through the batch writer.
            let record = AuditRecord::new(
                "audit_integrity",
                "system",
                ActorType::System,
                "audit_chain",
                "global",
            )
            .with_severity(AuditSeverity::Critical)
            .with_values(
                None,
                Some(serde_json::json!({
                    "rows_checked": verification.rows_checked,
                    "errors": verification
                        .errors
                        .iter()
                        .map(|e| serde_json::json!({
                            "sequence_id": e.sequence_id,
                            "reason": e.reason,
                        }))
                        .collect::<Vec<_>>(),
                })),
            );
            if let Err(err) = app.audit.append(record).await {
                error!(error = %err, "audit_integrity record append failed");
            }

            app.alerts
                .emit(
                    create_alert(
                        AlertType::AuditIntegrity,
                        Severity::Sev1,
                        format!(
                            "Audit chain verification failed: {} error(s)",
                            verification.errors.len()
                        ),
                    )
                    .details(serde_json::json!({"detail": detail}))
                    .build(),
                )
                .await;
        }
    })
}

/// Spawn the idempotency-key purge tick.
pub fn spawn_idempotency_purge(
    pool: sqlx::PgPool,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match qrl_db::idempotency::purge_expired(&pool).await {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "idempotency keys purged"),
                Err(err) => error!(error = %err, "idempotency purge failed"),
            }
        }
    })
}

/// Consume approved signals from the stream, run the risk gate, and hand
/// approved signals to the order manager. Rejections raise alerts.
pub fn spawn_signal_consumer(
    stream: Arc<dyn EventStream>,
    app: AppState,
    orders: OrderManagerHandle,
    portfolio_pool: sqlx::PgPool,
    account_id: String,
    greeks: Option<Arc<dyn GreeksLimitCheck>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let payload = match stream
                .pop(channels::APPROVED_SIGNALS, Duration::from_secs(1))
                .await
            {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, "signal pop failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let signal = match Signal::from_json(&payload) {
                Ok(signal) => signal,
                Err(err) => {
                    warn!(error = %err, "undecodable signal dropped");
                    continue;
                }
            };

            let snapshot =
                match qrl_db::positions::snapshot(&portfolio_pool, &account_id).await {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        error!(error = %err, "portfolio snapshot failed; signal deferred");
                        continue;
                    }
                };

            let result = {
                let trading = app.trading.read().await;
                let mut risk = app.risk.write().await;
                let ref_price: Option<Decimal> =
                    snapshot.positions.get(&signal.symbol).map(|p| p.current_price);
                risk.evaluate(
                    &signal,
                    &snapshot,
                    &trading,
                    greeks.as_deref(),
                    ref_price,
                    Utc::now(),
                )
            };

            if !result.approved {
                app.alerts
                    .emit(
                        create_alert(
                            AlertType::OrderRejected,
                            Severity::Sev2,
                            format!(
                                "Signal rejected: {}",
                                result.rejection_reason.as_deref().unwrap_or("risk gate")
                            ),
                        )
                        .symbol(&signal.symbol)
                        .strategy(&signal.strategy_id)
                        .details(serde_json::json!({
                            "checks_failed": result
                                .checks_failed
                                .iter()
                                .map(|f| f.check.as_str())
                                .collect::<Vec<_>>(),
                        }))
                        .build(),
                    )
                    .await;
                continue;
            }

            if let Err(err) = orders.process_signal(signal).await {
                error!(error = %err, "order submission failed");
            }
        }
    })
}
