//! Axum router and all HTTP handlers.
//!
//! `build_router` is the single entry point; `main.rs` attaches middleware
//! layers after this call so tests can drive the bare router.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use qrl_alerts::{create_alert, AlertType, Severity};
use qrl_audit::{ActorType, AuditRecord, AuditSeverity};
use qrl_state::{permission, ActionType, StateEvent};

use crate::api_types::{
    ApiError, ClosePositionApiResponse, ClosePositionRequest, DegradationStatusResponse,
    DetailedHealthResponse, ForceModeRequest, HaltRequest, KillSwitchOutcome, KillSwitchResponse,
    PauseRequest, PermissionEntry, PermissionsResponse, RiskStateResponse,
};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/risk/state", get(risk_state))
        .route("/risk/halt", post(risk_halt))
        .route("/risk/pause", post(risk_pause))
        .route("/risk/enable-resume", post(risk_enable_resume))
        .route("/risk/resume", post(risk_resume))
        .route("/risk/kill-switch", post(risk_kill_switch))
        .route("/degradation/status", get(degradation_status))
        .route("/degradation/force", post(degradation_force))
        .route("/degradation/permissions", get(degradation_permissions))
        .route("/health/detailed", get(health_detailed))
        .route("/health/component/:name", get(health_component))
        .route("/reconciliation/recent", get(reconciliation_recent))
        .route("/positions/:id/close", post(close_position))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /risk/state
// ---------------------------------------------------------------------------

pub(crate) async fn risk_state(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let trading = st.trading.read().await;
    let risk = st.risk.read().await;
    Json(RiskStateResponse {
        trading_state: trading.state().clone(),
        kill_switch_engaged: risk.kill_switch().engaged,
        kill_switch_reason: risk.kill_switch().reason.clone(),
    })
}

// ---------------------------------------------------------------------------
// POST /risk/halt
// ---------------------------------------------------------------------------

pub(crate) async fn risk_halt(
    State(st): State<Arc<AppState>>,
    Json(body): Json<HaltRequest>,
) -> Response {
    let operator = body.operator_id.as_deref().unwrap_or("operator");
    let now = Utc::now();

    let old_state = {
        let mut trading = st.trading.write().await;
        let old = trading.state().clone();
        trading.halt(operator, &body.reason, now);
        old
    };

    // Tier-0 audit: written synchronously on the request path.
    let audit = AuditRecord::new("trading_halted", operator, ActorType::Operator, "trading_state", "global")
        .with_severity(AuditSeverity::Critical)
        .with_values(
            Some(json!({"state": old_state.state.as_str()})),
            Some(json!({"state": "HALTED", "reason": body.reason})),
        );
    if let Err(err) = st.audit.append(audit).await {
        warn!(error = %err, "halt audit append failed");
    }

    st.alerts
        .emit(
            create_alert(AlertType::KillSwitchActivated, Severity::Sev1, format!("Trading halted: {}", body.reason))
                .build(),
        )
        .await;

    let trading = st.trading.read().await;
    st.bus
        .publish(StateEvent::TradingStateChanged(trading.state().clone()));
    info!(reason = %body.reason, "trading halted");
    Json(trading.state().clone()).into_response()
}

// ---------------------------------------------------------------------------
// POST /risk/pause
// ---------------------------------------------------------------------------

pub(crate) async fn risk_pause(
    State(st): State<Arc<AppState>>,
    body: Option<Json<PauseRequest>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let operator = body.operator_id.as_deref().unwrap_or("operator");

    let mut trading = st.trading.write().await;
    trading.pause(operator, body.reason.as_deref(), Utc::now());
    let snapshot = trading.state().clone();
    drop(trading);

    st.bus.publish(StateEvent::TradingStateChanged(snapshot.clone()));
    info!("trading paused");
    Json(snapshot).into_response()
}

// ---------------------------------------------------------------------------
// POST /risk/enable-resume
// ---------------------------------------------------------------------------

pub(crate) async fn risk_enable_resume(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut trading = st.trading.write().await;
    trading.enable_resume("operator");
    let snapshot = trading.state().clone();
    drop(trading);

    // can_resume flipping is a state-machine transition like any other:
    // the bus subscriber turns it into a Tier-1 audit row.
    st.bus.publish(StateEvent::TradingStateChanged(snapshot.clone()));
    info!("resume enabled");
    Json(snapshot)
}

// ---------------------------------------------------------------------------
// POST /risk/resume
// ---------------------------------------------------------------------------

pub(crate) async fn risk_resume(State(st): State<Arc<AppState>>) -> Response {
    let mut trading = st.trading.write().await;
    if !trading.resume("operator", Utc::now()) {
        return ApiError::policy(
            "cannot resume: trading is HALTED without enable-resume; call /risk/enable-resume first",
        )
        .into_response();
    }
    let snapshot = trading.state().clone();
    drop(trading);

    st.bus.publish(StateEvent::TradingStateChanged(snapshot.clone()));
    info!("trading resumed");
    Json(snapshot).into_response()
}

// ---------------------------------------------------------------------------
// POST /risk/kill-switch — compound: halt + cancel all + flatten all
// ---------------------------------------------------------------------------

pub(crate) async fn risk_kill_switch(State(st): State<Arc<AppState>>) -> Response {
    let now = Utc::now();
    let mut outcomes = Vec::new();

    // 1. Halt trading and engage the sticky kill switch.
    {
        let mut trading = st.trading.write().await;
        trading.halt("kill-switch", "kill switch engaged", now);
    }
    {
        let mut risk = st.risk.write().await;
        risk.engage_kill_switch("Kill switch engaged by operator", now);
    }
    outcomes.push(KillSwitchOutcome {
        action: "halt".to_string(),
        ok: true,
        detail: None,
    });

    // Tier-0 audit before the side-effectful legs.
    let audit = AuditRecord::new(
        "kill_switch_activated",
        "operator",
        ActorType::Operator,
        "trading_state",
        "global",
    )
    .with_severity(AuditSeverity::Critical);
    if let Err(err) = st.audit.append(audit).await {
        warn!(error = %err, "kill-switch audit append failed");
    }

    // 2. Cancel all working orders.
    match st.emergency.cancel_all_orders().await {
        Ok(count) => outcomes.push(KillSwitchOutcome {
            action: "cancel_all".to_string(),
            ok: true,
            detail: Some(format!("{count} orders cancelled")),
        }),
        Err(err) => outcomes.push(KillSwitchOutcome {
            action: "cancel_all".to_string(),
            ok: false,
            detail: Some(err.to_string()),
        }),
    }

    // 3. Flatten all positions.
    match st.emergency.flatten_all_positions().await {
        Ok(count) => outcomes.push(KillSwitchOutcome {
            action: "flatten_all".to_string(),
            ok: true,
            detail: Some(format!("{count} positions flattened")),
        }),
        Err(err) => outcomes.push(KillSwitchOutcome {
            action: "flatten_all".to_string(),
            ok: false,
            detail: Some(err.to_string()),
        }),
    }

    st.alerts
        .emit(
            create_alert(
                AlertType::KillSwitchActivated,
                Severity::Sev1,
                "Kill switch engaged: halt + cancel all + flatten all",
            )
            .details(json!({"outcomes": outcomes.iter().map(|o| json!({
                "action": o.action, "ok": o.ok, "detail": o.detail,
            })).collect::<Vec<_>>()}))
            .build(),
        )
        .await;

    info!("kill switch executed");
    Json(KillSwitchResponse {
        halted: true,
        outcomes,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// GET /degradation/status
// ---------------------------------------------------------------------------

pub(crate) async fn degradation_status(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mode = st.mode.read().await;
    Json(DegradationStatusResponse {
        mode: mode.mode(),
        stage: mode.stage(),
        is_force_override: mode.is_force_override(),
        override_expires_at: mode.override_expires_at(),
    })
}

// ---------------------------------------------------------------------------
// POST /degradation/force
// ---------------------------------------------------------------------------

pub(crate) async fn degradation_force(
    State(st): State<Arc<AppState>>,
    Json(body): Json<ForceModeRequest>,
) -> Response {
    let ttl = Duration::seconds(body.ttl_seconds.unwrap_or(1_800) as i64);
    let now = Utc::now();

    let transition = {
        let mut mode = st.mode.write().await;
        mode.force_override(body.mode, ttl, &body.operator_id, &body.reason, now)
    };

    // Tier-0 audit for every force-override, transition or not.
    let audit = AuditRecord::new(
        "mode_force_override",
        &body.operator_id,
        ActorType::Operator,
        "system_mode",
        "global",
    )
    .with_severity(AuditSeverity::Critical)
    .with_values(
        None,
        Some(json!({
            "mode": body.mode.as_str(),
            "ttl_seconds": ttl.num_seconds(),
            "reason": body.reason,
        })),
    );
    if let Err(err) = st.audit.append(audit).await {
        warn!(error = %err, "force-override audit append failed");
    }

    if let Some(transition) = transition {
        st.bus.publish(StateEvent::ModeChanged(transition));
    }

    let mode = st.mode.read().await;
    Json(DegradationStatusResponse {
        mode: mode.mode(),
        stage: mode.stage(),
        is_force_override: mode.is_force_override(),
        override_expires_at: mode.override_expires_at(),
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// GET /degradation/permissions
// ---------------------------------------------------------------------------

pub(crate) async fn degradation_permissions(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mode = st.mode.read().await.mode();
    let permissions = ActionType::ALL
        .iter()
        .map(|action| PermissionEntry {
            action: action.as_str().to_string(),
            permission: permission(mode, *action),
        })
        .collect();
    Json(PermissionsResponse { mode, permissions })
}

// ---------------------------------------------------------------------------
// GET /health/detailed — 200 healthy, 503 degraded
// ---------------------------------------------------------------------------

pub(crate) async fn health_detailed(State(st): State<Arc<AppState>>) -> Response {
    let components = st.component_health.read().await.clone();
    let healthy = !components.is_empty() && components.iter().all(|c| c.healthy);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(DetailedHealthResponse {
            healthy,
            components,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /health/component/:name
// ---------------------------------------------------------------------------

pub(crate) async fn health_component(
    State(st): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    let components = st.component_health.read().await;
    match components.iter().find(|c| c.name == name) {
        Some(component) => {
            let status = if component.healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(component.clone())).into_response()
        }
        None => ApiError::not_found(format!("no such component: {name}")).into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /reconciliation/recent
// ---------------------------------------------------------------------------

pub(crate) async fn reconciliation_recent(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let buffer = st.recent_discrepancies.read().await;
    Json(buffer.iter().cloned().collect::<Vec<_>>())
}

// ---------------------------------------------------------------------------
// POST /positions/:id/close — idempotent via the Idempotency-Key header
// ---------------------------------------------------------------------------

pub(crate) async fn close_position(
    State(st): State<Arc<AppState>>,
    Path(position_id): Path<i64>,
    headers: HeaderMap,
    body: Option<Json<ClosePositionRequest>>,
) -> Response {
    let Some(idempotency_key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return ApiError::policy("missing Idempotency-Key header").into_response();
    };
    let reason = body.map(|Json(b)| b.reason).unwrap_or_default();

    // Replay: return the cached response verbatim, no new work.
    match st.idempotency.lookup(idempotency_key).await {
        Ok(Some(cached)) => return (StatusCode::OK, Json(cached)).into_response(),
        Ok(None) => {}
        Err(err) => return ApiError::system(err.to_string()).into_response(),
    }

    // Close gate: PAUSED still allows closes, HALTED does not.
    {
        let trading = st.trading.read().await;
        if !trading.is_close_allowed() {
            return ApiError::policy(format!(
                "trading state {} does not allow closing positions",
                trading.state().state.as_str()
            ))
            .into_response();
        }
    }

    let outcome = st
        .close_port
        .close(position_id, idempotency_key, reason.as_deref())
        .await;
    match outcome {
        Ok(result) => {
            info!(
                position_id,
                close_request_id = %result.close_request_id,
                reason = reason.as_deref().unwrap_or("-"),
                "close position accepted"
            );
            if result.created {
                let audit = AuditRecord::new(
                    "position_close_requested",
                    "operator",
                    ActorType::Operator,
                    "position",
                    position_id.to_string(),
                )
                .with_request_id(idempotency_key)
                .with_values(
                    None,
                    Some(json!({
                        "close_request_id": result.close_request_id,
                        "reason": reason,
                    })),
                );
                if let Err(err) = st.audit.append(audit).await {
                    warn!(error = %err, "close-request audit append failed");
                }
            }

            let response = ClosePositionApiResponse {
                close_request_id: result.close_request_id,
                position_id: result.position_id,
                status: result.status.as_str().to_string(),
            };
            let cached = serde_json::to_value(&response).expect("response serializes");
            if let Err(err) = st
                .idempotency
                .store(idempotency_key, "close_position", &position_id.to_string(), &cached)
                .await
            {
                warn!(error = %err, "idempotency store failed");
            }
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => match &err {
            qrl_outbox::ClosePositionError::NotFound(_) => {
                ApiError::not_found(err.to_string()).into_response()
            }
            qrl_outbox::ClosePositionError::AlreadyClosing(_)
            | qrl_outbox::ClosePositionError::NotCloseable { .. } => {
                ApiError::conflict(err.to_string()).into_response()
            }
            qrl_outbox::ClosePositionError::Db(inner) => {
                ApiError::system(inner.to_string()).into_response()
            }
        },
    }
}
