//! In-process router scenarios: sticky halt/resume, close idempotency,
//! the compound kill switch, degradation overrides and permissions, and
//! the health surface.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use qrl_alerts::{AlertService, MemoryAlertStore};
use qrl_audit::{AuditService, MemoryAuditStore, RedactionRules};
use qrl_config::{DegradationConfig, RiskLimitsConfig};
use qrl_daemon::ports::{MemoryClosePosition, MemoryEmergency, MemoryIdempotency};
use qrl_daemon::routes::build_router;
use qrl_daemon::state::AppState;
use qrl_risk::RiskEngine;
use qrl_state::{ModeMachine, StateBus, TradingStateManager};

struct Harness {
    app: AppState,
    close_port: Arc<MemoryClosePosition>,
    audit_store: Arc<MemoryAuditStore>,
    alert_store: Arc<MemoryAlertStore>,
}

fn harness_with_emergency(emergency: MemoryEmergency) -> Harness {
    let now = Utc::now();
    let close_port = Arc::new(MemoryClosePosition::new());
    let audit_store = Arc::new(MemoryAuditStore::new());
    let alert_store = Arc::new(MemoryAlertStore::new());
    let app = AppState::new(
        TradingStateManager::new(now),
        ModeMachine::new(DegradationConfig::default(), now),
        RiskEngine::new(RiskLimitsConfig::default()),
        Arc::new(AuditService::new(
            Arc::clone(&audit_store) as _,
            RedactionRules::default(),
        )),
        Arc::new(AlertService::new(Arc::clone(&alert_store) as _, None)),
        StateBus::new(64),
        Arc::clone(&close_port) as _,
        Arc::new(MemoryIdempotency::new()),
        Arc::new(emergency),
    );
    Harness {
        app,
        close_port,
        audit_store,
        alert_store,
    }
}

fn harness() -> Harness {
    harness_with_emergency(MemoryEmergency::succeeding(2, 3))
}

async fn request(app: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    request_with_headers(app, method, uri, body, &[]).await
}

async fn request_with_headers(
    app: &AppState,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let router = build_router(Arc::new(app.clone()));
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

// ---------------------------------------------------------------------------
// Trading state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resume_after_halt_requires_enable_resume() {
    let h = harness();

    let (status, _) = request(
        &h.app,
        "POST",
        "/risk/halt",
        Some(json!({"reason": "drift detected"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Resume without enable: 400 policy error.
    let (status, body) = request(&h.app, "POST", "/risk/resume", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_kind"], "policy");

    // Enable, then resume succeeds.
    let (status, _) = request(&h.app, "POST", "/risk/enable-resume", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = request(&h.app, "POST", "/risk/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "RUNNING");
}

#[tokio::test]
async fn pause_then_resume_round_trips() {
    let h = harness();
    let (status, body) = request(
        &h.app,
        "POST",
        "/risk/pause",
        Some(json!({"reason": "maintenance"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "PAUSED");

    let (status, body) = request(&h.app, "POST", "/risk/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "RUNNING");
}

#[tokio::test]
async fn risk_state_reflects_halt_reason() {
    let h = harness();
    request(
        &h.app,
        "POST",
        "/risk/halt",
        Some(json!({"reason": "manual stop"})),
    )
    .await;

    let (status, body) = request(&h.app, "GET", "/risk/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["trading_state"]["state"], "HALTED");
    assert_eq!(body["trading_state"]["reason"], "manual stop");
    assert_eq!(body["trading_state"]["can_resume"], false);
}

// ---------------------------------------------------------------------------
// Kill switch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn kill_switch_reports_per_action_outcomes() {
    let h = harness();
    let (status, body) = request(&h.app, "POST", "/risk/kill-switch", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["halted"], true);

    let outcomes = body["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0]["action"], "halt");
    assert_eq!(outcomes[1]["action"], "cancel_all");
    assert_eq!(outcomes[1]["ok"], true);
    assert_eq!(outcomes[2]["action"], "flatten_all");

    // Kill switch is sticky in the risk engine.
    let (_, state) = request(&h.app, "GET", "/risk/state", None).await;
    assert_eq!(state["kill_switch_engaged"], true);
}

#[tokio::test]
async fn kill_switch_partial_failure_still_halts() {
    let h = harness_with_emergency(MemoryEmergency::failing_flatten(1, "broker unreachable"));
    let (status, body) = request(&h.app, "POST", "/risk/kill-switch", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["halted"], true);

    let outcomes = body["outcomes"].as_array().unwrap();
    let flatten = outcomes.iter().find(|o| o["action"] == "flatten_all").unwrap();
    assert_eq!(flatten["ok"], false);
    assert!(flatten["detail"].as_str().unwrap().contains("broker unreachable"));
}

// ---------------------------------------------------------------------------
// Close idempotency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_position_replay_returns_cached_response() {
    let h = harness();

    let (status, first) = request_with_headers(
        &h.app,
        "POST",
        "/positions/42/close",
        Some(json!({"reason": "manual"})),
        &[("Idempotency-Key", "K1")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let first_id = first["close_request_id"].as_str().unwrap().to_string();

    let (status, second) = request_with_headers(
        &h.app,
        "POST",
        "/positions/42/close",
        Some(json!({"reason": "manual"})),
        &[("Idempotency-Key", "K1")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["close_request_id"].as_str().unwrap(), first_id);

    // Exactly one close request was ever created, carrying the reason.
    assert_eq!(h.close_port.created_count(), 1);
    assert_eq!(h.close_port.last_reason().as_deref(), Some("manual"));

    // The creation produced an audit row with the reason; the replay did not.
    let close_audits: Vec<_> = h
        .audit_store
        .rows()
        .into_iter()
        .filter(|r| r.event_type == "position_close_requested")
        .collect();
    assert_eq!(close_audits.len(), 1);
    assert_eq!(close_audits[0].new_value.as_ref().unwrap()["reason"], "manual");
}

#[tokio::test]
async fn close_position_requires_idempotency_key() {
    let h = harness();
    let (status, body) = request(
        &h.app,
        "POST",
        "/positions/42/close",
        Some(json!({"reason": "manual"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_kind"], "policy");
}

#[tokio::test]
async fn close_position_blocked_when_halted() {
    let h = harness();
    request(&h.app, "POST", "/risk/halt", Some(json!({"reason": "stop"}))).await;

    let (status, _) = request_with_headers(
        &h.app,
        "POST",
        "/positions/42/close",
        None,
        &[("Idempotency-Key", "K2")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // PAUSED still allows closes.
    request(&h.app, "POST", "/risk/enable-resume", None).await;
    request(&h.app, "POST", "/risk/resume", None).await;
    request(&h.app, "POST", "/risk/pause", None).await;
    let (status, _) = request_with_headers(
        &h.app,
        "POST",
        "/positions/42/close",
        None,
        &[("Idempotency-Key", "K3")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Degradation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn force_override_pins_mode_with_ttl() {
    let h = harness();

    let (status, body) = request(
        &h.app,
        "POST",
        "/degradation/force",
        Some(json!({
            "mode": "safe_mode",
            "ttl_seconds": 600,
            "operator_id": "op-1",
            "reason": "broker maintenance",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "safe_mode");
    assert_eq!(body["is_force_override"], true);
    assert!(body["override_expires_at"].is_string());

    let (_, status_body) = request(&h.app, "GET", "/degradation/status", None).await;
    assert_eq!(status_body["mode"], "safe_mode");
    assert_eq!(status_body["stage"], 2);
}

#[tokio::test]
async fn permissions_table_matches_mode_policy() {
    let h = harness();
    request(
        &h.app,
        "POST",
        "/degradation/force",
        Some(json!({
            "mode": "safe_mode_disconnected",
            "operator_id": "op-1",
            "reason": "link down",
        })),
    )
    .await;

    let (status, body) = request(&h.app, "GET", "/degradation/permissions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "safe_mode_disconnected");

    let permissions = body["permissions"].as_array().unwrap();
    let open = permissions.iter().find(|p| p["action"] == "open").unwrap();
    assert_eq!(open["allowed"], false);
    let reduce = permissions
        .iter()
        .find(|p| p["action"] == "reduce_only")
        .unwrap();
    assert_eq!(reduce["allowed"], true);
    assert_eq!(reduce["local_only"], true);
}

// ---------------------------------------------------------------------------
// Audit coverage of state transitions + chain integrity sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trading_state_transitions_are_audited() {
    let h = harness();

    // The subscriber must exist before the handlers publish.
    let audit_tx = qrl_audit::spawn_batch_writer(Arc::clone(&h.app.audit), 64);
    qrl_daemon::sweeps::spawn_state_audit_subscriber(h.app.bus.subscribe(), audit_tx);

    request(&h.app, "POST", "/risk/pause", Some(json!({"reason": "lunch"}))).await;
    request(&h.app, "POST", "/risk/resume", None).await;
    request(&h.app, "POST", "/risk/halt", Some(json!({"reason": "drift"}))).await;
    request(&h.app, "POST", "/risk/enable-resume", None).await;

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let rows = h.audit_store.rows();
    let states: Vec<String> = rows
        .iter()
        .filter(|r| r.event_type == "trading_state_changed")
        .map(|r| r.new_value.as_ref().unwrap()["state"].as_str().unwrap().to_string())
        .collect();

    assert!(states.contains(&"PAUSED".to_string()), "pause must be audited");
    assert!(states.contains(&"RUNNING".to_string()), "resume must be audited");
    // enable_resume re-publishes HALTED with can_resume set and is Tier-1.
    assert!(
        rows.iter().any(|r| r.event_type == "trading_state_changed"
            && r.new_value.as_ref().unwrap()["state"] == "HALTED"
            && r.new_value.as_ref().unwrap()["can_resume"] == true),
        "enable_resume must be audited"
    );
    // The halt entry itself is Tier-0, written by the handler.
    assert!(rows.iter().any(|r| r.event_type == "trading_halted"));
}

#[tokio::test]
async fn integrity_sweep_halts_on_tampered_chain() {
    use qrl_audit::{ActorType, AuditRecord};
    use qrl_state::SystemMode;

    let h = harness();

    for i in 0..3 {
        h.app
            .audit
            .append(
                AuditRecord::new("order_filled", "system", ActorType::System, "order", format!("o-{i}"))
                    .with_values(None, Some(json!({"qty": i}))),
            )
            .await
            .unwrap();
    }
    h.audit_store.tamper(1, |row| row.new_value = Some(json!({"qty": 999})));

    qrl_daemon::sweeps::spawn_audit_integrity_sweep(
        h.app.clone(),
        std::time::Duration::from_millis(20),
    );
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    // Integrity failure transitions the system to halt, no auto-heal.
    assert_eq!(h.app.mode.read().await.mode(), SystemMode::Halt);

    // The Tier-0 audit_integrity record and the SEV1 alert both exist.
    assert!(h
        .audit_store
        .rows()
        .iter()
        .any(|r| r.event_type == "audit_integrity"));
    assert!(h
        .alert_store
        .alerts()
        .iter()
        .any(|a| a.event.alert_type == qrl_alerts::AlertType::AuditIntegrity));
}

// ---------------------------------------------------------------------------
// Health + reconciliation surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_detailed_is_503_until_checks_pass() {
    let h = harness();

    let (status, _) = request(&h.app, "GET", "/health/detailed", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    h.app
        .set_component_health(vec![qrl_daemon::api_types::ComponentHealth {
            name: "database".into(),
            healthy: true,
            detail: None,
            checked_at: Utc::now(),
        }])
        .await;

    let (status, body) = request(&h.app, "GET", "/health/detailed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);

    let (status, component) = request(&h.app, "GET", "/health/component/database", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(component["name"], "database");

    let (status, _) = request(&h.app, "GET", "/health/component/nonsense", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reconciliation_recent_returns_pushed_discrepancies() {
    let h = harness();
    h.app
        .push_discrepancy(json!({"run_id": "r1", "discrepancy": {"type": "MISSING_LOCAL"}}))
        .await;
    h.app
        .push_discrepancy(json!({"run_id": "r2", "discrepancy": {"type": "CASH_MISMATCH"}}))
        .await;

    let (status, body) = request(&h.app, "GET", "/reconciliation/recent", None).await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 2);
    // Newest first.
    assert_eq!(list[0]["run_id"], "r2");
}
