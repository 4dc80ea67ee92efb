//! Request/response DTOs and the structured error payload.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use qrl_state::{Permission, SystemMode, TradingState};

// ---------------------------------------------------------------------------
// Error payload: {error_kind, message, details?}
// ---------------------------------------------------------------------------

/// The error taxonomy surfaced to HTTP clients (spec'd error kinds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    Integrity,
    Policy,
    Programmer,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error_kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip)]
    pub status: StatusCode,
}

impl ApiError {
    pub fn policy(message: impl Into<String>) -> Self {
        Self {
            error_kind: ErrorKind::Policy,
            message: message.into(),
            details: None,
            status: StatusCode::BAD_REQUEST,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            error_kind: ErrorKind::Policy,
            message: message.into(),
            details: None,
            status: StatusCode::NOT_FOUND,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            error_kind: ErrorKind::Permanent,
            message: message.into(),
            details: None,
            status: StatusCode::CONFLICT,
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self {
            error_kind: ErrorKind::Transient,
            message: message.into(),
            details: None,
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Risk / trading state
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct RiskStateResponse {
    pub trading_state: TradingState,
    pub kill_switch_engaged: bool,
    pub kill_switch_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HaltRequest {
    pub reason: String,
    #[serde(default)]
    pub operator_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PauseRequest {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub operator_id: Option<String>,
}

/// Per-action outcome of the compound kill-switch endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct KillSwitchOutcome {
    pub action: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KillSwitchResponse {
    pub halted: bool,
    pub outcomes: Vec<KillSwitchOutcome>,
}

// ---------------------------------------------------------------------------
// Degradation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct DegradationStatusResponse {
    pub mode: SystemMode,
    pub stage: u8,
    pub is_force_override: bool,
    pub override_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ForceModeRequest {
    pub mode: SystemMode,
    pub ttl_seconds: Option<u64>,
    pub operator_id: String,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub action: String,
    #[serde(flatten)]
    pub permission: Permission,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionsResponse {
    pub mode: SystemMode,
    pub permissions: Vec<PermissionEntry>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub healthy: bool,
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetailedHealthResponse {
    pub healthy: bool,
    pub components: Vec<ComponentHealth>,
}

// ---------------------------------------------------------------------------
// Close position
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct ClosePositionRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClosePositionApiResponse {
    pub close_request_id: Uuid,
    pub position_id: i64,
    pub status: String,
}
