//! Shared runtime state for the daemon.
//!
//! Handlers receive `State<Arc<AppState>>`. Every service here is
//! explicitly constructed by `wiring`/`main` (or directly by tests) and
//! injected; this module owns no construction logic of its own.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use qrl_alerts::AlertService;
use qrl_audit::AuditService;
use qrl_risk::RiskEngine;
use qrl_state::{ModeMachine, StateBus, TradingStateManager};

use crate::api_types::ComponentHealth;
use crate::ports::{ClosePositionPort, EmergencyActions, IdempotencyPort};

/// How many recent discrepancies the HTTP surface retains.
pub const RECENT_DISCREPANCY_CAP: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub trading: Arc<RwLock<TradingStateManager>>,
    pub mode: Arc<RwLock<ModeMachine>>,
    pub risk: Arc<RwLock<RiskEngine>>,
    pub audit: Arc<AuditService>,
    pub alerts: Arc<AlertService>,
    pub bus: StateBus,
    pub close_port: Arc<dyn ClosePositionPort>,
    pub idempotency: Arc<dyn IdempotencyPort>,
    pub emergency: Arc<dyn EmergencyActions>,
    /// Ring buffer fed by the reconciliation subscriber task.
    pub recent_discrepancies: Arc<RwLock<VecDeque<serde_json::Value>>>,
    /// Latest result per component checker.
    pub component_health: Arc<RwLock<Vec<ComponentHealth>>>,
}

impl AppState {
    /// Assemble state from already-constructed services.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trading: TradingStateManager,
        mode: ModeMachine,
        risk: RiskEngine,
        audit: Arc<AuditService>,
        alerts: Arc<AlertService>,
        bus: StateBus,
        close_port: Arc<dyn ClosePositionPort>,
        idempotency: Arc<dyn IdempotencyPort>,
        emergency: Arc<dyn EmergencyActions>,
    ) -> Self {
        Self {
            trading: Arc::new(RwLock::new(trading)),
            mode: Arc::new(RwLock::new(mode)),
            risk: Arc::new(RwLock::new(risk)),
            audit,
            alerts,
            bus,
            close_port,
            idempotency,
            emergency,
            recent_discrepancies: Arc::new(RwLock::new(VecDeque::new())),
            component_health: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Record a discrepancy for `/reconciliation/recent`, newest first.
    pub async fn push_discrepancy(&self, discrepancy: serde_json::Value) {
        let mut buffer = self.recent_discrepancies.write().await;
        buffer.push_front(discrepancy);
        buffer.truncate(RECENT_DISCREPANCY_CAP);
    }

    pub async fn set_component_health(&self, health: Vec<ComponentHealth>) {
        *self.component_health.write().await = health;
    }

    pub async fn is_healthy(&self) -> bool {
        let components = self.component_health.read().await;
        !components.is_empty() && components.iter().all(|c| c.healthy)
    }
}

/// A minimal health row for components not yet checked.
pub fn unknown_component(name: &str) -> ComponentHealth {
    ComponentHealth {
        name: name.to_string(),
        healthy: false,
        detail: Some("not yet checked".to_string()),
        checked_at: Utc::now(),
    }
}
