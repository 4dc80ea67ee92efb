//! The one entry point business modules use to emit alerts.

use std::sync::Arc;

use tracing::{debug, error};

use crate::factory::validate_alert;
use crate::hub::DeliveryHub;
use crate::model::AlertEvent;
use crate::store::AlertStore;

/// Validates, persists (with deduplication), and conditionally enqueues
/// alerts for delivery. Never returns an error: alerting must not take the
/// caller down, so failures log and report `false`.
pub struct AlertService {
    store: Arc<dyn AlertStore>,
    hub: Option<DeliveryHub>,
}

impl AlertService {
    pub fn new(store: Arc<dyn AlertStore>, hub: Option<DeliveryHub>) -> Self {
        Self { store, hub }
    }

    /// Emit an alert. Returns `true` when the alert was processed
    /// (persisted, possibly deduplicated), `false` on any failure.
    pub async fn emit(&self, alert: AlertEvent) -> bool {
        self.emit_inner(alert, true).await
    }

    /// Persist without delivering. Used for `alert_delivery_failed` and any
    /// other alert that must not re-enter the delivery path.
    pub async fn emit_persist_only(&self, alert: AlertEvent) -> bool {
        self.emit_inner(alert, false).await
    }

    async fn emit_inner(&self, alert: AlertEvent, send: bool) -> bool {
        if let Err(reason) = validate_alert(&alert) {
            error!(alert_type = alert.alert_type.as_str(), %reason, "invalid alert dropped");
            return false;
        }

        let (is_new, alert_id) = match self.store.persist(&alert).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    alert_type = alert.alert_type.as_str(),
                    error = %err,
                    "alert persist failed"
                );
                return false;
            }
        };

        if !send {
            return true;
        }

        // Deduplicated alerts stay quiet; recovery types always notify.
        if is_new || alert.is_recovery() {
            if let Some(hub) = &self.hub {
                hub.enqueue(alert_id, alert);
            }
        } else {
            debug!(
                alert_id,
                fingerprint = %alert.fingerprint,
                "alert deduplicated; notification suppressed"
            );
        }
        true
    }
}
