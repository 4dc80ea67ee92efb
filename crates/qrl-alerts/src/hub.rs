//! The delivery hub: a bounded queue drained by a worker pool under a
//! global in-flight semaphore.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, warn};

use crate::channels::NotificationChannel;
use crate::factory::create_alert;
use crate::model::{AlertEvent, AlertType, Severity};
use crate::routing::{destinations_for_alert, DestinationRegistry, RoutingConfig};
use crate::store::AlertStore;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub workers: usize,
    pub max_in_flight: usize,
    pub delivery_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_in_flight: 4,
            delivery_timeout: Duration::from_secs(10),
            queue_capacity: 256,
        }
    }
}

/// Enqueue handle held by the alert service.
#[derive(Clone)]
pub struct DeliveryHub {
    tx: mpsc::Sender<(i64, AlertEvent)>,
}

impl DeliveryHub {
    /// Non-blocking enqueue; a full queue drops with a log (alerting about
    /// a full alert queue would deadlock the failure path).
    pub fn enqueue(&self, alert_id: i64, alert: AlertEvent) {
        if let Err(err) = self.tx.try_send((alert_id, alert)) {
            error!(error = %err, "alert delivery queue full; alert not delivered");
        }
    }
}

struct HubInner {
    store: Arc<dyn AlertStore>,
    routing: RoutingConfig,
    registry: DestinationRegistry,
    channels: BTreeMap<String, Arc<dyn NotificationChannel>>,
    semaphore: Arc<Semaphore>,
    delivery_timeout: Duration,
}

/// Spawn the hub's worker pool. Returns the enqueue handle.
pub fn spawn_delivery_hub(
    store: Arc<dyn AlertStore>,
    routing: RoutingConfig,
    registry: DestinationRegistry,
    channels: BTreeMap<String, Arc<dyn NotificationChannel>>,
    config: HubConfig,
) -> DeliveryHub {
    let (tx, rx) = mpsc::channel::<(i64, AlertEvent)>(config.queue_capacity);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    let inner = Arc::new(HubInner {
        store,
        routing,
        registry,
        channels,
        semaphore: Arc::new(Semaphore::new(config.max_in_flight)),
        delivery_timeout: config.delivery_timeout,
    });

    for worker_id in 0..config.workers.max(1) {
        let rx = Arc::clone(&rx);
        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                let next = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };
                match next {
                    Some((alert_id, alert)) => deliver_alert(&inner, alert_id, &alert).await,
                    None => {
                        debug!(worker_id, "alert hub queue closed; worker exiting");
                        break;
                    }
                }
            }
        });
    }

    DeliveryHub { tx }
}

async fn deliver_alert(inner: &HubInner, alert_id: i64, alert: &AlertEvent) {
    let destinations = destinations_for_alert(alert, &inner.routing, &inner.registry);
    if destinations.is_empty() {
        debug!(alert_id, alert_type = alert.alert_type.as_str(), "no destinations; log only");
        return;
    }

    for destination in destinations {
        let _permit = inner
            .semaphore
            .acquire()
            .await
            .expect("hub semaphore never closes");

        let delivery_id = match inner
            .store
            .insert_delivery_attempt(alert_id, &destination.channel, &destination.destination_key)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                error!(alert_id, error = %err, "delivery attempt record failed");
                continue;
            }
        };

        let Some(channel) = inner.channels.get(&destination.channel) else {
            let _ = inner
                .store
                .complete_delivery_attempt(delivery_id, "failed", None, Some("no such channel"))
                .await;
            continue;
        };

        let outcome = tokio::time::timeout(
            inner.delivery_timeout,
            channel.deliver(alert, &destination.address),
        )
        .await;

        match outcome {
            Ok(Ok(code)) => {
                let _ = inner
                    .store
                    .complete_delivery_attempt(delivery_id, "sent", Some(code as i32), None)
                    .await;
            }
            Ok(Err(err)) => {
                warn!(alert_id, channel = %destination.channel, error = %err, "delivery failed");
                let _ = inner
                    .store
                    .complete_delivery_attempt(delivery_id, "failed", None, Some(&err.to_string()))
                    .await;
                persist_delivery_failure(inner, alert, &destination.channel, &err.to_string())
                    .await;
            }
            Err(_elapsed) => {
                warn!(alert_id, channel = %destination.channel, "delivery timed out");
                let _ = inner
                    .store
                    .complete_delivery_attempt(delivery_id, "failed", None, Some("timeout"))
                    .await;
                persist_delivery_failure(inner, alert, &destination.channel, "timeout").await;
            }
        }
    }
}

/// Delivery failures are persisted but never sent — sending a failure alert
/// through the failing channel would recurse.
async fn persist_delivery_failure(
    inner: &HubInner,
    original: &AlertEvent,
    channel: &str,
    error: &str,
) {
    let failure = create_alert(
        AlertType::AlertDeliveryFailed,
        Severity::Sev2,
        format!("alert delivery via {channel} failed"),
    )
    .details(serde_json::json!({
        "channel": channel,
        "error": error,
        "original_type": original.alert_type.as_str(),
        "original_fingerprint": original.fingerprint,
    }))
    .build();

    if let Err(err) = inner.store.persist(&failure).await {
        error!(error = %err, "failed to persist delivery-failure alert");
    }
}
