//! Scenarios for the delivery hub: per-attempt records on success and
//! failure, and the non-recursive `alert_delivery_failed` path.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use qrl_alerts::{
    create_alert, spawn_delivery_hub, AlertEvent, AlertService, AlertType, ChannelError,
    DestinationRegistry, HubConfig, MemoryAlertStore, NotificationChannel, RoutingConfig,
    Severity,
};

struct ScriptedChannel {
    succeed: bool,
    deliveries: AtomicUsize,
}

#[async_trait]
impl NotificationChannel for ScriptedChannel {
    async fn deliver(&self, _alert: &AlertEvent, _address: &str) -> Result<u16, ChannelError> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok(200)
        } else {
            Err(ChannelError::Status(503))
        }
    }
}

fn registry() -> DestinationRegistry {
    let mut r = DestinationRegistry::new();
    r.insert("webhook:default".into(), "https://hooks.example.com/x".into());
    r
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn successful_delivery_records_sent_attempt() {
    let store = Arc::new(MemoryAlertStore::new());
    let channel = Arc::new(ScriptedChannel {
        succeed: true,
        deliveries: AtomicUsize::new(0),
    });
    let mut channels: BTreeMap<String, Arc<dyn NotificationChannel>> = BTreeMap::new();
    channels.insert("webhook".into(), Arc::clone(&channel) as _);

    let hub = spawn_delivery_hub(
        Arc::clone(&store) as _,
        RoutingConfig::default(),
        registry(),
        channels,
        HubConfig::default(),
    );
    let service = AlertService::new(Arc::clone(&store) as _, Some(hub));

    let alert = create_alert(AlertType::OrderRejected, Severity::Sev2, "rejected")
        .symbol("AAPL")
        .build();
    assert!(service.emit(alert).await);
    settle().await;

    assert_eq!(channel.deliveries.load(Ordering::SeqCst), 1);
    let deliveries = store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, "sent");
    assert_eq!(deliveries[0].response_code, Some(200));
    assert_eq!(deliveries[0].attempt_number, 1);
}

#[tokio::test]
async fn failed_delivery_persists_failure_alert_without_sending_it() {
    let store = Arc::new(MemoryAlertStore::new());
    let channel = Arc::new(ScriptedChannel {
        succeed: false,
        deliveries: AtomicUsize::new(0),
    });
    let mut channels: BTreeMap<String, Arc<dyn NotificationChannel>> = BTreeMap::new();
    channels.insert("webhook".into(), Arc::clone(&channel) as _);

    let hub = spawn_delivery_hub(
        Arc::clone(&store) as _,
        RoutingConfig::default(),
        registry(),
        channels,
        HubConfig::default(),
    );
    let service = AlertService::new(Arc::clone(&store) as _, Some(hub));

    let alert = create_alert(AlertType::OrderRejected, Severity::Sev2, "rejected")
        .symbol("AAPL")
        .build();
    service.emit(alert).await;
    settle().await;

    // The attempt is recorded as failed.
    let deliveries = store.deliveries();
    assert_eq!(deliveries.len(), 1, "no delivery rows for the failure alert itself");
    assert_eq!(deliveries[0].status, "failed");

    // The failure alert exists but was never delivered (one channel call).
    let alerts = store.alerts();
    assert!(alerts
        .iter()
        .any(|a| a.event.alert_type == AlertType::AlertDeliveryFailed));
    assert_eq!(channel.deliveries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn deduplicated_alert_is_not_redelivered() {
    let store = Arc::new(MemoryAlertStore::new());
    let channel = Arc::new(ScriptedChannel {
        succeed: true,
        deliveries: AtomicUsize::new(0),
    });
    let mut channels: BTreeMap<String, Arc<dyn NotificationChannel>> = BTreeMap::new();
    channels.insert("webhook".into(), Arc::clone(&channel) as _);

    let hub = spawn_delivery_hub(
        Arc::clone(&store) as _,
        RoutingConfig::default(),
        registry(),
        channels,
        HubConfig::default(),
    );
    let service = AlertService::new(Arc::clone(&store) as _, Some(hub));

    let alert = create_alert(AlertType::OrderRejected, Severity::Sev2, "rejected")
        .symbol("AAPL")
        .build();
    service.emit(alert.clone()).await;
    service.emit(alert.clone()).await;
    settle().await;

    assert_eq!(
        channel.deliveries.load(Ordering::SeqCst),
        1,
        "suppressed duplicate must not notify"
    );
    assert_eq!(store.suppressed_count(&alert.dedupe_key), Some(1));
}
