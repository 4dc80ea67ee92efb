//! qrl-alerts
//!
//! Alert construction, deduplicated persistence, and delivery.
//!
//! Every abnormal event flows through [`AlertService::emit`]: the alert is
//! validated, persisted through an atomic dedupe-key upsert (duplicates
//! increment `suppressed_count` instead of inserting), and — when new, or a
//! recovery type — enqueued to the delivery hub. The hub routes by severity
//! and type to `email`/`webhook` channels under bounded concurrency,
//! recording one `AlertDelivery` row per attempt. A delivery failure raises
//! `alert_delivery_failed` persisted but never sent, so failure handling
//! cannot recurse.

mod channels;
mod factory;
mod hub;
mod model;
mod routing;
mod service;
mod store;

pub use channels::{ChannelError, EmailChannel, NotificationChannel, WebhookChannel};
pub use factory::{create_alert, validate_alert, AlertBuild, DedupePolicy};
pub use hub::{spawn_delivery_hub, DeliveryHub, HubConfig};
pub use model::{AlertEvent, AlertType, Severity, DETAILS_MAX_BYTES, RECOVERY_TYPES};
pub use routing::{destinations_for_alert, DestinationRegistry, RoutingConfig};
pub use service::AlertService;
pub use store::{AlertStore, MemoryAlertStore, PgAlertStore, StoredAlert};
