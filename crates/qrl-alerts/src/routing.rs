//! Alert routing: severity gates channels, type and global recipients add
//! destination keys, the registry resolves keys to addresses, and the
//! resulting (channel, address) pairs are deduplicated.

use std::collections::BTreeMap;

use crate::model::{AlertEvent, AlertType, Severity};

/// Destination key → resolved address. Built from the environment at
/// startup (`ALERT_EMAIL_*`, `ALERT_WEBHOOK_*`).
pub type DestinationRegistry = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Severity → enabled channel kinds.
    pub severity_channels: BTreeMap<Severity, Vec<String>>,
    /// Alert type → additional destination keys.
    pub type_recipients: BTreeMap<AlertType, Vec<String>>,
    /// Destination keys applied to every alert.
    pub global_recipients: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let mut severity_channels = BTreeMap::new();
        severity_channels.insert(Severity::Sev1, vec!["email".to_string(), "webhook".to_string()]);
        severity_channels.insert(Severity::Sev2, vec!["webhook".to_string()]);
        severity_channels.insert(Severity::Sev3, vec![]); // log only

        let mut type_recipients = BTreeMap::new();
        type_recipients.insert(AlertType::DailyLossLimit, vec!["email:risk".to_string()]);
        type_recipients.insert(
            AlertType::KillSwitchActivated,
            vec!["email:ops".to_string(), "email:risk".to_string()],
        );
        type_recipients.insert(AlertType::PositionLimitHit, vec!["email:risk".to_string()]);

        Self {
            severity_channels,
            type_recipients,
            global_recipients: vec!["email:default".to_string(), "webhook:default".to_string()],
        }
    }
}

/// A resolved delivery target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub channel: String,
    pub destination_key: String,
    pub address: String,
}

/// Resolve every delivery destination for an alert.
///
/// Keys whose channel is not enabled for the severity are filtered; keys
/// the registry cannot resolve are dropped; resolved (channel, address)
/// pairs are deduplicated.
pub fn destinations_for_alert(
    alert: &AlertEvent,
    config: &RoutingConfig,
    registry: &DestinationRegistry,
) -> Vec<Destination> {
    let enabled = match config.severity_channels.get(&alert.severity) {
        Some(channels) if !channels.is_empty() => channels,
        _ => return Vec::new(),
    };

    let mut keys: Vec<&str> = Vec::new();
    if let Some(recipients) = config.type_recipients.get(&alert.alert_type) {
        keys.extend(recipients.iter().map(String::as_str));
    }
    keys.extend(config.global_recipients.iter().map(String::as_str));

    let mut seen: Vec<(String, String)> = Vec::new();
    let mut result = Vec::new();
    for key in keys {
        let channel = key.split(':').next().unwrap_or_default().to_string();
        if !enabled.contains(&channel) {
            continue;
        }
        let Some(address) = registry.get(key) else {
            continue; // unresolved names are dropped
        };
        let pair = (channel.clone(), address.clone());
        if seen.contains(&pair) {
            continue;
        }
        seen.push(pair);
        result.push(Destination {
            channel,
            destination_key: key.to_string(),
            address: address.clone(),
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::create_alert;

    fn registry() -> DestinationRegistry {
        let mut r = DestinationRegistry::new();
        r.insert("email:default".into(), "ops@example.com".into());
        r.insert("email:risk".into(), "risk@example.com".into());
        r.insert("webhook:default".into(), "https://hooks.example.com/x".into());
        r
    }

    #[test]
    fn sev1_routes_email_and_webhook() {
        let alert = create_alert(AlertType::DailyLossLimit, Severity::Sev1, "loss").build();
        let destinations = destinations_for_alert(&alert, &RoutingConfig::default(), &registry());

        let channels: Vec<&str> = destinations.iter().map(|d| d.channel.as_str()).collect();
        assert!(channels.contains(&"email"));
        assert!(channels.contains(&"webhook"));
        // Type recipient email:risk comes before the globals.
        assert_eq!(destinations[0].destination_key, "email:risk");
    }

    #[test]
    fn sev2_routes_webhook_only() {
        let alert = create_alert(AlertType::OrderRejected, Severity::Sev2, "rejected").build();
        let destinations = destinations_for_alert(&alert, &RoutingConfig::default(), &registry());
        assert_eq!(destinations.len(), 1);
        assert_eq!(destinations[0].channel, "webhook");
    }

    #[test]
    fn sev3_routes_nowhere() {
        let alert = create_alert(AlertType::OrderRejected, Severity::Sev3, "info").build();
        assert!(
            destinations_for_alert(&alert, &RoutingConfig::default(), &registry()).is_empty()
        );
    }

    #[test]
    fn unresolved_keys_are_dropped() {
        let alert =
            create_alert(AlertType::KillSwitchActivated, Severity::Sev1, "killed").build();
        // Registry lacks email:ops; it silently drops.
        let destinations = destinations_for_alert(&alert, &RoutingConfig::default(), &registry());
        assert!(destinations.iter().all(|d| d.destination_key != "email:ops"));
        assert!(destinations.iter().any(|d| d.destination_key == "email:risk"));
    }

    #[test]
    fn duplicate_resolved_pairs_collapse() {
        let mut reg = registry();
        // risk and default resolve to the same mailbox.
        reg.insert("email:risk".into(), "ops@example.com".into());

        let alert = create_alert(AlertType::DailyLossLimit, Severity::Sev1, "loss").build();
        let destinations = destinations_for_alert(&alert, &RoutingConfig::default(), &reg);
        let email_count = destinations.iter().filter(|d| d.channel == "email").count();
        assert_eq!(email_count, 1, "same (channel, address) pair must dedupe");
    }
}
