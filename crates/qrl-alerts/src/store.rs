//! Alert persistence seam: atomic dedupe-key upsert returning
//! `(is_new, alert_id)`, plus per-attempt delivery records.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use qrl_db::alerts::NewAlertRow;

use crate::model::AlertEvent;

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Atomic upsert keyed by `dedupe_key`. On conflict the stored row's
    /// `suppressed_count` increments and `is_new` is false.
    async fn persist(&self, alert: &AlertEvent) -> Result<(bool, i64)>;

    /// Record a delivery attempt (`attempt_number = prev + 1`); returns the
    /// delivery row id.
    async fn insert_delivery_attempt(
        &self,
        alert_id: i64,
        channel: &str,
        destination_key: &str,
    ) -> Result<i64>;

    async fn complete_delivery_attempt(
        &self,
        delivery_id: i64,
        status: &str,
        response_code: Option<i32>,
        error_message: Option<&str>,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn persist(&self, alert: &AlertEvent) -> Result<(bool, i64)> {
        let row = NewAlertRow {
            alert_type: alert.alert_type.as_str().to_string(),
            severity: alert.severity.as_str().to_string(),
            fingerprint: alert.fingerprint.clone(),
            dedupe_key: alert.dedupe_key.clone(),
            summary: alert.summary.clone(),
            details: alert.details.clone(),
            account_id: alert.account_id.clone(),
            symbol: alert.symbol.clone(),
            strategy_id: alert.strategy_id.clone(),
            position_id: alert.position_id,
            event_timestamp: alert.event_timestamp,
        };
        qrl_db::alerts::persist_alert(&self.pool, &row).await
    }

    async fn insert_delivery_attempt(
        &self,
        alert_id: i64,
        channel: &str,
        destination_key: &str,
    ) -> Result<i64> {
        qrl_db::alerts::insert_delivery_attempt(&self.pool, alert_id, channel, destination_key)
            .await
    }

    async fn complete_delivery_attempt(
        &self,
        delivery_id: i64,
        status: &str,
        response_code: Option<i32>,
        error_message: Option<&str>,
    ) -> Result<()> {
        qrl_db::alerts::complete_delivery_attempt(
            &self.pool,
            delivery_id,
            status,
            response_code,
            error_message,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// A persisted alert as the memory store sees it.
#[derive(Debug, Clone)]
pub struct StoredAlert {
    pub id: i64,
    pub event: AlertEvent,
    pub suppressed_count: i32,
}

#[derive(Debug, Clone)]
pub struct StoredDelivery {
    pub id: i64,
    pub alert_id: i64,
    pub channel: String,
    pub destination_key: String,
    pub attempt_number: i32,
    pub status: String,
    pub response_code: Option<i32>,
    pub error_message: Option<String>,
}

#[derive(Default)]
pub struct MemoryAlertStore {
    by_dedupe_key: Mutex<HashMap<String, StoredAlert>>,
    deliveries: Mutex<Vec<StoredDelivery>>,
    next_id: Mutex<i64>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<StoredAlert> {
        self.by_dedupe_key
            .lock()
            .expect("alert store lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn deliveries(&self) -> Vec<StoredDelivery> {
        self.deliveries.lock().expect("alert store lock").clone()
    }

    pub fn suppressed_count(&self, dedupe_key: &str) -> Option<i32> {
        self.by_dedupe_key
            .lock()
            .expect("alert store lock")
            .get(dedupe_key)
            .map(|a| a.suppressed_count)
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn persist(&self, alert: &AlertEvent) -> Result<(bool, i64)> {
        let mut map = self.by_dedupe_key.lock().expect("alert store lock");
        if let Some(existing) = map.get_mut(&alert.dedupe_key) {
            existing.suppressed_count += 1;
            return Ok((false, existing.id));
        }
        let mut next = self.next_id.lock().expect("alert store lock");
        *next += 1;
        map.insert(
            alert.dedupe_key.clone(),
            StoredAlert {
                id: *next,
                event: alert.clone(),
                suppressed_count: 0,
            },
        );
        Ok((true, *next))
    }

    async fn insert_delivery_attempt(
        &self,
        alert_id: i64,
        channel: &str,
        destination_key: &str,
    ) -> Result<i64> {
        let mut deliveries = self.deliveries.lock().expect("alert store lock");
        let attempt_number = deliveries
            .iter()
            .filter(|d| d.alert_id == alert_id && d.destination_key == destination_key)
            .map(|d| d.attempt_number)
            .max()
            .unwrap_or(0)
            + 1;
        let mut next = self.next_id.lock().expect("alert store lock");
        *next += 1;
        deliveries.push(StoredDelivery {
            id: *next,
            alert_id,
            channel: channel.to_string(),
            destination_key: destination_key.to_string(),
            attempt_number,
            status: "pending".to_string(),
            response_code: None,
            error_message: None,
        });
        Ok(*next)
    }

    async fn complete_delivery_attempt(
        &self,
        delivery_id: i64,
        status: &str,
        response_code: Option<i32>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut deliveries = self.deliveries.lock().expect("alert store lock");
        if let Some(d) = deliveries.iter_mut().find(|d| d.id == delivery_id) {
            d.status = status.to_string();
            d.response_code = response_code;
            d.error_message = error_message.map(str::to_string);
        }
        Ok(())
    }
}
