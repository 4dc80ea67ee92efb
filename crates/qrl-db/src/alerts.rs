//! Alert + delivery-attempt repository.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// Row shape for [`persist_alert`]; field semantics match the alert factory.
#[derive(Debug, Clone)]
pub struct NewAlertRow {
    pub alert_type: String,
    pub severity: String,
    pub fingerprint: String,
    pub dedupe_key: String,
    pub summary: String,
    pub details: Option<serde_json::Value>,
    pub account_id: Option<String>,
    pub symbol: Option<String>,
    pub strategy_id: Option<String>,
    pub position_id: Option<i64>,
    pub event_timestamp: DateTime<Utc>,
}

/// Atomic upsert keyed by `dedupe_key`.
///
/// A new key inserts and returns `(true, id)`. A duplicate increments
/// `suppressed_count` and returns `(false, existing id)` — one round trip,
/// no read-then-write race.
pub async fn persist_alert(pool: &PgPool, alert: &NewAlertRow) -> Result<(bool, i64)> {
    let row = sqlx::query(
        r#"
        insert into alerts (
          type, severity, fingerprint, dedupe_key, summary, details,
          account_id, symbol, strategy_id, position_id, event_timestamp
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
        on conflict (dedupe_key) do update
          set suppressed_count = alerts.suppressed_count + 1
        returning id, (xmax = 0) as inserted
        "#,
    )
    .bind(&alert.alert_type)
    .bind(&alert.severity)
    .bind(&alert.fingerprint)
    .bind(&alert.dedupe_key)
    .bind(&alert.summary)
    .bind(&alert.details)
    .bind(&alert.account_id)
    .bind(&alert.symbol)
    .bind(&alert.strategy_id)
    .bind(alert.position_id)
    .bind(alert.event_timestamp)
    .fetch_one(pool)
    .await
    .context("persist_alert failed")?;

    let id: i64 = row.try_get("id")?;
    let inserted: bool = row.try_get("inserted")?;
    Ok((inserted, id))
}

/// Record one delivery attempt. `attempt_number` is `prev + 1` per
/// `(alert, destination)`.
pub async fn insert_delivery_attempt(
    pool: &PgPool,
    alert_id: i64,
    channel: &str,
    destination_key: &str,
) -> Result<i64> {
    let row = sqlx::query(
        r#"
        insert into alert_deliveries (alert_id, channel, destination_key, attempt_number, status)
        values (
          $1, $2, $3,
          coalesce((
            select max(attempt_number) from alert_deliveries
            where alert_id = $1 and destination_key = $3
          ), 0) + 1,
          'pending'
        )
        returning id
        "#,
    )
    .bind(alert_id)
    .bind(channel)
    .bind(destination_key)
    .fetch_one(pool)
    .await
    .context("insert_delivery_attempt failed")?;
    Ok(row.try_get("id")?)
}

pub async fn complete_delivery_attempt(
    pool: &PgPool,
    delivery_id: i64,
    status: &str,
    response_code: Option<i32>,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        update alert_deliveries
        set status = $2, response_code = $3, error_message = $4, sent_at = now()
        where id = $1
        "#,
    )
    .bind(delivery_id)
    .bind(status)
    .bind(response_code)
    .bind(error_message)
    .execute(pool)
    .await
    .context("complete_delivery_attempt failed")?;
    Ok(())
}

/// Recent alerts for the HTTP surface, newest first.
pub async fn recent_alerts(pool: &PgPool, limit: i64) -> Result<Vec<serde_json::Value>> {
    let rows = sqlx::query(
        r#"
        select row_to_json(a) as alert
        from (
          select id, type, severity, fingerprint, dedupe_key, summary, details,
                 account_id, symbol, strategy_id, position_id, suppressed_count,
                 event_timestamp, created_at
          from alerts
          order by created_at desc
          limit $1
        ) a
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("recent_alerts failed")?;
    rows.iter()
        .map(|r| r.try_get("alert").context("decode alert row"))
        .collect()
}
