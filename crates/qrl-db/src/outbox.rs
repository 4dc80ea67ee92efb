//! Outbox repository: transactional enqueue, skip-locked claim, terminal
//! transitions, retention cleanup.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};

use qrl_schemas::{OutboxEvent, OutboxPayload, OutboxStatus};

fn event_from_row(row: &sqlx::postgres::PgRow) -> Result<OutboxEvent> {
    Ok(OutboxEvent {
        id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        status: serde_json::from_value(serde_json::Value::String(
            row.try_get::<String, _>("status")?,
        ))
        .context("decode status")?,
        retry_count: row.try_get("retry_count")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

/// Enqueue inside the caller's business transaction: the state change and
/// the outbox row commit together or not at all.
pub async fn enqueue(tx: &mut Transaction<'_, Postgres>, payload: &OutboxPayload) -> Result<i64> {
    let value = payload.to_value().context("outbox payload over budget")?;
    let row = sqlx::query(
        r#"
        insert into outbox_events (event_type, payload, status)
        values ($1, $2, 'pending')
        returning id
        "#,
    )
    .bind(payload.event_type())
    .bind(&value)
    .fetch_one(&mut **tx)
    .await
    .context("outbox enqueue failed")?;
    Ok(row.try_get("id")?)
}

/// Claim up to `limit` pending events in `created_at` order.
///
/// `FOR UPDATE SKIP LOCKED` makes concurrent workers disjoint: each claimed
/// row flips to `processing` under its row lock before the claim commits.
pub async fn claim_pending(pool: &PgPool, limit: i64) -> Result<Vec<OutboxEvent>> {
    let mut tx = pool.begin().await.context("claim begin failed")?;

    let rows = sqlx::query(
        r#"
        update outbox_events
        set status = 'processing'
        where id in (
            select id from outbox_events
            where status = 'pending'
            order by created_at
            limit $1
            for update skip locked
        )
        returning *
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *tx)
    .await
    .context("outbox claim failed")?;

    tx.commit().await.context("claim commit failed")?;
    rows.iter().map(event_from_row).collect()
}

pub async fn mark_completed(pool: &PgPool, event_id: i64) -> Result<()> {
    sqlx::query(
        "update outbox_events set status = 'completed', processed_at = now() where id = $1",
    )
    .bind(event_id)
    .execute(pool)
    .await
    .context("outbox mark_completed failed")?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, event_id: i64) -> Result<()> {
    sqlx::query("update outbox_events set status = 'failed', processed_at = now() where id = $1")
        .bind(event_id)
        .execute(pool)
        .await
        .context("outbox mark_failed failed")?;
    Ok(())
}

/// Increment retry and revert to `pending` so another worker can claim.
/// Returns the new retry count.
pub async fn release_for_retry(pool: &PgPool, event_id: i64) -> Result<i32> {
    let row = sqlx::query(
        r#"
        update outbox_events
        set retry_count = retry_count + 1, status = 'pending'
        where id = $1
        returning retry_count
        "#,
    )
    .bind(event_id)
    .fetch_one(pool)
    .await
    .context("outbox release_for_retry failed")?;
    Ok(row.try_get("retry_count")?)
}

/// Delete terminal events older than the retention window. `pending` and
/// `processing` rows are preserved regardless of age. Returns rows deleted.
pub async fn cleanup(pool: &PgPool, retention_days: i64) -> Result<u64> {
    let cutoff = Utc::now() - Duration::days(retention_days);
    let result = sqlx::query(
        r#"
        delete from outbox_events
        where status in ('completed','failed') and created_at < $1
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await
    .context("outbox cleanup failed")?;
    Ok(result.rows_affected())
}

/// Count pending rows plus rows for a close request, used by tests and the
/// storage monitor.
pub async fn count_by_status(pool: &PgPool, status: OutboxStatus) -> Result<i64> {
    let row = sqlx::query("select count(*)::bigint as n from outbox_events where status = $1")
        .bind(status.as_str())
        .fetch_one(pool)
        .await
        .context("outbox count failed")?;
    Ok(row.try_get("n")?)
}
