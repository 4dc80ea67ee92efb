//! Close request repository.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use qrl_schemas::{CloseRequest, CloseRequestStatus, Side};

fn close_request_from_row(row: &sqlx::postgres::PgRow) -> Result<CloseRequest> {
    Ok(CloseRequest {
        id: row.try_get("id")?,
        position_id: row.try_get("position_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        status: serde_json::from_value(serde_json::Value::String(
            row.try_get::<String, _>("status")?,
        ))
        .context("decode status")?,
        symbol: row.try_get("symbol")?,
        side: serde_json::from_value(serde_json::Value::String(row.try_get::<String, _>("side")?))
            .context("decode side")?,
        target_qty: row.try_get("target_qty")?,
        filled_qty: row.try_get("filled_qty")?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
        submitted_at: row.try_get("submitted_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Insert a new close request inside the caller's transaction.
#[allow(clippy::too_many_arguments)]
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    position_id: i64,
    idempotency_key: &str,
    symbol: &str,
    side: Side,
    target_qty: i64,
    max_retries: i32,
    reason: Option<&str>,
) -> Result<CloseRequest> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        r#"
        insert into close_requests (
          id, position_id, idempotency_key, status, symbol, side,
          target_qty, filled_qty, retry_count, max_retries, reason, created_at
        ) values ($1,$2,$3,'pending',$4,$5,$6,0,0,$7,$8,$9)
        "#,
    )
    .bind(id)
    .bind(position_id)
    .bind(idempotency_key)
    .bind(symbol)
    .bind(side.as_str())
    .bind(target_qty)
    .bind(max_retries)
    .bind(reason)
    .bind(now)
    .execute(&mut **tx)
    .await
    .context("close_request insert failed")?;

    Ok(CloseRequest {
        id,
        position_id,
        idempotency_key: idempotency_key.to_string(),
        status: CloseRequestStatus::Pending,
        symbol: symbol.to_string(),
        side,
        target_qty,
        filled_qty: 0,
        retry_count: 0,
        max_retries,
        reason: reason.map(str::to_string),
        created_at: now,
        submitted_at: None,
        completed_at: None,
    })
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<CloseRequest>> {
    let row = sqlx::query("select * from close_requests where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("close_request get failed")?;
    let decoded = row.as_ref().map(close_request_from_row).transpose()?;

    // Generated-column cross-check: a stored remaining_qty that disagrees
    // with target - filled is data corruption.
    if let (Some(cr), Some(row)) = (&decoded, &row) {
        let stored: i64 = row.try_get("remaining_qty")?;
        if stored != cr.remaining_qty() {
            anyhow::bail!(
                "close_request {} remaining_qty diverged: stored={stored}, computed={}",
                cr.id,
                cr.remaining_qty()
            );
        }
    }
    Ok(decoded)
}

pub async fn get_by_position_and_key(
    pool: &PgPool,
    position_id: i64,
    idempotency_key: &str,
) -> Result<Option<CloseRequest>> {
    let row = sqlx::query(
        "select * from close_requests where position_id = $1 and idempotency_key = $2",
    )
    .bind(position_id)
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await
    .context("close_request get_by_position_and_key failed")?;
    row.as_ref().map(close_request_from_row).transpose()
}

pub async fn update_status(pool: &PgPool, id: Uuid, status: CloseRequestStatus) -> Result<()> {
    let (submitted, completed) = match status {
        CloseRequestStatus::Submitted => (Some(Utc::now()), None),
        CloseRequestStatus::Completed | CloseRequestStatus::Failed => (None, Some(Utc::now())),
        CloseRequestStatus::Pending => (None, None),
    };
    sqlx::query(
        r#"
        update close_requests
        set status = $2,
            submitted_at = coalesce($3, submitted_at),
            completed_at = coalesce($4, completed_at)
        where id = $1
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(submitted)
    .bind(completed)
    .execute(pool)
    .await
    .context("close_request update_status failed")?;
    Ok(())
}

pub async fn increment_filled(pool: &PgPool, id: Uuid, delta: i64) -> Result<()> {
    sqlx::query("update close_requests set filled_qty = filled_qty + $2 where id = $1")
        .bind(id)
        .bind(delta)
        .execute(pool)
        .await
        .context("close_request increment_filled failed")?;
    Ok(())
}
