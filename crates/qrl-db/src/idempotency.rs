//! Idempotency key store.
//!
//! Makes client actions (close position, acknowledge alert) and broker
//! fills safe to retry: insert-if-absent with an expiry, first-writer-wins,
//! losers read the cached response. Expired rows are invisible to lookups
//! but physically present until purged.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};

/// Insert-if-absent. Races resolve to first-writer-wins; the return value
/// is `true` when this call created the row.
pub async fn store(
    pool: &PgPool,
    key: &str,
    resource_type: &str,
    resource_id: &str,
    response: &serde_json::Value,
    ttl_hours: i64,
) -> Result<bool> {
    let expires_at = Utc::now() + Duration::hours(ttl_hours);
    let result = sqlx::query(
        r#"
        insert into idempotency_keys (key, resource_type, resource_id, response_data, expires_at)
        values ($1, $2, $3, $4, $5)
        on conflict (key) do nothing
        "#,
    )
    .bind(key)
    .bind(resource_type)
    .bind(resource_id)
    .bind(response)
    .bind(expires_at)
    .execute(pool)
    .await
    .context("idempotency store failed")?;
    Ok(result.rows_affected() == 1)
}

/// Cached response iff the key exists and has not expired.
pub async fn lookup(pool: &PgPool, key: &str) -> Result<Option<serde_json::Value>> {
    let row = sqlx::query(
        r#"
        select response_data from idempotency_keys
        where key = $1 and expires_at > now()
        "#,
    )
    .bind(key)
    .fetch_optional(pool)
    .await
    .context("idempotency lookup failed")?;
    Ok(row.map(|r| r.try_get("response_data")).transpose()?)
}

/// Delete expired rows; returns the count.
pub async fn purge_expired(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("delete from idempotency_keys where expires_at <= now()")
        .execute(pool)
        .await
        .context("idempotency purge failed")?;
    Ok(result.rows_affected())
}
