//! Postgres-backed [`qrl_audit::AuditStore`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};

use qrl_audit::{AuditStore, ChainedAuditEvent};

pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn event_from_row(row: &sqlx::postgres::PgRow) -> Result<ChainedAuditEvent> {
    Ok(ChainedAuditEvent {
        sequence_id: row.try_get("sequence_id")?,
        checksum: row.try_get("checksum")?,
        prev_checksum: row.try_get("prev_checksum")?,
        event_type: row.try_get("event_type")?,
        actor_id: row.try_get("actor_id")?,
        actor_type: serde_json::from_value(serde_json::Value::String(
            row.try_get::<String, _>("actor_type")?,
        ))
        .context("decode actor_type")?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        request_id: row.try_get("request_id")?,
        source: row.try_get("source")?,
        severity: serde_json::from_value(serde_json::Value::String(
            row.try_get::<String, _>("severity")?,
        ))
        .context("decode severity")?,
        old_value: row.try_get("old_value")?,
        new_value: row.try_get("new_value")?,
        value_mode: serde_json::from_value(serde_json::Value::String(
            row.try_get::<String, _>("value_mode")?,
        ))
        .context("decode value_mode")?,
        value_hash: row.try_get("value_hash")?,
        diff: row.try_get("diff")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn chain_head(&self) -> Result<Option<(i64, String)>> {
        let row = sqlx::query(
            "select sequence_id, checksum from audit_events order by sequence_id desc limit 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("audit chain_head failed")?;
        row.map(|r| -> Result<(i64, String)> {
            Ok((r.try_get("sequence_id")?, r.try_get("checksum")?))
        })
        .transpose()
    }

    async fn insert(&self, event: &ChainedAuditEvent) -> Result<()> {
        sqlx::query(
            r#"
            insert into audit_events (
              sequence_id, checksum, prev_checksum, event_type, actor_id, actor_type,
              resource_type, resource_id, request_id, source, severity,
              old_value, new_value, value_mode, value_hash, diff, created_at
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
            "#,
        )
        .bind(event.sequence_id)
        .bind(&event.checksum)
        .bind(&event.prev_checksum)
        .bind(&event.event_type)
        .bind(&event.actor_id)
        .bind(event.actor_type.as_str())
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(&event.request_id)
        .bind(&event.source)
        .bind(event.severity.as_str())
        .bind(&event.old_value)
        .bind(&event.new_value)
        .bind(event.value_mode.as_str())
        .bind(&event.value_hash)
        .bind(&event.diff)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .context("audit insert failed")?;
        Ok(())
    }

    async fn fetch_range(&self, from: i64, to: i64) -> Result<Vec<ChainedAuditEvent>> {
        let rows = sqlx::query(
            r#"
            select * from audit_events
            where sequence_id >= $1 and sequence_id <= $2
            order by sequence_id
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .context("audit fetch_range failed")?;
        rows.iter().map(event_from_row).collect()
    }
}
