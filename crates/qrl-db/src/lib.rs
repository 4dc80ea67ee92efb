//! qrl-db
//!
//! Postgres access layer for the core: connection pool, embedded
//! migrations, row-level repositories, advisory locks, the idempotency
//! store, the in-memory WAL buffer for degraded-database operation, and the
//! named-channel stream transport.
//!
//! Repositories are thin: runtime-bound `sqlx::query` with every await
//! carrying `Context`. Domain logic lives in the owning crates; this crate
//! owns SQL and row mapping only.

pub mod advisory;
pub mod alerts;
pub mod audit_store;
pub mod close_requests;
pub mod idempotency;
pub mod orders;
pub mod outbox;
pub mod positions;
pub mod stream;
pub mod wal;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_DB_URL: &str = "DB_URL";

/// Connect to Postgres using `DB_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Connectivity + schema presence, used by the health checkers.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_schema: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_schema: bool,
}
