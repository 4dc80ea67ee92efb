//! Ports the HTTP handlers call, with Postgres-backed implementations and
//! in-memory doubles for the router tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use qrl_outbox::{ClosePositionError, ClosePositionResponse};
use qrl_schemas::CloseRequestStatus;

// ---------------------------------------------------------------------------
// Close position
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ClosePositionPort: Send + Sync {
    async fn close(
        &self,
        position_id: i64,
        idempotency_key: &str,
        reason: Option<&str>,
    ) -> Result<ClosePositionResponse, ClosePositionError>;
}

pub struct PgClosePosition {
    pool: PgPool,
    max_retries: i32,
}

impl PgClosePosition {
    pub fn new(pool: PgPool, max_retries: i32) -> Self {
        Self { pool, max_retries }
    }
}

#[async_trait]
impl ClosePositionPort for PgClosePosition {
    async fn close(
        &self,
        position_id: i64,
        idempotency_key: &str,
        reason: Option<&str>,
    ) -> Result<ClosePositionResponse, ClosePositionError> {
        qrl_outbox::close_position(
            &self.pool,
            position_id,
            idempotency_key,
            reason,
            self.max_retries,
        )
        .await
    }
}

/// Test double: every close succeeds with a stable id per (position, key)
/// and records what was actually created, including the reason.
#[derive(Default)]
pub struct MemoryClosePosition {
    by_key: Mutex<HashMap<(i64, String), Uuid>>,
    pub created: Mutex<Vec<(Uuid, Option<String>)>>,
}

impl MemoryClosePosition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().expect("close port lock").len()
    }

    pub fn last_reason(&self) -> Option<String> {
        self.created
            .lock()
            .expect("close port lock")
            .last()
            .and_then(|(_, reason)| reason.clone())
    }
}

#[async_trait]
impl ClosePositionPort for MemoryClosePosition {
    async fn close(
        &self,
        position_id: i64,
        idempotency_key: &str,
        reason: Option<&str>,
    ) -> Result<ClosePositionResponse, ClosePositionError> {
        let mut by_key = self.by_key.lock().expect("close port lock");
        let key = (position_id, idempotency_key.to_string());
        if let Some(id) = by_key.get(&key) {
            return Ok(ClosePositionResponse {
                close_request_id: *id,
                position_id,
                status: CloseRequestStatus::Pending,
                created: false,
            });
        }
        let id = Uuid::new_v4();
        by_key.insert(key, id);
        self.created
            .lock()
            .expect("close port lock")
            .push((id, reason.map(str::to_string)));
        Ok(ClosePositionResponse {
            close_request_id: id,
            position_id,
            status: CloseRequestStatus::Pending,
            created: true,
        })
    }
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

#[async_trait]
pub trait IdempotencyPort: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn store(
        &self,
        key: &str,
        resource_type: &str,
        resource_id: &str,
        response: &serde_json::Value,
    ) -> Result<()>;
}

pub struct PgIdempotency {
    pool: PgPool,
    ttl_hours: i64,
}

impl PgIdempotency {
    pub fn new(pool: PgPool, ttl_hours: i64) -> Self {
        Self { pool, ttl_hours }
    }
}

#[async_trait]
impl IdempotencyPort for PgIdempotency {
    async fn lookup(&self, key: &str) -> Result<Option<serde_json::Value>> {
        qrl_db::idempotency::lookup(&self.pool, key).await
    }

    async fn store(
        &self,
        key: &str,
        resource_type: &str,
        resource_id: &str,
        response: &serde_json::Value,
    ) -> Result<()> {
        qrl_db::idempotency::store(
            &self.pool,
            key,
            resource_type,
            resource_id,
            response,
            self.ttl_hours,
        )
        .await
        .map(|_| ())
    }
}

#[derive(Default)]
pub struct MemoryIdempotency {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryIdempotency {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyPort for MemoryIdempotency {
    async fn lookup(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.lock().expect("idem lock").get(key).cloned())
    }

    async fn store(
        &self,
        key: &str,
        _resource_type: &str,
        _resource_id: &str,
        response: &serde_json::Value,
    ) -> Result<()> {
        self.entries
            .lock()
            .expect("idem lock")
            .entry(key.to_string())
            .or_insert_with(|| response.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Emergency actions (kill switch)
// ---------------------------------------------------------------------------

/// The compound kill-switch endpoint's side effects: cancel every working
/// order, then flatten every open position.
#[async_trait]
pub trait EmergencyActions: Send + Sync {
    /// Returns the number of orders cancelled.
    async fn cancel_all_orders(&self) -> Result<usize>;
    /// Returns the number of positions flattened (close requests raised).
    async fn flatten_all_positions(&self) -> Result<usize>;
}

/// Test double with scriptable failures.
pub struct MemoryEmergency {
    pub cancel_result: Mutex<Result<usize>>,
    pub flatten_result: Mutex<Result<usize>>,
}

impl MemoryEmergency {
    pub fn succeeding(cancelled: usize, flattened: usize) -> Self {
        Self {
            cancel_result: Mutex::new(Ok(cancelled)),
            flatten_result: Mutex::new(Ok(flattened)),
        }
    }

    pub fn failing_flatten(cancelled: usize, error: &str) -> Self {
        Self {
            cancel_result: Mutex::new(Ok(cancelled)),
            flatten_result: Mutex::new(Err(anyhow::anyhow!(error.to_string()))),
        }
    }
}

#[async_trait]
impl EmergencyActions for MemoryEmergency {
    async fn cancel_all_orders(&self) -> Result<usize> {
        let guard = self.cancel_result.lock().expect("emergency lock");
        match &*guard {
            Ok(n) => Ok(*n),
            Err(e) => Err(anyhow::anyhow!(e.to_string())),
        }
    }

    async fn flatten_all_positions(&self) -> Result<usize> {
        let guard = self.flatten_result.lock().expect("emergency lock");
        match &*guard {
            Ok(n) => Ok(*n),
            Err(e) => Err(anyhow::anyhow!(e.to_string())),
        }
    }
}
