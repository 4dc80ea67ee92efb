//! Store seams for the worker, with Postgres adapters and in-memory
//! doubles for the scenario tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use qrl_schemas::{
    CloseRequest, CloseRequestStatus, OutboxEvent, OutboxPayload, OutboxStatus,
};

/// Outbox row operations the worker needs.
#[async_trait]
pub trait OutboxAccess: Send + Sync {
    async fn claim_pending(&self, limit: i64) -> Result<Vec<OutboxEvent>>;
    async fn mark_completed(&self, event_id: i64) -> Result<()>;
    async fn mark_failed(&self, event_id: i64) -> Result<()>;
    /// Increment retry, revert to pending; returns the new count.
    async fn release_for_retry(&self, event_id: i64) -> Result<i32>;
    async fn cleanup(&self, retention_days: i64) -> Result<u64>;
}

/// Close-request and position transitions the worker needs.
#[async_trait]
pub trait CloseAccess: Send + Sync {
    async fn get_close_request(&self, id: Uuid) -> Result<Option<CloseRequest>>;
    async fn set_close_request_status(&self, id: Uuid, status: CloseRequestStatus) -> Result<()>;
    async fn mark_position_close_failed(&self, position_id: i64) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Postgres adapters
// ---------------------------------------------------------------------------

pub struct PgOutboxAccess {
    pool: PgPool,
}

impl PgOutboxAccess {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxAccess for PgOutboxAccess {
    async fn claim_pending(&self, limit: i64) -> Result<Vec<OutboxEvent>> {
        qrl_db::outbox::claim_pending(&self.pool, limit).await
    }

    async fn mark_completed(&self, event_id: i64) -> Result<()> {
        qrl_db::outbox::mark_completed(&self.pool, event_id).await
    }

    async fn mark_failed(&self, event_id: i64) -> Result<()> {
        qrl_db::outbox::mark_failed(&self.pool, event_id).await
    }

    async fn release_for_retry(&self, event_id: i64) -> Result<i32> {
        qrl_db::outbox::release_for_retry(&self.pool, event_id).await
    }

    async fn cleanup(&self, retention_days: i64) -> Result<u64> {
        qrl_db::outbox::cleanup(&self.pool, retention_days).await
    }
}

pub struct PgCloseAccess {
    pool: PgPool,
}

impl PgCloseAccess {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CloseAccess for PgCloseAccess {
    async fn get_close_request(&self, id: Uuid) -> Result<Option<CloseRequest>> {
        qrl_db::close_requests::get(&self.pool, id).await
    }

    async fn set_close_request_status(&self, id: Uuid, status: CloseRequestStatus) -> Result<()> {
        qrl_db::close_requests::update_status(&self.pool, id, status).await
    }

    async fn mark_position_close_failed(&self, position_id: i64) -> Result<()> {
        qrl_db::positions::mark_close_failed(&self.pool, position_id).await
    }
}

// ---------------------------------------------------------------------------
// In-memory doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryOutboxAccess {
    events: Mutex<Vec<OutboxEvent>>,
    next_id: Mutex<i64>,
}

impl MemoryOutboxAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, payload: &OutboxPayload) -> i64 {
        let mut next = self.next_id.lock().expect("outbox id lock");
        *next += 1;
        let id = *next;
        self.events.lock().expect("outbox lock").push(OutboxEvent {
            id,
            event_type: payload.event_type().to_string(),
            payload: payload.to_value().expect("payload within budget"),
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            processed_at: None,
        });
        id
    }

    pub fn events(&self) -> Vec<OutboxEvent> {
        self.events.lock().expect("outbox lock").clone()
    }

    pub fn status_of(&self, event_id: i64) -> Option<OutboxStatus> {
        self.events
            .lock()
            .expect("outbox lock")
            .iter()
            .find(|e| e.id == event_id)
            .map(|e| e.status)
    }
}

#[async_trait]
impl OutboxAccess for MemoryOutboxAccess {
    async fn claim_pending(&self, limit: i64) -> Result<Vec<OutboxEvent>> {
        let mut events = self.events.lock().expect("outbox lock");
        let mut claimed = Vec::new();
        for event in events.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if event.status == OutboxStatus::Pending {
                event.status = OutboxStatus::Processing;
                claimed.push(event.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, event_id: i64) -> Result<()> {
        let mut events = self.events.lock().expect("outbox lock");
        if let Some(e) = events.iter_mut().find(|e| e.id == event_id) {
            e.status = OutboxStatus::Completed;
            e.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&self, event_id: i64) -> Result<()> {
        let mut events = self.events.lock().expect("outbox lock");
        if let Some(e) = events.iter_mut().find(|e| e.id == event_id) {
            e.status = OutboxStatus::Failed;
            e.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn release_for_retry(&self, event_id: i64) -> Result<i32> {
        let mut events = self.events.lock().expect("outbox lock");
        let e = events
            .iter_mut()
            .find(|e| e.id == event_id)
            .expect("event exists");
        e.retry_count += 1;
        e.status = OutboxStatus::Pending;
        Ok(e.retry_count)
    }

    async fn cleanup(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let mut events = self.events.lock().expect("outbox lock");
        let before = events.len();
        events.retain(|e| !(e.status.is_terminal() && e.created_at < cutoff));
        Ok((before - events.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryCloseAccess {
    pub close_requests: Mutex<HashMap<Uuid, CloseRequest>>,
    pub failed_positions: Mutex<Vec<i64>>,
}

impl MemoryCloseAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, cr: CloseRequest) {
        self.close_requests
            .lock()
            .expect("close lock")
            .insert(cr.id, cr);
    }

    pub fn status_of(&self, id: Uuid) -> Option<CloseRequestStatus> {
        self.close_requests
            .lock()
            .expect("close lock")
            .get(&id)
            .map(|c| c.status)
    }
}

#[async_trait]
impl CloseAccess for MemoryCloseAccess {
    async fn get_close_request(&self, id: Uuid) -> Result<Option<CloseRequest>> {
        Ok(self.close_requests.lock().expect("close lock").get(&id).cloned())
    }

    async fn set_close_request_status(&self, id: Uuid, status: CloseRequestStatus) -> Result<()> {
        let mut map = self.close_requests.lock().expect("close lock");
        if let Some(cr) = map.get_mut(&id) {
            cr.status = status;
            match status {
                CloseRequestStatus::Submitted => cr.submitted_at = Some(Utc::now()),
                CloseRequestStatus::Completed | CloseRequestStatus::Failed => {
                    cr.completed_at = Some(Utc::now())
                }
                CloseRequestStatus::Pending => {}
            }
        }
        Ok(())
    }

    async fn mark_position_close_failed(&self, position_id: i64) -> Result<()> {
        self.failed_positions
            .lock()
            .expect("close lock")
            .push(position_id);
        Ok(())
    }
}
