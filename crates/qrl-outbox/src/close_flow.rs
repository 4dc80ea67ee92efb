//! The close-position write path.
//!
//! One business transaction:
//!
//! ```text
//! BEGIN
//!   INSERT close_requests(status=pending, ...)
//!   UPDATE positions SET status=closing, active_close_request_id=...
//!   INSERT outbox_events(event_type='SUBMIT_CLOSE_ORDER', status=pending)
//! COMMIT
//! ```
//!
//! The state change and the outbox row commit together or not at all.
//! `(position_id, idempotency_key)` replay returns the existing request
//! without a second outbox row; a position that already has an active
//! close refuses a new one (single writer per resource).

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use qrl_schemas::{CloseRequestStatus, OutboxPayload, PositionStatus};

#[derive(Debug, thiserror::Error)]
pub enum ClosePositionError {
    #[error("position {0} not found")]
    NotFound(i64),

    #[error("position {position_id} is not closeable (status {status})")]
    NotCloseable { position_id: i64, status: String },

    #[error("position {0} already has an active close request")]
    AlreadyClosing(i64),

    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePositionResponse {
    pub close_request_id: Uuid,
    pub position_id: i64,
    pub status: CloseRequestStatus,
    /// True when this call created the request (false on idempotent replay).
    pub created: bool,
}

/// Create (or replay) a close request for a position. `reason` is the
/// operator-supplied motivation; it lands on the close_requests row.
pub async fn close_position(
    pool: &PgPool,
    position_id: i64,
    idempotency_key: &str,
    reason: Option<&str>,
    max_retries: i32,
) -> Result<ClosePositionResponse, ClosePositionError> {
    // Idempotent replay: the same (position, key) returns the original.
    if let Some(existing) =
        qrl_db::close_requests::get_by_position_and_key(pool, position_id, idempotency_key).await?
    {
        return Ok(ClosePositionResponse {
            close_request_id: existing.id,
            position_id,
            status: existing.status,
            created: false,
        });
    }

    let position = qrl_db::positions::get_position(pool, position_id)
        .await?
        .ok_or(ClosePositionError::NotFound(position_id))?;

    match position.status {
        PositionStatus::Open | PositionStatus::CloseFailed => {}
        PositionStatus::Closing | PositionStatus::CloseRetryable => {
            return Err(ClosePositionError::AlreadyClosing(position_id));
        }
        other => {
            return Err(ClosePositionError::NotCloseable {
                position_id,
                status: other.as_str().to_string(),
            });
        }
    }

    let side = qrl_schemas::Side::Sell; // long-only MVP: closing always sells

    let mut tx = pool
        .begin()
        .await
        .context("close_position begin failed")
        .map_err(ClosePositionError::Db)?;

    let close_request = qrl_db::close_requests::insert(
        &mut tx,
        position_id,
        idempotency_key,
        &position.symbol,
        side,
        position.quantity,
        max_retries,
        reason,
    )
    .await?;

    qrl_db::positions::mark_closing(&mut tx, position_id, close_request.id).await?;

    qrl_db::outbox::enqueue(
        &mut tx,
        &OutboxPayload::SubmitCloseOrder {
            close_request_id: close_request.id,
            position_id,
            symbol: position.symbol.clone(),
            side,
            qty: position.quantity,
        },
    )
    .await?;

    tx.commit()
        .await
        .context("close_position commit failed")
        .map_err(ClosePositionError::Db)?;

    info!(
        position_id,
        close_request_id = %close_request.id,
        symbol = %position.symbol,
        reason = reason.unwrap_or("-"),
        "close request enqueued"
    );

    Ok(ClosePositionResponse {
        close_request_id: close_request.id,
        position_id,
        status: CloseRequestStatus::Pending,
        created: true,
    })
}
