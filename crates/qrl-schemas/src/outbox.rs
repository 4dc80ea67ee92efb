use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::Side;

/// Hard budget for serialized outbox payloads and the extension blob.
pub const PAYLOAD_MAX_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Completed => "completed",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Completed | OutboxStatus::Failed)
    }
}

/// Structured outbox payloads, one variant per event type.
///
/// Free-form payloads are confined to [`OutboxPayload::Extension`], which
/// carries a hard size budget enforced at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxPayload {
    SubmitCloseOrder {
        close_request_id: Uuid,
        position_id: i64,
        symbol: String,
        side: Side,
        qty: i64,
    },
    CancelOrder {
        order_id: Uuid,
        broker_order_id: String,
    },
    Extension {
        kind: String,
        data: serde_json::Value,
    },
}

impl OutboxPayload {
    pub fn event_type(&self) -> &str {
        match self {
            OutboxPayload::SubmitCloseOrder { .. } => "SUBMIT_CLOSE_ORDER",
            OutboxPayload::CancelOrder { .. } => "CANCEL_ORDER",
            OutboxPayload::Extension { .. } => "EXTENSION",
        }
    }

    /// Serialize, rejecting payloads over [`PAYLOAD_MAX_BYTES`].
    pub fn to_value(&self) -> Result<serde_json::Value, PayloadTooLarge> {
        let value = serde_json::to_value(self).expect("outbox payload serializes");
        let size = value.to_string().len();
        if size > PAYLOAD_MAX_BYTES {
            return Err(PayloadTooLarge { size });
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTooLarge {
    pub size: usize,
}

impl std::fmt::Display for PayloadTooLarge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "outbox payload is {} bytes, budget is {}",
            self.size, PAYLOAD_MAX_BYTES
        )
    }
}

impl std::error::Error for PayloadTooLarge {}

/// A persisted outbound intent processed asynchronously by the worker pool.
///
/// Claimed in `created_at` order under `FOR UPDATE SKIP LOCKED`; a claim
/// transitions `pending → processing` under the row lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn decode_payload(&self) -> serde_json::Result<OutboxPayload> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_through_event() {
        let payload = OutboxPayload::SubmitCloseOrder {
            close_request_id: Uuid::new_v4(),
            position_id: 7,
            symbol: "AAPL".into(),
            side: Side::Sell,
            qty: 50,
        };
        let event = OutboxEvent {
            id: 1,
            event_type: payload.event_type().to_string(),
            payload: payload.to_value().unwrap(),
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            processed_at: None,
        };
        assert_eq!(event.decode_payload().unwrap(), payload);
    }

    #[test]
    fn oversized_extension_is_rejected() {
        let blob = "x".repeat(PAYLOAD_MAX_BYTES + 1);
        let payload = OutboxPayload::Extension {
            kind: "debug".into(),
            data: serde_json::Value::String(blob),
        };
        assert!(payload.to_value().is_err());
    }

    #[test]
    fn event_type_tags_match() {
        let p = OutboxPayload::CancelOrder {
            order_id: Uuid::new_v4(),
            broker_order_id: "B-1".into(),
        };
        assert_eq!(p.event_type(), "CANCEL_ORDER");
        let v = p.to_value().unwrap();
        assert_eq!(v["event_type"], "CANCEL_ORDER");
    }
}
