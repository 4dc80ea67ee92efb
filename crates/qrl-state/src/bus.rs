//! Bounded, non-blocking notification bus for state changes.
//!
//! Subscribers that fall behind lose the oldest messages (Tokio broadcast
//! semantics); every loss is counted so the daemon can raise an alert when
//! overflow occurs. Senders never block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::mode::ModeTransition;
use crate::trading::TradingState;

/// Messages carried on the state bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    ModeChanged(ModeTransition),
    TradingStateChanged(TradingState),
    FillPublished { order_id: String, fill_id: String },
    DiscrepancyFound { run_id: Uuid, kind: String },
}

/// Overflow accounting shared by all receivers.
#[derive(Debug, Default)]
pub struct BusStats {
    dropped: AtomicU64,
}

impl BusStats {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn add_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }
}

/// The bus handle. Cheap to clone.
#[derive(Clone)]
pub struct StateBus {
    tx: broadcast::Sender<StateEvent>,
    stats: Arc<BusStats>,
}

impl StateBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            stats: Arc::new(BusStats::default()),
        }
    }

    /// Non-blocking publish. A bus with no subscribers silently drops.
    pub fn publish(&self, event: StateEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> BusReceiver {
        BusReceiver {
            rx: self.tx.subscribe(),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn stats(&self) -> Arc<BusStats> {
        Arc::clone(&self.stats)
    }
}

/// Receiver wrapper that folds lag into the shared drop counter.
pub struct BusReceiver {
    rx: broadcast::Receiver<StateEvent>,
    stats: Arc<BusStats>,
}

impl BusReceiver {
    /// Receive the next event. Lagged messages are counted and skipped; the
    /// next available event is returned. `None` means the bus closed.
    pub async fn recv(&mut self) -> Option<StateEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.stats.add_dropped(n);
                    warn!(dropped = n, "state bus receiver lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
