//! Cross-thread fill hand-off.
//!
//! Broker SDKs may invoke the fill callback on a thread the scheduler does
//! not own. [`FillIngress`] is the one primitive that crosses that
//! boundary: a bounded channel whose sender side is safe from any thread
//! and whose receiver side is drained only by the order manager task.
//! Submission never blocks; a full queue drops the fill and counts it (the
//! reconciler heals a dropped fill, a blocked broker thread cannot heal
//! anything).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use qrl_schemas::Fill;

#[derive(Debug, Default)]
pub struct IngressStats {
    submitted: AtomicU64,
    dropped: AtomicU64,
}

impl IngressStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Sender half. Clone freely; hand one to each broker adapter callback.
#[derive(Clone)]
pub struct FillIngress {
    tx: mpsc::Sender<Fill>,
    stats: Arc<IngressStats>,
}

/// Receiver half, owned by the order manager task.
pub struct FillReceiver {
    rx: mpsc::Receiver<Fill>,
}

impl FillIngress {
    pub fn new(capacity: usize) -> (Self, FillReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                stats: Arc::new(IngressStats::default()),
            },
            FillReceiver { rx },
        )
    }

    /// Thread-safe, non-blocking submission. Works from foreign OS threads
    /// and from inside the runtime alike.
    pub fn submit(&self, fill: Fill) {
        match self.tx.try_send(fill) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(fill)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(fill_id = %fill.fill_id, "fill ingress full; fill dropped");
            }
            Err(mpsc::error::TrySendError::Closed(fill)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(fill_id = %fill.fill_id, "fill ingress closed; fill dropped");
            }
        }
    }

    /// Wrap into the callback shape broker adapters expect.
    pub fn as_callback(&self) -> qrl_broker::FillCallback {
        let ingress = self.clone();
        Arc::new(move |fill| ingress.submit(fill))
    }

    pub fn stats(&self) -> Arc<IngressStats> {
        Arc::clone(&self.stats)
    }
}

impl FillReceiver {
    pub async fn recv(&mut self) -> Option<Fill> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qrl_schemas::Side;
    use rust_decimal::Decimal;

    fn fill(id: &str) -> Fill {
        Fill {
            fill_id: id.to_string(),
            broker_order_id: "B-1".to_string(),
            symbol: "AAPL".to_string(),
            side: Side::Buy,
            quantity: 1,
            price: Decimal::from(100),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fills_cross_from_foreign_threads() {
        let (ingress, mut rx) = FillIngress::new(16);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let ingress = ingress.clone();
                std::thread::spawn(move || ingress.submit(fill(&format!("F{i}"))))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..4 {
            received.push(rx.recv().await.unwrap().fill_id);
        }
        received.sort();
        assert_eq!(received, vec!["F0", "F1", "F2", "F3"]);
        assert_eq!(ingress.stats().submitted(), 4);
        assert_eq!(ingress.stats().dropped(), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let (ingress, _rx) = FillIngress::new(1);
        ingress.submit(fill("F1"));
        ingress.submit(fill("F2"));
        assert_eq!(ingress.stats().submitted(), 1);
        assert_eq!(ingress.stats().dropped(), 1);
    }
}
