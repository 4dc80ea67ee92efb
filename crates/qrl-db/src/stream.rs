//! Named-channel stream transport.
//!
//! The persistence contract gives the core a pub/sub channel with
//! list-pop-with-timeout and publish on named channels (`approved_signals`,
//! `fills`, `reconciliation:*`). Two implementations:
//!
//! - [`MemoryStream`] — in-process queues; SIMULATE mode and every test.
//! - [`RedisStream`] — Redis lists via a connection manager; selected by
//!   `REDIS_URL` in production.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Publish/consume seam shared by the order manager, reconciler, and
/// daemon wiring.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Append a payload to a named channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Pop the oldest payload from a named channel, waiting up to `timeout`.
    /// `None` on timeout.
    async fn pop(&self, channel: &str, timeout: Duration) -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Unbounded in-process channels keyed by name.
pub struct MemoryStream {
    channels: Mutex<HashMap<String, Channel>>,
}

#[derive(Clone)]
struct Channel {
    tx: mpsc::UnboundedSender<String>,
    rx: std::sync::Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn channel(&self, name: &str) -> Channel {
        let mut channels = self.channels.lock().expect("stream channels lock");
        channels
            .entry(name.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                Channel {
                    tx,
                    rx: std::sync::Arc::new(tokio::sync::Mutex::new(rx)),
                }
            })
            .clone()
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStream for MemoryStream {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.channel(channel).tx.send(payload.to_string()).ok();
        Ok(())
    }

    async fn pop(&self, channel: &str, timeout: Duration) -> Result<Option<String>> {
        let rx = self.channel(channel).rx;
        let mut rx = rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(payload)) => Ok(Some(payload)),
            Ok(None) | Err(_) => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Redis-list transport: `RPUSH` on publish, `BLPOP` with timeout on pop.
pub struct RedisStream {
    manager: redis::aio::ConnectionManager,
}

impl RedisStream {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid REDIS_URL")?;
        let manager = client
            .get_connection_manager()
            .await
            .context("redis connection manager failed")?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl EventStream for RedisStream {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("RPUSH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .context("redis publish failed")?;
        Ok(())
    }

    async fn pop(&self, channel: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let result: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(channel)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await
            .context("redis pop failed")?;
        Ok(result.map(|(_, payload)| payload))
    }
}
