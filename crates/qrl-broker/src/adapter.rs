use std::sync::Arc;

use async_trait::async_trait;

use qrl_schemas::{BrokerAccount, BrokerOrderStatus, BrokerPosition, Fill, Order};

/// Callback invoked for every broker fill. May run on a foreign thread.
pub type FillCallback = Arc<dyn Fn(Fill) + Send + Sync>;

/// Errors surfaced by broker adapters, split along the retryability line the
/// outbox and delivery workers care about.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker call timed out")]
    Timeout,

    #[error("broker rate limit hit")]
    RateLimited,

    #[error("broker transport failure: {0}")]
    Transport(String),

    #[error("broker not connected")]
    NotConnected,

    #[error("order rejected: {reason}")]
    Rejected { reason: String },

    #[error("invalid symbol: {symbol}")]
    InvalidSymbol { symbol: String },

    #[error("insufficient funds")]
    InsufficientFunds,
}

impl BrokerError {
    /// Transient errors are re-enqueued by the owning retry boundary;
    /// permanent ones mark the resource failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::Timeout
                | BrokerError::RateLimited
                | BrokerError::Transport(_)
                | BrokerError::NotConnected
        )
    }
}

/// What the core calls on a broker. One implementation per venue plus the
/// deterministic paper broker.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Submit an order; returns the broker-assigned order id.
    async fn submit_order(&self, order: &Order) -> Result<String, BrokerError>;

    /// Cancel by broker order id. `Ok(false)` means the broker reported the
    /// order as not cancellable (already terminal).
    async fn cancel_order(&self, broker_order_id: &str) -> Result<bool, BrokerError>;

    async fn get_order_status(&self, broker_order_id: &str)
        -> Result<BrokerOrderStatus, BrokerError>;

    /// Register the fill callback. The callback may be invoked from a
    /// thread foreign to the scheduler.
    fn subscribe_fills(&self, callback: FillCallback);

    async fn get_positions(&self, account_id: &str) -> Result<Vec<BrokerPosition>, BrokerError>;

    async fn get_account(&self, account_id: &str) -> Result<BrokerAccount, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_split() {
        assert!(BrokerError::Timeout.is_retryable());
        assert!(BrokerError::RateLimited.is_retryable());
        assert!(BrokerError::Transport("reset".into()).is_retryable());
        assert!(!BrokerError::Rejected { reason: "nsf".into() }.is_retryable());
        assert!(!BrokerError::InvalidSymbol { symbol: "??".into() }.is_retryable());
        assert!(!BrokerError::InsufficientFunds.is_retryable());
    }
}
