use async_trait::async_trait;

use qrl_schemas::Quote;

#[derive(Debug, thiserror::Error)]
pub enum MarketDataError {
    #[error("quote fetch timed out")]
    Timeout,

    #[error("no quote available for {symbol}")]
    Unavailable { symbol: String },

    #[error("market data transport failure: {0}")]
    Transport(String),
}

impl MarketDataError {
    pub fn is_retryable(&self) -> bool {
        // Every market-data failure is transient from the core's point of
        // view; permanence comes from the caller's retry budget.
        true
    }
}

/// Quote source consumed by the outbox pricing policy and health checks.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError>;
}
