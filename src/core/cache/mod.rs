//! Hot tick cache with a silent cold-store fallback.
//!
//! The cache tier stores raw ticks per `(exchange, symbol)` with a 2-minute
//! retention horizon. Two implementations sit behind [`TickCache`]: the
//! Redis-backed hot tier and the Postgres `raw_data` fallback. The
//! [`CacheAdapter`] pairs them so callers never see which tier served a
//! request.

mod memory;
mod redis;

pub use memory::MemoryCache;
pub use self::redis::RedisCache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::core::domain::Trade;
use crate::error::Result;

/// Ticks older than this are evicted from the hot tier.
pub const RETENTION: Duration = Duration::from_secs(120);

/// Raw-tick storage contract shared by the hot tier and its cold fallback.
#[async_trait]
pub trait TickCache: Send + Sync {
    /// Stores one tick under `(exchange, trade.symbol)`, keyed by
    /// server-observed arrival time.
    async fn save_raw_data(&self, exchange: &str, trade: &Trade) -> Result<()>;

    /// Returns ticks observed within the last `window`, oldest first.
    async fn get_raw_data(&self, exchange: &str, symbol: &str, window: Duration)
        -> Result<Vec<Trade>>;

    /// Returns the most recently observed price for the pair.
    async fn get_latest(&self, exchange: &str, symbol: &str) -> Result<f64>;

    /// Returns the distinct exchanges and symbols currently present,
    /// derived from stored keys.
    async fn get_collection(&self) -> Result<(Vec<String>, Vec<String>)>;
}

/// Primary/secondary pair that retries exactly once on the secondary when
/// the primary fails with a connection-kind error.
///
/// Any other error surfaces immediately; callers see a uniform outcome
/// regardless of which tier served the request.
pub struct CacheAdapter {
    primary: Arc<dyn TickCache>,
    fallback: Arc<dyn TickCache>,
}

impl CacheAdapter {
    pub fn new(primary: Arc<dyn TickCache>, fallback: Arc<dyn TickCache>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl TickCache for CacheAdapter {
    async fn save_raw_data(&self, exchange: &str, trade: &Trade) -> Result<()> {
        match self.primary.save_raw_data(exchange, trade).await {
            Err(err) if err.is_connection() => {
                warn!(error = %err, "hot cache unreachable, writing tick to fallback");
                self.fallback.save_raw_data(exchange, trade).await
            }
            other => other,
        }
    }

    async fn get_raw_data(
        &self,
        exchange: &str,
        symbol: &str,
        window: Duration,
    ) -> Result<Vec<Trade>> {
        match self.primary.get_raw_data(exchange, symbol, window).await {
            Err(err) if err.is_connection() => {
                warn!(error = %err, "hot cache unreachable, reading ticks from fallback");
                self.fallback.get_raw_data(exchange, symbol, window).await
            }
            other => other,
        }
    }

    async fn get_latest(&self, exchange: &str, symbol: &str) -> Result<f64> {
        match self.primary.get_latest(exchange, symbol).await {
            Err(err) if err.is_connection() => {
                warn!(error = %err, "hot cache unreachable, reading latest from fallback");
                self.fallback.get_latest(exchange, symbol).await
            }
            other => other,
        }
    }

    async fn get_collection(&self) -> Result<(Vec<String>, Vec<String>)> {
        match self.primary.get_collection().await {
            Err(err) if err.is_connection() => {
                warn!(error = %err, "hot cache unreachable, scanning fallback");
                self.fallback.get_collection().await
            }
            other => other,
        }
    }
}
