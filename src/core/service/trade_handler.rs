//! Per-task work unit: parse, validate, persist to the cache tier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::core::cache::TickCache;
use crate::core::domain::{Task, TaskResult, Trade};
use crate::core::pipeline::TaskHandler;
use crate::error::Error;

/// Deadline for one cache write, fallback included.
pub const CACHE_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Stateless handler shared by every worker pool.
///
/// Does not retry: the cache adapter already falls back internally, so a
/// failure here is terminal for the tick.
pub struct TradeHandler {
    cache: Arc<dyn TickCache>,
}

impl TradeHandler {
    pub fn new(cache: Arc<dyn TickCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl TaskHandler for TradeHandler {
    async fn handle(&self, worker_id: usize, task: Task) -> TaskResult {
        let trade = match Trade::parse(&task.data) {
            Ok(trade) => trade,
            Err(err) => {
                debug!(worker_id, from = %task.from, error = %err, "discarding malformed tick");
                return TaskResult {
                    from: task.from,
                    symbol: String::new(),
                    price: 0.0,
                    timestamp: 0,
                    err: Some(err),
                };
            }
        };

        let write = self.cache.save_raw_data(&task.from, &trade);
        let err = match tokio::time::timeout(CACHE_WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(_) => Some(Error::Timeout("cache write")),
        };

        TaskResult {
            from: task.from,
            symbol: trade.symbol,
            price: trade.price,
            timestamp: trade.timestamp,
            err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::MemoryCache;

    #[tokio::test]
    async fn accepted_tick_becomes_observable_via_latest() {
        let cache = Arc::new(MemoryCache::new());
        let handler = TradeHandler::new(Arc::clone(&cache) as Arc<dyn TickCache>);

        let result = handler
            .handle(
                1,
                Task::new(
                    "e1",
                    r#"{"symbol":"BTCUSDT","price":30000,"timestamp":1700000000}"#,
                ),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(result.from, "e1");
        assert_eq!(result.symbol, "BTCUSDT");
        assert_eq!(result.price, 30000.0);
        assert_eq!(cache.get_latest("e1", "BTCUSDT").await.unwrap(), 30000.0);
    }

    #[tokio::test]
    async fn malformed_tick_yields_parse_result_and_no_cache_write() {
        let cache = Arc::new(MemoryCache::new());
        let handler = TradeHandler::new(Arc::clone(&cache) as Arc<dyn TickCache>);

        let result = handler.handle(1, Task::new("e1", "not json")).await;

        assert!(matches!(result.err, Some(Error::Parse(_))));
        let (exchanges, _) = cache.get_collection().await.unwrap();
        assert!(exchanges.is_empty());
    }

    #[tokio::test]
    async fn invalid_price_is_treated_as_parse_failure() {
        let cache = Arc::new(MemoryCache::new());
        let handler = TradeHandler::new(Arc::clone(&cache) as Arc<dyn TickCache>);

        let result = handler
            .handle(
                1,
                Task::new("e1", r#"{"symbol":"BTCUSDT","price":-1,"timestamp":0}"#),
            )
            .await;
        assert!(matches!(result.err, Some(Error::Parse(_))));
    }
}
