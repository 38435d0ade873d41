//! In-memory cache implementation for testing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{TickCache, RETENTION};
use crate::core::domain::Trade;
use crate::error::{Error, Result};

/// In-memory [`TickCache`] with the same ordering and retention semantics
/// as the hot tier. Entries are `(server_timestamp, trade)` pairs ordered
/// by arrival; same-second re-insertion of an identical tick is a no-op,
/// mirroring the hot tier's set semantics.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<(String, String), Vec<(i64, Trade)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TickCache for MemoryCache {
    async fn save_raw_data(&self, exchange: &str, trade: &Trade) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut entries = self.entries.write();
        let bucket = entries
            .entry((exchange.to_string(), trade.symbol.clone()))
            .or_default();
        if !bucket
            .iter()
            .any(|(ts, t)| *ts == now && t.price == trade.price)
        {
            bucket.push((now, trade.clone()));
        }
        bucket.retain(|(ts, _)| *ts > now - RETENTION.as_secs() as i64);
        Ok(())
    }

    async fn get_raw_data(
        &self,
        exchange: &str,
        symbol: &str,
        window: Duration,
    ) -> Result<Vec<Trade>> {
        let from = Utc::now().timestamp() - window.as_secs() as i64;
        let entries = self.entries.read();
        let Some(bucket) = entries.get(&(exchange.to_string(), symbol.to_string())) else {
            return Ok(Vec::new());
        };
        Ok(bucket
            .iter()
            .filter(|(ts, _)| *ts >= from)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn get_latest(&self, exchange: &str, symbol: &str) -> Result<f64> {
        let entries = self.entries.read();
        entries
            .get(&(exchange.to_string(), symbol.to_string()))
            .and_then(|bucket| bucket.last())
            .map(|(_, t)| t.price)
            .ok_or(Error::NoData)
    }

    async fn get_collection(&self) -> Result<(Vec<String>, Vec<String>)> {
        let entries = self.entries.read();
        let mut exchanges = Vec::new();
        let mut symbols = Vec::new();
        for (exchange, symbol) in entries.keys() {
            if !exchanges.contains(exchange) {
                exchanges.push(exchange.clone());
            }
            if !symbols.contains(symbol) {
                symbols.push(symbol.clone());
            }
        }
        Ok((exchanges, symbols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(symbol: &str, price: f64) -> Trade {
        Trade {
            symbol: symbol.to_string(),
            price,
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn latest_returns_most_recent_insert() {
        let cache = MemoryCache::new();
        cache.save_raw_data("e1", &trade("BTCUSDT", 100.0)).await.unwrap();
        cache.save_raw_data("e1", &trade("BTCUSDT", 101.0)).await.unwrap();

        assert_eq!(cache.get_latest("e1", "BTCUSDT").await.unwrap(), 101.0);
    }

    #[tokio::test]
    async fn latest_on_missing_pair_is_no_data() {
        let cache = MemoryCache::new();
        assert!(matches!(
            cache.get_latest("e1", "BTCUSDT").await,
            Err(Error::NoData)
        ));
    }

    #[tokio::test]
    async fn raw_data_is_scoped_to_the_pair() {
        let cache = MemoryCache::new();
        cache.save_raw_data("e1", &trade("BTCUSDT", 1.0)).await.unwrap();
        cache.save_raw_data("e2", &trade("BTCUSDT", 2.0)).await.unwrap();
        cache.save_raw_data("e1", &trade("ETHUSDT", 3.0)).await.unwrap();

        let raw = cache
            .get_raw_data("e1", "BTCUSDT", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].price, 1.0);
    }

    #[tokio::test]
    async fn collection_lists_distinct_exchanges_and_symbols() {
        let cache = MemoryCache::new();
        cache.save_raw_data("e1", &trade("BTCUSDT", 1.0)).await.unwrap();
        cache.save_raw_data("e2", &trade("BTCUSDT", 2.0)).await.unwrap();
        cache.save_raw_data("e1", &trade("ETHUSDT", 3.0)).await.unwrap();

        let (mut exchanges, mut symbols) = cache.get_collection().await.unwrap();
        exchanges.sort();
        symbols.sort();
        assert_eq!(exchanges, vec!["e1".to_string(), "e2".to_string()]);
        assert_eq!(symbols, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
    }

    #[tokio::test]
    async fn same_second_duplicate_insert_is_idempotent() {
        let cache = MemoryCache::new();
        let t = trade("BTCUSDT", 42.0);
        cache.save_raw_data("e1", &t).await.unwrap();
        cache.save_raw_data("e1", &t).await.unwrap();

        let raw = cache
            .get_raw_data("e1", "BTCUSDT", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(raw.len(), 1);
    }
}
