//! Cold aggregate store and hot/cold query routing.
//!
//! The cold store holds per-second rollup rows in `market` and a raw-tick
//! fallback table. [`StorageAdapter`] is the single place that unifies hot
//! and cold reads: short windows are computed from cache raw ticks, long
//! windows from SQL aggregates.

mod postgres;

pub use postgres::PostgresStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::cache::TickCache;
use crate::core::domain::{AggregatedData, Trade};
use crate::error::{Error, Result};

/// Windows at or below this are answered from raw cache ticks; anything
/// longer goes to the rollup rows in the cold store.
pub const CACHE_WINDOW: Duration = Duration::from_secs(60);

/// Identifies one pair on one exchange over a trailing window.
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub pair_name: String,
    pub exchange: String,
    pub window: Duration,
}

/// One rollup row to insert.
#[derive(Debug, Clone)]
pub struct NewAggregate {
    pub pair_name: String,
    pub exchange: String,
    pub average_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

impl NewAggregate {
    /// Folds raw ticks into one rollup in a single pass.
    ///
    /// Returns `None` on empty input: a rollup row never summarizes zero
    /// ticks.
    pub fn from_trades(pair_name: &str, exchange: &str, trades: &[Trade]) -> Option<Self> {
        let first = trades.first()?;
        let mut sum = 0.0;
        let mut min = first.price;
        let mut max = first.price;
        for trade in trades {
            sum += trade.price;
            if trade.price < min {
                min = trade.price;
            }
            if trade.price > max {
                max = trade.price;
            }
        }
        Some(Self {
            pair_name: pair_name.to_string(),
            exchange: exchange.to_string(),
            average_price: sum / trades.len() as f64,
            min_price: min,
            max_price: max,
        })
    }
}

/// Rollup-row persistence and windowed aggregate queries.
#[async_trait]
pub trait MarketRepository: Send + Sync {
    async fn get_average(&self, params: &QueryParams) -> Result<f64>;
    async fn get_max(&self, params: &QueryParams) -> Result<f64>;
    async fn get_min(&self, params: &QueryParams) -> Result<f64>;
    async fn insert_market(&self, row: NewAggregate) -> Result<AggregatedData>;
}

/// Routes queries between the cache tier and the cold store.
///
/// `get_latest` always goes through the cache tier, which embeds its own
/// fallback, so the query API never sees two sources.
pub struct StorageAdapter {
    cache: Arc<dyn TickCache>,
    repo: Arc<dyn MarketRepository>,
}

impl StorageAdapter {
    pub fn new(cache: Arc<dyn TickCache>, repo: Arc<dyn MarketRepository>) -> Self {
        Self { cache, repo }
    }

    pub async fn get_average(&self, params: &QueryParams) -> Result<f64> {
        if params.window <= CACHE_WINDOW {
            return Ok(self.rollup_from_cache(params).await?.average_price);
        }
        self.repo.get_average(params).await
    }

    pub async fn get_max(&self, params: &QueryParams) -> Result<f64> {
        if params.window <= CACHE_WINDOW {
            return Ok(self.rollup_from_cache(params).await?.max_price);
        }
        self.repo.get_max(params).await
    }

    pub async fn get_min(&self, params: &QueryParams) -> Result<f64> {
        if params.window <= CACHE_WINDOW {
            return Ok(self.rollup_from_cache(params).await?.min_price);
        }
        self.repo.get_min(params).await
    }

    pub async fn get_latest(&self, exchange: &str, symbol: &str) -> Result<f64> {
        self.cache.get_latest(exchange, symbol).await
    }

    async fn rollup_from_cache(&self, params: &QueryParams) -> Result<NewAggregate> {
        let trades = self
            .cache
            .get_raw_data(&params.exchange, &params.pair_name, params.window)
            .await?;
        NewAggregate::from_trades(&params.pair_name, &params.exchange, &trades)
            .ok_or(Error::NoData)
    }
}
