//! Ticker-driven rollup of recent cache contents into the cold store.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::cache::TickCache;
use crate::core::store::{MarketRepository, NewAggregate};
use crate::error::{Error, Result};

/// Rollup cadence.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Deadline for one whole batch.
const BATCH_TIMEOUT: Duration = Duration::from_secs(2);
/// Raw-tick horizon each rollup summarizes.
const ROLLUP_WINDOW: Duration = Duration::from_secs(60);

/// Rolls the last minute of cache contents into one rollup row per
/// `(exchange, symbol)` pair, once per second.
///
/// Pairs are discovered from cache keys on every tick, never configured.
/// Failures in one pair do not abort the batch.
pub struct Aggregator {
    cache: Arc<dyn TickCache>,
    repo: Arc<dyn MarketRepository>,
    last_error: Mutex<Option<Error>>,
}

impl Aggregator {
    pub fn new(cache: Arc<dyn TickCache>, repo: Arc<dyn MarketRepository>) -> Self {
        Self {
            cache,
            repo,
            last_error: Mutex::new(None),
        }
    }

    /// Runs until cancelled, then performs one final aggregation pass.
    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("aggregator: final pass before shutdown");
                    self.tick().await;
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        match tokio::time::timeout(BATCH_TIMEOUT, self.aggregate(ROLLUP_WINDOW)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "aggregation pass failed"),
            Err(_) => warn!("aggregation pass exceeded {BATCH_TIMEOUT:?}"),
        }
        if let Some(err) = self.last_error.lock().take() {
            error!(error = %err, "aggregation error");
        }
    }

    /// One pass: discover pairs, roll each one up concurrently.
    pub async fn aggregate(&self, window: Duration) -> Result<()> {
        let (exchanges, symbols) = self.cache.get_collection().await?;

        let mut rollups = JoinSet::new();
        for exchange in &exchanges {
            for symbol in &symbols {
                let cache = Arc::clone(&self.cache);
                let repo = Arc::clone(&self.repo);
                let exchange = exchange.clone();
                let symbol = symbol.clone();
                rollups.spawn(async move {
                    let trades = match cache.get_raw_data(&exchange, &symbol, window).await {
                        Ok(trades) => trades,
                        Err(err) => {
                            warn!(%exchange, %symbol, error = %err, "failed to read raw ticks");
                            return Ok(());
                        }
                    };
                    let Some(rollup) = NewAggregate::from_trades(&symbol, &exchange, &trades)
                    else {
                        return Ok(());
                    };
                    repo.insert_market(rollup).await?;
                    Ok::<(), Error>(())
                });
            }
        }

        while let Some(joined) = rollups.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => *self.last_error.lock() = Some(err),
                Err(err) => *self.last_error.lock() = Some(Error::Internal(err.to_string())),
            }
        }
        Ok(())
    }
}
