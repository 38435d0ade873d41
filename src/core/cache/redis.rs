//! Redis-backed hot tier.
//!
//! Ticks live in sorted sets keyed `prices:<exchange>:<symbol>`. The score
//! is the server-observed unix second and the member is the JSON payload
//! `{"price":<float>,"ts":<int>}`, so re-insertion of the same tick in the
//! same second is a set-semantics no-op.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Deserialize;
use tracing::{info, warn};

use super::{TickCache, RETENTION};
use crate::app::RedisConfig;
use crate::core::domain::Trade;
use crate::error::{Error, Result};

const KEY_PREFIX: &str = "prices";

/// Hot-tier client over a connection-managed Redis handle.
///
/// The connection manager is cheap to clone and safe for concurrent use;
/// every operation clones it, so `&self` methods can run from any task.
pub struct RedisCache {
    conn: ConnectionManager,
}

/// Sorted-set member payload.
#[derive(Deserialize)]
struct Member {
    price: f64,
    ts: i64,
}

impl RedisCache {
    /// Connects and verifies the server responds to PING.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url())?;
        let conn = ConnectionManager::new(client).await?;
        let cache = Self { conn };
        cache.ping().await?;
        info!(host = %config.host, port = config.port, "connected to redis");
        Ok(cache)
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }

    fn key(exchange: &str, symbol: &str) -> String {
        format!("{KEY_PREFIX}:{exchange}:{symbol}")
    }

    fn member(price: f64, ts: i64) -> String {
        format!("{{\"price\":{price:.8},\"ts\":{ts}}}")
    }

    fn parse_member(member: &str, symbol: &str) -> Result<Trade> {
        let parsed: Member = serde_json::from_str(member)
            .map_err(|err| Error::Parse(format!("cache member {member:?}: {err}")))?;
        Ok(Trade {
            symbol: symbol.to_string(),
            price: parsed.price,
            timestamp: parsed.ts,
        })
    }
}

#[async_trait]
impl TickCache for RedisCache {
    async fn save_raw_data(&self, exchange: &str, trade: &Trade) -> Result<()> {
        let key = Self::key(exchange, &trade.symbol);
        let now = Utc::now().timestamp();
        let mut conn = self.conn.clone();

        // Add, trim past the retention horizon and refresh the key TTL in
        // one transaction so a crash never leaves an untrimmed key behind.
        redis::pipe()
            .atomic()
            .zadd(&key, Self::member(trade.price, now), now)
            .ignore()
            .zrembyscore(&key, "-inf", now - RETENTION.as_secs() as i64)
            .ignore()
            .expire(&key, RETENTION.as_secs() as i64)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_raw_data(
        &self,
        exchange: &str,
        symbol: &str,
        window: Duration,
    ) -> Result<Vec<Trade>> {
        let key = Self::key(exchange, symbol);
        let now = Utc::now().timestamp();
        let from = now - window.as_secs() as i64;
        let mut conn = self.conn.clone();

        let members: Vec<(String, f64)> = conn.zrangebyscore_withscores(&key, from, now).await?;
        members
            .iter()
            .map(|(member, _)| Self::parse_member(member, symbol))
            .collect()
    }

    async fn get_latest(&self, exchange: &str, symbol: &str) -> Result<f64> {
        let key = Self::key(exchange, symbol);
        let mut conn = self.conn.clone();

        let members: Vec<(String, f64)> = conn.zrevrange_withscores(&key, 0, 0).await?;
        let Some((member, _)) = members.first() else {
            return Err(Error::NoData);
        };
        Ok(Self::parse_member(member, symbol)?.price)
    }

    async fn get_collection(&self) -> Result<(Vec<String>, Vec<String>)> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = {
            let mut iter: redis::AsyncIter<'_, String> =
                conn.scan_match(format!("{KEY_PREFIX}:*:*")).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut exchanges = Vec::new();
        let mut symbols = Vec::new();
        for key in keys {
            let mut parts = key.splitn(3, ':');
            let (Some(prefix), Some(exchange), Some(symbol)) =
                (parts.next(), parts.next(), parts.next())
            else {
                warn!(key = %key, "invalid cache key format");
                continue;
            };
            if prefix != KEY_PREFIX || exchange.is_empty() || symbol.is_empty() {
                warn!(key = %key, "invalid cache key format");
                continue;
            }
            if !exchanges.iter().any(|e| e == exchange) {
                exchanges.push(exchange.to_string());
            }
            if !symbols.iter().any(|s| s == symbol) {
                symbols.push(symbol.to_string());
            }
        }
        Ok((exchanges, symbols))
    }
}
