//! Postgres-backed cold store.
//!
//! Two tables: `market` holds the rollup rows the aggregator writes, and
//! `raw_data` is the degraded-mode tick fallback the cache adapter writes
//! to when the hot tier is unreachable. Raw rows are purged
//! opportunistically on access rather than by a background job.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{MarketRepository, NewAggregate, QueryParams};
use crate::app::PostgresConfig;
use crate::core::cache::TickCache;
use crate::core::domain::{AggregatedData, Trade};
use crate::error::{Error, Result};

const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Fallback rows older than this are purged on write.
const SAVE_PURGE: &str = "60 seconds";
/// Fallback rows older than this are purged on read.
const READ_PURGE: &str = "90 seconds";

const GET_AVERAGE: &str = "\
SELECT AVG(average_price) FROM market \
WHERE pair_name = $1 AND exchange = $2 \
  AND timestamp > now() - ($3 * interval '1 second')";

const GET_MAX: &str = "\
SELECT MAX(max_price) FROM market \
WHERE pair_name = $1 AND exchange = $2 \
  AND timestamp > now() - ($3 * interval '1 second')";

const GET_MIN: &str = "\
SELECT MIN(min_price) FROM market \
WHERE pair_name = $1 AND exchange = $2 \
  AND timestamp > now() - ($3 * interval '1 second')";

const INSERT_MARKET: &str = "\
INSERT INTO market (pair_name, exchange, average_price, min_price, max_price) \
VALUES ($1, $2, $3, $4, $5) \
RETURNING id, pair_name, exchange, timestamp, average_price, min_price, max_price";

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Opens a connection pool and verifies the server answers within the
    /// ping deadline.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url())
            .await?;
        let store = Self { pool };
        store.ping().await?;
        info!(host = %config.host, db = %config.db, "connected to postgres");
        Ok(store)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| Error::Internal(err.to_string()))
    }

    pub async fn ping(&self) -> Result<()> {
        tokio::time::timeout(PING_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| Error::Timeout("postgres ping"))??;
        Ok(())
    }

    async fn windowed_aggregate(&self, sql: &str, params: &QueryParams) -> Result<f64> {
        let value: Option<f64> = sqlx::query_scalar(sql)
            .bind(&params.pair_name)
            .bind(&params.exchange)
            .bind(params.window.as_secs() as f64)
            .fetch_one(&self.pool)
            .await?;
        value.ok_or(Error::NoData)
    }

    async fn purge_raw_data(&self, older_than: &str) {
        let result = sqlx::query("DELETE FROM raw_data WHERE created_at < now() - $1::interval")
            .bind(older_than)
            .execute(&self.pool)
            .await;
        if let Ok(done) = result {
            if done.rows_affected() > 0 {
                debug!(rows = done.rows_affected(), "purged stale fallback ticks");
            }
        }
    }
}

#[async_trait]
impl MarketRepository for PostgresStore {
    async fn get_average(&self, params: &QueryParams) -> Result<f64> {
        self.windowed_aggregate(GET_AVERAGE, params).await
    }

    async fn get_max(&self, params: &QueryParams) -> Result<f64> {
        self.windowed_aggregate(GET_MAX, params).await
    }

    async fn get_min(&self, params: &QueryParams) -> Result<f64> {
        self.windowed_aggregate(GET_MIN, params).await
    }

    async fn insert_market(&self, row: NewAggregate) -> Result<AggregatedData> {
        let inserted = sqlx::query(INSERT_MARKET)
            .bind(&row.pair_name)
            .bind(&row.exchange)
            .bind(row.average_price)
            .bind(row.min_price)
            .bind(row.max_price)
            .fetch_one(&self.pool)
            .await?;
        Ok(AggregatedData {
            id: inserted.try_get("id")?,
            pair_name: inserted.try_get("pair_name")?,
            exchange: inserted.try_get("exchange")?,
            timestamp: inserted.try_get::<DateTime<Utc>, _>("timestamp")?,
            average_price: inserted.try_get("average_price")?,
            min_price: inserted.try_get("min_price")?,
            max_price: inserted.try_get("max_price")?,
        })
    }
}

#[async_trait]
impl TickCache for PostgresStore {
    async fn save_raw_data(&self, exchange: &str, trade: &Trade) -> Result<()> {
        sqlx::query("INSERT INTO raw_data (exchange, pair_name, price) VALUES ($1, $2, $3)")
            .bind(exchange)
            .bind(&trade.symbol)
            .bind(trade.price)
            .execute(&self.pool)
            .await?;
        self.purge_raw_data(SAVE_PURGE).await;
        Ok(())
    }

    async fn get_raw_data(
        &self,
        exchange: &str,
        symbol: &str,
        window: Duration,
    ) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT pair_name, price, created_at FROM raw_data \
             WHERE pair_name = $1 AND exchange = $2 \
               AND created_at > now() - ($3 * interval '1 second') \
             ORDER BY created_at ASC",
        )
        .bind(symbol)
        .bind(exchange)
        .bind(window.as_secs() as f64)
        .fetch_all(&self.pool)
        .await?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            trades.push(Trade {
                symbol: row.try_get("pair_name")?,
                price: row.try_get("price")?,
                timestamp: row.try_get::<DateTime<Utc>, _>("created_at")?.timestamp(),
            });
        }
        self.purge_raw_data(READ_PURGE).await;
        Ok(trades)
    }

    async fn get_latest(&self, exchange: &str, symbol: &str) -> Result<f64> {
        let price: Option<f64> = sqlx::query_scalar(
            "SELECT price FROM raw_data \
             WHERE pair_name = $1 AND exchange = $2 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(symbol)
        .bind(exchange)
        .fetch_optional(&self.pool)
        .await?;
        price.ok_or(Error::NoData)
    }

    async fn get_collection(&self) -> Result<(Vec<String>, Vec<String>)> {
        let exchanges: Vec<String> = sqlx::query_scalar("SELECT DISTINCT exchange FROM raw_data")
            .fetch_all(&self.pool)
            .await?;
        let symbols: Vec<String> = sqlx::query_scalar("SELECT DISTINCT pair_name FROM raw_data")
            .fetch_all(&self.pool)
            .await?;
        Ok((exchanges, symbols))
    }
}

/// Round-trips against a live Postgres on localhost:5432.
#[cfg(all(test, feature = "integration-tests"))]
mod integration_tests {
    use super::*;

    async fn live_store() -> PostgresStore {
        let config = PostgresConfig {
            host: "localhost".to_string(),
            user: "marketflow".to_string(),
            password: "marketflow".to_string(),
            db: "marketflow".to_string(),
        };
        let store = PostgresStore::connect(&config).await.expect("live postgres");
        store.run_migrations().await.expect("migrations");
        store
    }

    #[tokio::test]
    async fn fallback_save_then_read_back() {
        let store = live_store().await;
        let trade = Trade {
            symbol: "BTCUSDT".to_string(),
            price: 30000.0,
            timestamp: Utc::now().timestamp(),
        };
        store.save_raw_data("it-e1", &trade).await.unwrap();

        let latest = store.get_latest("it-e1", "BTCUSDT").await.unwrap();
        assert_eq!(latest, 30000.0);

        let (exchanges, symbols) = store.get_collection().await.unwrap();
        assert!(exchanges.iter().any(|e| e == "it-e1"));
        assert!(symbols.iter().any(|s| s == "BTCUSDT"));
    }

    #[tokio::test]
    async fn rollup_insert_preserves_bounds() {
        let store = live_store().await;
        let row = store
            .insert_market(NewAggregate {
                pair_name: "ETHUSDT".to_string(),
                exchange: "it-e1".to_string(),
                average_price: 2050.0,
                min_price: 2000.0,
                max_price: 2100.0,
            })
            .await
            .unwrap();
        assert!(row.id > 0);
        assert!(row.min_price <= row.average_price && row.average_price <= row.max_price);

        let avg = store
            .get_average(&QueryParams {
                pair_name: "ETHUSDT".to_string(),
                exchange: "it-e1".to_string(),
                window: Duration::from_secs(120),
            })
            .await
            .unwrap();
        assert!(avg > 0.0);
    }
}
