//! Query-side service translating API parameters into storage reads.

use std::sync::Arc;
use std::time::Duration;

use crate::core::store::{QueryParams, StorageAdapter};
use crate::error::{Error, Result};

/// Window used when the caller supplies no period.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Stats {
    storage: Arc<StorageAdapter>,
}

impl Stats {
    pub fn new(storage: Arc<StorageAdapter>) -> Self {
        Self { storage }
    }

    pub async fn latest_price(&self, exchange: &str, symbol: &str) -> Result<f64> {
        self.storage.get_latest(exchange, symbol).await
    }

    pub async fn average_price(
        &self,
        exchange: &str,
        symbol: &str,
        period: Option<&str>,
    ) -> Result<f64> {
        let params = Self::params(exchange, symbol, period)?;
        self.storage.get_average(&params).await
    }

    pub async fn highest_price(
        &self,
        exchange: &str,
        symbol: &str,
        period: Option<&str>,
    ) -> Result<f64> {
        let params = Self::params(exchange, symbol, period)?;
        self.storage.get_max(&params).await
    }

    pub async fn lowest_price(
        &self,
        exchange: &str,
        symbol: &str,
        period: Option<&str>,
    ) -> Result<f64> {
        let params = Self::params(exchange, symbol, period)?;
        self.storage.get_min(&params).await
    }

    fn params(exchange: &str, symbol: &str, period: Option<&str>) -> Result<QueryParams> {
        Ok(QueryParams {
            pair_name: symbol.to_string(),
            exchange: exchange.to_string(),
            window: parse_period(period)?,
        })
    }
}

/// Parses a `period` query value like `30s`, `2m` or `24h`.
///
/// Absent or empty means the default 24 h window; unparsable or
/// non-positive values are validation errors.
pub fn parse_period(period: Option<&str>) -> Result<Duration> {
    let Some(period) = period.filter(|p| !p.is_empty()) else {
        return Ok(DEFAULT_PERIOD);
    };
    let window = humantime::parse_duration(period)
        .map_err(|err| Error::Validation(format!("invalid period {period:?}: {err}")))?;
    if window.is_zero() {
        return Err(Error::Validation(format!(
            "period must be positive, got {period:?}"
        )));
    }
    Ok(window)
}
