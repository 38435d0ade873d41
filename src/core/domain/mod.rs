//! Core domain types flowing through the tick pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Exchange tag attached to ticks re-circulated through fan-in, giving one
/// merged stream alongside the per-exchange streams.
pub const GLOBAL_EXCHANGE: &str = "global";

/// Trading pairs emitted by the synthetic exchanges.
pub const SYMBOLS: [&str; 5] = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "DOGEUSDT", "TONUSDT"];

/// A single price observation. Immutable once produced.
///
/// `timestamp` is producer-supplied; the cache orders entries by
/// server-observed arrival time, not by this field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub price: f64,
    pub timestamp: i64,
}

impl Trade {
    /// Deserializes and validates one wire-format tick.
    ///
    /// A tick that deserializes but carries an empty or non-uppercase symbol
    /// or a non-finite/non-positive price is rejected the same way as
    /// malformed JSON: it must never reach the cache.
    pub fn parse(data: &str) -> Result<Trade> {
        let trade: Trade = serde_json::from_str(data)?;
        trade.validate()?;
        Ok(trade)
    }

    fn validate(&self) -> Result<()> {
        if self.symbol.is_empty()
            || !self
                .symbol
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(Error::Parse(format!("invalid symbol {:?}", self.symbol)));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(Error::Parse(format!("invalid price {}", self.price)));
        }
        Ok(())
    }
}

/// Pipeline envelope: one unparsed tick and the name of its producer.
#[derive(Debug, Clone)]
pub struct Task {
    pub from: String,
    pub data: String,
}

impl Task {
    pub fn new(from: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            data: data.into(),
        }
    }
}

/// Outcome of processing one [`Task`]. Every task accepted into the
/// pipeline produces exactly one of these.
#[derive(Debug)]
pub struct TaskResult {
    pub from: String,
    pub symbol: String,
    pub price: f64,
    pub timestamp: i64,
    pub err: Option<Error>,
}

impl TaskResult {
    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }
}

/// One persisted rollup row.
#[derive(Debug, Clone)]
pub struct AggregatedData {
    pub id: i64,
    pub pair_name: String,
    pub exchange: String,
    pub timestamp: DateTime<Utc>,
    pub average_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}
