//! Cross-cutting services: per-task trade handling, periodic aggregation
//! and the query-side stats service.

mod aggregator;
mod stats;
mod trade_handler;

pub use aggregator::Aggregator;
pub use stats::Stats;
pub use trade_handler::TradeHandler;
