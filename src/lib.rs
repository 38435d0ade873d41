//! MarketFlow - real-time trade tick pipeline with a two-tier price store.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── api/          # HTTP query surface (axum)
//! ├── app/          # Configuration + supervisor (lifecycle, mode switch)
//! ├── core/
//! │   ├── domain/   # Trade, Task, TaskResult, AggregatedData
//! │   ├── exchange/ # Live/synthetic connectors + connector pool
//! │   ├── pipeline/ # Fan-out, worker pools, fan-in
//! │   ├── cache/    # Hot tick cache + silent cold fallback
//! │   ├── store/    # Cold rollup store + hot/cold query routing
//! │   └── service/  # Trade handling, aggregation, price queries
//! └── error.rs      # Crate-wide error kinds
//! ```
//!
//! Data flow: connectors → merged task channel → fan-out → K worker pools →
//! fan-in → merge pool, with the aggregator rolling the cache into the cold
//! store on a 1-second tick.

pub mod api;
pub mod app;
pub mod core;
pub mod error;
