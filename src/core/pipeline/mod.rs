//! Fan-out / worker-pool / fan-in topology.
//!
//! One merged task stream is duplicated into K pool inputs, each pool runs
//! W interchangeable workers over a [`TaskHandler`], and the per-pool
//! result streams merge back into one re-circulated task stream tagged
//! `global`. Teardown is cascade-driven: closing the source closes every
//! downstream channel in order.

mod fan_in;
mod fan_out;
mod worker;

pub use fan_in::fan_in;
pub use fan_out::fan_out;
pub use worker::{TaskHandler, Worker, WorkerPool};
