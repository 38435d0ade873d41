//! Exchange connectors feeding the pipeline.
//!
//! A connector is one long-lived producer of raw tick lines. The set is
//! closed at two variants behind the [`Exchanger`] trait: [`LiveExchanger`]
//! reads line-delimited frames from a TCP endpoint and
//! [`SyntheticExchanger`] fabricates plausible ticks on an interval. The
//! [`ExchangerPool`] owns the running connectors and merges their output
//! into one task stream.

mod live;
mod pool;
mod synthetic;

pub use live::LiveExchanger;
pub use pool::{ExchangerPool, DEFAULT_MAX_COUNT};
pub use synthetic::SyntheticExchanger;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::domain::Task;
use crate::error::Error;

/// Terminal report a connector emits exactly once when its stream ends.
///
/// `err` is `None` on a clean (cancelled) stop; a dropped remote or read
/// failure carries the connection-class error.
#[derive(Debug)]
pub struct ExchangerResult {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub received_tasks: u64,
    pub err: Option<Error>,
}

/// One upstream tick producer.
#[async_trait]
pub trait Exchanger: Send + Sync {
    /// Runs until cancelled or the upstream closes, pushing tasks to `out`
    /// and exactly one terminal [`ExchangerResult`] to `results`.
    async fn stream(&self, out: mpsc::Sender<Task>, results: mpsc::Sender<ExchangerResult>);

    /// Cancels this connector's token; `stream` returns shortly after.
    fn stop(&self);

    fn name(&self) -> &str;
}
