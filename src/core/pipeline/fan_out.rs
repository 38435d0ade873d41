//! Broadcast stage duplicating the task stream into every pool input.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::domain::Task;

/// Copies every task read from `src` to each destination.
///
/// Sends are non-blocking: a destination whose channel is full loses its
/// copy while the others still receive. Slow pools shed load instead of
/// stalling producers; duplication across pools is redundancy, not the
/// correctness mechanism, and the cache tolerates re-insertion of the same
/// tick. When `src` closes (or the token fires), dropping the senders
/// closes every destination.
pub async fn fan_out(
    token: CancellationToken,
    mut src: mpsc::Receiver<Task>,
    dests: Vec<mpsc::Sender<Task>>,
) {
    loop {
        let task = tokio::select! {
            _ = token.cancelled() => break,
            task = src.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        for dest in &dests {
            match dest.try_send(task.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(from = %task.from, "fan-out: destination full, dropping copy");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }
    debug!("fan-out: source closed, closing destinations");
}
