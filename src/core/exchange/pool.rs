//! Pool of running connectors merged into one task stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Exchanger, ExchangerResult, LiveExchanger, SyntheticExchanger};
use crate::core::domain::Task;
use crate::error::{Error, Result};

/// Soft cap on simultaneously running connectors.
pub const DEFAULT_MAX_COUNT: usize = 4;

/// Emission interval for synthetic members registered through the pool.
const SYNTHETIC_INTERVAL: Duration = Duration::from_millis(100);

struct Member {
    generation: u64,
    exchanger: Arc<dyn Exchanger>,
}

#[derive(Default)]
struct PoolInner {
    members: HashMap<String, Member>,
    stopping: bool,
}

/// Name-keyed pool of connectors sharing one output task channel and one
/// terminal-result channel.
///
/// The pool is the sole mutator of the membership map; a dropped connector
/// is not re-dialed; reconnection is the supervisor's concern via mode
/// switch.
pub struct ExchangerPool {
    max_count: usize,
    token: CancellationToken,
    inner: Arc<Mutex<PoolInner>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_generation: AtomicU64,
    out_tx: Mutex<Option<mpsc::Sender<Task>>>,
    result_tx: Mutex<Option<mpsc::Sender<ExchangerResult>>>,
    out_rx: Mutex<Option<mpsc::Receiver<Task>>>,
    result_rx: Mutex<Option<mpsc::Receiver<ExchangerResult>>>,
}

impl ExchangerPool {
    pub fn new(max_count: usize, token: CancellationToken) -> Self {
        let (out_tx, out_rx) = mpsc::channel(1);
        // One terminal-result slot per member, so stopping a full pool
        // never blocks behind a slow result consumer.
        let (result_tx, result_rx) = mpsc::channel(max_count.max(1));
        Self {
            max_count,
            token,
            inner: Arc::new(Mutex::new(PoolInner::default())),
            handles: Mutex::new(Vec::new()),
            next_generation: AtomicU64::new(0),
            out_tx: Mutex::new(Some(out_tx)),
            result_tx: Mutex::new(Some(result_tx)),
            out_rx: Mutex::new(Some(out_rx)),
            result_rx: Mutex::new(Some(result_rx)),
        }
    }

    /// Registers and starts a live TCP connector.
    pub fn add(&self, name: &str, host: &str, port: u16) -> Result<()> {
        let exchanger = LiveExchanger::new(name, host, port, &self.token)?;
        self.spawn_member(name, Arc::new(exchanger))
    }

    /// Registers and starts a synthetic connector under the same contract.
    pub fn add_synthetic(&self, name: &str) -> Result<()> {
        let exchanger = SyntheticExchanger::new(name, SYNTHETIC_INTERVAL, &self.token);
        self.spawn_member(name, Arc::new(exchanger))
    }

    fn spawn_member(&self, name: &str, exchanger: Arc<dyn Exchanger>) -> Result<()> {
        let (out_tx, result_tx) = {
            let out = self.out_tx.lock();
            let result = self.result_tx.lock();
            match (out.as_ref(), result.as_ref()) {
                (Some(out), Some(result)) => (out.clone(), result.clone()),
                _ => return Err(Error::Validation("exchanger pool is closed".to_string())),
            }
        };

        let mut inner = self.inner.lock();
        if inner.stopping {
            return Err(Error::Validation("exchanger pool is stopping".to_string()));
        }
        if inner.members.len() >= self.max_count {
            return Err(Error::Validation(format!(
                "max exchangers limit reached: {}",
                self.max_count
            )));
        }
        if inner.members.contains_key(name) {
            return Err(Error::Validation(format!(
                "exchanger with name {name} already exists"
            )));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        inner.members.insert(
            name.to_string(),
            Member {
                generation,
                exchanger: Arc::clone(&exchanger),
            },
        );

        let shared = Arc::clone(&self.inner);
        let name = name.to_string();
        let handle = tokio::spawn(async move {
            exchanger.stream(out_tx, result_tx).await;
            // Remove only if the name still maps to this member; a removed
            // and re-added name must not lose its successor.
            let mut inner = shared.lock();
            if inner
                .members
                .get(&name)
                .is_some_and(|m| m.generation == generation)
            {
                inner.members.remove(&name);
                debug!(exchange = %name, "exchanger exited and was deregistered");
            }
        });
        self.handles.lock().push(handle);
        Ok(())
    }

    /// Stops the named connector and removes it from the membership map.
    pub fn remove(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(member) = inner.members.remove(name) {
            member.exchanger.stop();
        }
    }

    /// Stops every member, waits for all of them to exit, then closes both
    /// shared channels. Safe to call more than once.
    pub async fn stop_pool(&self) {
        {
            let mut inner = self.inner.lock();
            inner.stopping = true;
            for (name, member) in inner.members.iter() {
                warn!(exchange = %name, "stopping exchanger");
                member.exchanger.stop();
            }
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }

        self.out_tx.lock().take();
        self.result_tx.lock().take();
    }

    /// Names of the currently running connectors, sorted.
    pub fn connected_exchangers(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner.members.keys().cloned().collect();
        names.sort();
        names
    }

    /// Hands out the read end of the merged task stream. Yields once.
    pub fn take_out(&self) -> Option<mpsc::Receiver<Task>> {
        self.out_rx.lock().take()
    }

    /// Hands out the read end of the terminal-result stream. Yields once.
    pub fn take_results(&self) -> Option<mpsc::Receiver<ExchangerResult>> {
        self.result_rx.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max_count: usize) -> ExchangerPool {
        ExchangerPool::new(max_count, CancellationToken::new())
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let pool = pool(DEFAULT_MAX_COUNT);
        pool.add_synthetic("e1").unwrap();
        let err = pool.add_synthetic("e1").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        pool.stop_pool().await;
    }

    #[tokio::test]
    async fn cap_means_at_most_max_count_members() {
        let pool = pool(2);
        pool.add_synthetic("e1").unwrap();
        pool.add_synthetic("e2").unwrap();
        let err = pool.add_synthetic("e3").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(pool.connected_exchangers(), vec!["e1", "e2"]);
        pool.stop_pool().await;
    }

    #[tokio::test]
    async fn add_after_stop_is_rejected() {
        let pool = pool(DEFAULT_MAX_COUNT);
        pool.add_synthetic("e1").unwrap();
        pool.stop_pool().await;
        assert!(pool.add_synthetic("e2").is_err());
    }

    #[tokio::test]
    async fn stop_pool_is_idempotent_and_closes_channels() {
        let pool = pool(DEFAULT_MAX_COUNT);
        let mut out = pool.take_out().unwrap();
        pool.add_synthetic("e1").unwrap();

        pool.stop_pool().await;
        pool.stop_pool().await;

        // Drain whatever was in flight; the channel must then be closed.
        while out.try_recv().is_ok() {}
        assert!(out.recv().await.is_none());
        assert!(pool.connected_exchangers().is_empty());
    }

    #[tokio::test]
    async fn removed_member_does_not_evict_its_successor() {
        let pool = pool(DEFAULT_MAX_COUNT);
        pool.add_synthetic("e1").unwrap();
        pool.remove("e1");
        pool.add_synthetic("e1").unwrap();

        // Give the removed member's task time to exit and run its cleanup.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.connected_exchangers(), vec!["e1"]);
        pool.stop_pool().await;
    }

    #[tokio::test]
    async fn members_emit_into_the_shared_stream() {
        let pool = pool(DEFAULT_MAX_COUNT);
        let mut out = pool.take_out().unwrap();
        pool.add_synthetic("e1").unwrap();

        let task = out.recv().await.expect("expected a synthetic tick");
        assert_eq!(task.from, "e1");
        pool.stop_pool().await;
    }
}
