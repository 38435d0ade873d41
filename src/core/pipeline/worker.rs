//! Pull-based worker pool bounded by a worker-availability channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::domain::{Task, TaskResult};

/// Per-task work unit run by every worker. Implementations must be
/// stateless with respect to tasks and safe to invoke concurrently.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Processes one task and returns its single [`TaskResult`].
    async fn handle(&self, worker_id: usize, task: Task) -> TaskResult;
}

/// One interchangeable worker and its processed-task counter.
#[derive(Debug)]
pub struct Worker {
    pub id: usize,
    pub name: String,
    pub tasks_processed: u64,
}

/// A pool of `size` workers handed out through a bounded channel.
///
/// The channel doubles as the backpressure mechanism: [`WorkerPool::work`]
/// blocks until a worker is available, so at most `size` handlers run
/// concurrently. The pool is driven externally: one driver loops `work`
/// until its input closes, then `wait`s for the stragglers.
pub struct WorkerPool {
    name: String,
    size: usize,
    handler: Arc<dyn TaskHandler>,
    slots_tx: mpsc::Sender<Worker>,
    slots_rx: mpsc::Receiver<Worker>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, size: usize, handler: Arc<dyn TaskHandler>) -> Self {
        let (slots_tx, slots_rx) = mpsc::channel(size.max(1));
        Self {
            name: name.into(),
            size,
            handler,
            slots_tx,
            slots_rx,
        }
    }

    /// Seeds the availability channel with all workers.
    pub fn create(&self) {
        for id in 1..=self.size {
            let worker = Worker {
                id,
                name: format!("{}-worker-{id}", self.name),
                tasks_processed: 0,
            };
            // Capacity equals size, so seeding never fails.
            let _ = self.slots_tx.try_send(worker);
        }
    }

    /// Checks a worker out, runs the handler on its own task, and checks
    /// the worker back in when the result has been emitted.
    pub async fn work(&mut self, task: Task, results: &mpsc::Sender<TaskResult>) {
        let Some(mut worker) = self.slots_rx.recv().await else {
            return;
        };
        let handler = Arc::clone(&self.handler);
        let slots = self.slots_tx.clone();
        let results = results.clone();
        tokio::spawn(async move {
            let outcome = handler.handle(worker.id, task).await;
            let _ = results.send(outcome).await;
            worker.tasks_processed += 1;
            let _ = slots.send(worker).await;
        });
    }

    /// Waits until every worker has been checked back in. Call only after
    /// the input stream has closed. Returns the drained workers so the
    /// driver can log their counters.
    pub async fn wait(&mut self) -> Vec<Worker> {
        let mut workers = Vec::with_capacity(self.size);
        for _ in 0..self.size {
            let Some(worker) = self.slots_rx.recv().await else {
                break;
            };
            workers.push(worker);
        }
        workers.sort_by_key(|w| w.id);
        workers
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
