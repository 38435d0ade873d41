//! Application supervisor: lifecycle, pipeline wiring and mode switching.
//!
//! The supervisor owns every channel and background task. Startup wires
//! connectors → fan-out → K worker pools → fan-in → merge pool; shutdown
//! cancels the root token and lets channel closure cascade through the
//! same topology in reverse dependency order.

mod config;

pub use config::{Config, ExchangeEndpoint, PostgresConfig, RedisConfig};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{self, SystemControl};
use crate::core::cache::{CacheAdapter, RedisCache, TickCache};
use crate::core::domain::{Task, TaskResult};
use crate::core::exchange::{ExchangerPool, ExchangerResult, DEFAULT_MAX_COUNT};
use crate::core::pipeline::{fan_in, fan_out, TaskHandler, WorkerPool};
use crate::core::service::{Aggregator, Stats, TradeHandler};
use crate::core::store::{MarketRepository, PostgresStore, StorageAdapter};
use crate::error::{Error, Result};

/// Number of primary worker pools fed by fan-out.
const FANOUT_POOLS: usize = 3;
/// Workers per primary pool.
const POOL_WORKERS: usize = 10;
/// Workers in the merge pool handling re-circulated global tasks.
const MERGE_POOL_WORKERS: usize = 30;
/// Grace given to in-flight HTTP requests on shutdown.
const HTTP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for one backend health ping.
const HEALTH_PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Producer mode: live TCP connectors or synthetic generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Test,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Test => "test",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend reachability snapshot served at `/health`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub postgres: String,
    pub redis: String,
}

const HEALTH_OK: &str = "OK";
const HEALTH_DOWN: &str = "Not working";

pub struct App {
    config: Config,
    mode: Mutex<Mode>,
    pool: Arc<ExchangerPool>,
    cache: Arc<CacheAdapter>,
    redis: Arc<RedisCache>,
    store: Arc<PostgresStore>,
    stats: Arc<Stats>,
    token: CancellationToken,
}

impl App {
    /// Opens both backends, runs migrations and builds the service graph.
    /// Any failure here is unrecoverable and should exit the process.
    pub async fn bootstrap(config: Config, token: CancellationToken) -> Result<Arc<Self>> {
        let redis = Arc::new(RedisCache::connect(&config.redis).await?);
        let store = Arc::new(PostgresStore::connect(&config.postgres).await?);
        store.run_migrations().await?;

        let cache = Arc::new(CacheAdapter::new(
            Arc::clone(&redis) as Arc<dyn TickCache>,
            Arc::clone(&store) as Arc<dyn TickCache>,
        ));
        let storage = Arc::new(StorageAdapter::new(
            Arc::clone(&cache) as Arc<dyn TickCache>,
            Arc::clone(&store) as Arc<dyn MarketRepository>,
        ));
        let stats = Arc::new(Stats::new(storage));
        let pool = Arc::new(ExchangerPool::new(DEFAULT_MAX_COUNT, token.child_token()));

        Ok(Arc::new(Self {
            config,
            mode: Mutex::new(Mode::Live),
            pool,
            cache,
            redis,
            store,
            stats,
            token,
        }))
    }

    /// Runs the pipeline, aggregator and HTTP listener until the root
    /// token is cancelled, then tears everything down in reverse order.
    pub async fn run(self: Arc<Self>, port: u16) -> Result<()> {
        let task_rx = self
            .pool
            .take_out()
            .ok_or_else(|| Error::Internal("task stream already taken".to_string()))?;
        let exchanger_results = self
            .pool
            .take_results()
            .ok_or_else(|| Error::Internal("result stream already taken".to_string()))?;

        let handler: Arc<dyn TaskHandler> =
            Arc::new(TradeHandler::new(Arc::clone(&self.cache) as Arc<dyn TickCache>));

        // Pipeline channels: K pool inputs with their result streams, plus
        // the re-circulation channel pair behind fan-in.
        let mut pool_inputs = Vec::with_capacity(FANOUT_POOLS);
        let mut pool_task_rxs = Vec::with_capacity(FANOUT_POOLS);
        let mut pool_result_txs = Vec::with_capacity(FANOUT_POOLS);
        let mut pool_outputs = Vec::with_capacity(FANOUT_POOLS);
        for _ in 0..FANOUT_POOLS {
            let (task_tx, task_rx) = mpsc::channel::<Task>(1);
            let (result_tx, result_rx) = mpsc::channel::<TaskResult>(1);
            pool_inputs.push(task_tx);
            pool_task_rxs.push(task_rx);
            pool_result_txs.push(result_tx);
            pool_outputs.push(result_rx);
        }
        let (fanin_tx, fanin_rx) = mpsc::channel::<Task>(1);
        let (merge_result_tx, merge_result_rx) = mpsc::channel::<TaskResult>(1);

        // Producers block on the task channel until fan-out starts.
        for endpoint in &self.config.exchanges {
            self.pool.add(&endpoint.name, &endpoint.host, endpoint.port)?;
        }

        let mut drivers: Vec<JoinHandle<()>> = Vec::new();
        for (i, (task_rx_i, result_tx_i)) in pool_task_rxs
            .into_iter()
            .zip(pool_result_txs)
            .enumerate()
        {
            drivers.push(spawn_pool_driver(
                format!("pool-{}", i + 1),
                POOL_WORKERS,
                Arc::clone(&handler),
                task_rx_i,
                result_tx_i,
            ));
        }

        drivers.push(tokio::spawn(fan_out(
            self.token.child_token(),
            task_rx,
            pool_inputs,
        )));

        // Re-circulation: fan-in feeds the merge pool, which writes the
        // global exchange tag to the cache.
        drivers.push(tokio::spawn(fan_in(
            self.token.child_token(),
            pool_outputs,
            fanin_tx,
        )));
        drivers.push(spawn_pool_driver(
            "pool-global".to_string(),
            MERGE_POOL_WORKERS,
            Arc::clone(&handler),
            fanin_rx,
            merge_result_tx,
        ));

        drivers.push(tokio::spawn(drain_exchanger_results(exchanger_results)));
        drivers.push(tokio::spawn(drain_task_results(merge_result_rx)));

        let aggregator = Aggregator::new(
            Arc::clone(&self.cache) as Arc<dyn TickCache>,
            Arc::clone(&self.store) as Arc<dyn MarketRepository>,
        );
        let aggregator_token = self.token.child_token();
        let aggregator_handle = tokio::spawn(async move { aggregator.run(aggregator_token).await });

        let router = api::router(
            Arc::clone(&self.stats),
            Arc::clone(&self) as Arc<dyn SystemControl>,
        );
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, "HTTP API listening");
        let http_token = self.token.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { http_token.cancelled().await })
                .await
        });

        // A server failure is unrecoverable; it cancels the root like a
        // signal would.
        let server_result = tokio::select! {
            _ = self.token.cancelled() => None,
            result = &mut server => {
                self.token.cancel();
                Some(result)
            }
        };

        info!("shutting down exchanger pool");
        self.pool.stop_pool().await;
        for driver in drivers {
            let _ = driver.await;
        }
        info!("pipeline drained");

        let server_result = match server_result {
            Some(result) => Ok(result),
            None => tokio::time::timeout(HTTP_SHUTDOWN_TIMEOUT, server).await,
        };
        match server_result {
            Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
            Ok(Ok(Err(err))) => error!(error = %err, "HTTP server error"),
            Ok(Err(err)) => error!(error = %err, "HTTP server task failed"),
            Err(_) => warn!("HTTP server did not drain within {HTTP_SHUTDOWN_TIMEOUT:?}"),
        }

        let _ = aggregator_handle.await;
        info!("shutdown complete");
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        *self.mode.lock()
    }

    /// Replaces the three live connectors with synthetic ones under the
    /// same names. The mode mutex is held across the whole swap, so no
    /// mixed membership is ever observable.
    fn swap_producers(&self, target: Mode) -> Result<()> {
        let mut mode = self.mode.lock();
        if *mode == target {
            return Err(Error::AlreadyInMode(target.as_str()));
        }
        info!(mode = %target, "switching producer mode");

        for endpoint in &self.config.exchanges {
            self.pool.remove(&endpoint.name);
        }
        *mode = target;
        for endpoint in &self.config.exchanges {
            match target {
                Mode::Test => self.pool.add_synthetic(&endpoint.name)?,
                Mode::Live => self
                    .pool
                    .add(&endpoint.name, &endpoint.host, endpoint.port)?,
            }
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

#[async_trait]
impl SystemControl for App {
    fn switch_to_test(&self) -> Result<()> {
        self.swap_producers(Mode::Test)
    }

    fn switch_to_live(&self) -> Result<()> {
        self.swap_producers(Mode::Live)
    }

    async fn health(&self) -> HealthReport {
        let postgres = tokio::time::timeout(HEALTH_PING_TIMEOUT, self.store.ping())
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        let redis = tokio::time::timeout(HEALTH_PING_TIMEOUT, self.redis.ping())
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        HealthReport {
            postgres: if postgres { HEALTH_OK } else { HEALTH_DOWN }.to_string(),
            redis: if redis { HEALTH_OK } else { HEALTH_DOWN }.to_string(),
        }
    }
}

/// Drives one worker pool: loop `work` until the input closes, then drain
/// the workers and close the pool's result stream.
fn spawn_pool_driver(
    name: String,
    size: usize,
    handler: Arc<dyn TaskHandler>,
    mut tasks: mpsc::Receiver<Task>,
    results: mpsc::Sender<TaskResult>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pool = WorkerPool::new(&name, size, handler);
        pool.create();
        while let Some(task) = tasks.recv().await {
            pool.work(task, &results).await;
        }
        let workers = pool.wait().await;
        for worker in &workers {
            info!(pool = %name, worker = %worker.name, tasks = worker.tasks_processed, "worker drained");
        }
    })
}

async fn drain_exchanger_results(mut results: mpsc::Receiver<ExchangerResult>) {
    while let Some(result) = results.recv().await {
        match &result.err {
            Some(err) => error!(
                exchange = %result.name,
                received = result.received_tasks,
                error = %err,
                "exchanger finished with error"
            ),
            None => info!(
                exchange = %result.name,
                received = result.received_tasks,
                "exchanger finished"
            ),
        }
    }
}

async fn drain_task_results(mut results: mpsc::Receiver<TaskResult>) {
    while let Some(result) = results.recv().await {
        if let Some(err) = &result.err {
            error!(from = %result.from, error = %err, "global handler error");
        }
    }
}
