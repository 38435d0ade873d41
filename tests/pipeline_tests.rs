//! End-to-end pipeline tests over the in-memory cache tier.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use marketflow::core::cache::{MemoryCache, TickCache};
use marketflow::core::domain::{Task, Trade, GLOBAL_EXCHANGE};
use marketflow::core::exchange::{Exchanger, ExchangerPool, LiveExchanger};
use marketflow::core::pipeline::{fan_in, fan_out, TaskHandler, WorkerPool};
use marketflow::core::service::TradeHandler;
use marketflow::error::Error;

fn tick(symbol: &str, price: f64) -> String {
    format!(r#"{{"symbol":"{symbol}","price":{price},"timestamp":1700000000}}"#)
}

/// With a single pool sized to hold the whole burst, every task emitted by
/// the producer is accounted for at fan-in as either a result or a parse
/// error.
#[tokio::test]
async fn no_task_loss_through_a_single_pool() {
    let cache: Arc<dyn TickCache> = Arc::new(MemoryCache::new());
    let handler: Arc<dyn TaskHandler> = Arc::new(TradeHandler::new(cache));

    let (src_tx, src_rx) = mpsc::channel::<Task>(64);
    let (pool_tx, mut pool_rx) = mpsc::channel::<Task>(64);
    let fanout = tokio::spawn(fan_out(CancellationToken::new(), src_rx, vec![pool_tx]));

    let (result_tx, mut result_rx) = mpsc::channel(64);
    let driver = tokio::spawn(async move {
        let mut pool = WorkerPool::new("pool-1", 10, handler);
        pool.create();
        while let Some(task) = pool_rx.recv().await {
            pool.work(task, &result_tx).await;
        }
        pool.wait().await;
    });

    let total = 20;
    let malformed = 3;
    for n in 0..total - malformed {
        src_tx
            .send(Task::new("e1", tick("BTCUSDT", 30000.0 + n as f64)))
            .await
            .unwrap();
    }
    for _ in 0..malformed {
        src_tx.send(Task::new("e1", "not a tick")).await.unwrap();
    }
    drop(src_tx);

    fanout.await.unwrap();
    driver.await.unwrap();

    let mut ok = 0;
    let mut parse_errors = 0;
    while let Some(result) = result_rx.recv().await {
        match result.err {
            None => ok += 1,
            Some(Error::Parse(_)) => parse_errors += 1,
            Some(err) => panic!("unexpected error kind: {err}"),
        }
    }
    assert_eq!(ok + parse_errors, total);
    assert_eq!(parse_errors, malformed);
}

/// A tick accepted on one exchange re-circulates through fan-in and lands
/// in the cache a second time under the `global` tag.
#[tokio::test]
async fn accepted_ticks_recirculate_into_the_global_stream() {
    let cache = Arc::new(MemoryCache::new());
    let handler: Arc<dyn TaskHandler> =
        Arc::new(TradeHandler::new(Arc::clone(&cache) as Arc<dyn TickCache>));

    // Primary pool.
    let (task_tx, mut task_rx) = mpsc::channel::<Task>(16);
    let (result_tx, result_rx) = mpsc::channel(16);
    let primary_handler = Arc::clone(&handler);
    let primary = tokio::spawn(async move {
        let mut pool = WorkerPool::new("pool-1", 10, primary_handler);
        pool.create();
        while let Some(task) = task_rx.recv().await {
            pool.work(task, &result_tx).await;
        }
        pool.wait().await;
    });

    // Fan-in re-circulation into the merge pool.
    let (fanin_tx, mut fanin_rx) = mpsc::channel::<Task>(16);
    let merge_fan = tokio::spawn(fan_in(
        CancellationToken::new(),
        vec![result_rx],
        fanin_tx,
    ));
    let (merge_result_tx, mut merge_result_rx) = mpsc::channel(16);
    let merge = tokio::spawn(async move {
        let mut pool = WorkerPool::new("pool-global", 30, handler);
        pool.create();
        while let Some(task) = fanin_rx.recv().await {
            pool.work(task, &merge_result_tx).await;
        }
        pool.wait().await;
    });

    task_tx
        .send(Task::new("e1", tick("ETHUSDT", 2000.0)))
        .await
        .unwrap();
    drop(task_tx);

    primary.await.unwrap();
    merge_fan.await.unwrap();
    merge.await.unwrap();
    while merge_result_rx.recv().await.is_some() {}

    assert_eq!(cache.get_latest("e1", "ETHUSDT").await.unwrap(), 2000.0);
    assert_eq!(
        cache.get_latest(GLOBAL_EXCHANGE, "ETHUSDT").await.unwrap(),
        2000.0
    );
}

/// A live connector streams line-delimited frames from a local TCP server
/// and reports a connection error when the remote closes.
#[tokio::test]
async fn live_exchanger_streams_lines_until_remote_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        let (mut socket, _) = listener.accept().await.unwrap();
        for line in [tick("BTCUSDT", 30000.0), tick("ETHUSDT", 2000.0)] {
            socket.write_all(line.as_bytes()).await.unwrap();
            socket.write_all(b"\n").await.unwrap();
        }
        // Remote closes after two frames.
    });

    let root = CancellationToken::new();
    let exchanger = LiveExchanger::new("e1", "127.0.0.1", port, &root).unwrap();
    let (out_tx, mut out_rx) = mpsc::channel(16);
    let (res_tx, mut res_rx) = mpsc::channel(1);

    let stream = tokio::spawn(async move { exchanger.stream(out_tx, res_tx).await });

    let first = out_rx.recv().await.unwrap();
    assert_eq!(first.from, "e1");
    assert_eq!(Trade::parse(&first.data).unwrap().symbol, "BTCUSDT");
    let second = out_rx.recv().await.unwrap();
    assert_eq!(Trade::parse(&second.data).unwrap().symbol, "ETHUSDT");

    server.await.unwrap();
    stream.await.unwrap();

    let result = res_rx.recv().await.unwrap();
    assert_eq!(result.received_tasks, 2);
    assert!(matches!(result.err, Some(Error::Connection(_))));
}

/// Stopping the pool twice is safe: the second call returns promptly and
/// the channels stay closed.
#[tokio::test]
async fn stop_pool_is_idempotent() {
    let pool = ExchangerPool::new(4, CancellationToken::new());
    let mut out = pool.take_out().unwrap();
    let mut results = pool.take_results().unwrap();
    pool.add_synthetic("e1").unwrap();
    pool.add_synthetic("e2").unwrap();

    pool.stop_pool().await;
    tokio::time::timeout(Duration::from_secs(1), pool.stop_pool())
        .await
        .expect("second stop must return promptly");

    while out.try_recv().is_ok() {}
    assert!(out.recv().await.is_none());

    let mut finished = Vec::new();
    while let Some(result) = results.recv().await {
        assert!(result.err.is_none());
        finished.push(result.name);
    }
    finished.sort();
    assert_eq!(finished, vec!["e1", "e2"]);
}

/// During a producer swap under shared names, membership never shows a
/// partial mix: after the swap the same three names are running.
#[tokio::test]
async fn producer_swap_keeps_membership_consistent() {
    let pool = ExchangerPool::new(4, CancellationToken::new());
    let _out = pool.take_out().unwrap();
    let mut results = pool.take_results().unwrap();
    tokio::spawn(async move { while results.recv().await.is_some() {} });
    let names = ["exchange1", "exchange2", "exchange3"];
    for name in names {
        pool.add_synthetic(name).unwrap();
    }
    assert_eq!(pool.connected_exchangers(), names);

    // Swap every member for a successor under the same name.
    for name in names {
        pool.remove(name);
        pool.add_synthetic(name).unwrap();
    }
    assert_eq!(pool.connected_exchangers(), names);

    // Old members' exit cleanup must not evict the successors.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.connected_exchangers(), names);

    pool.stop_pool().await;
}

/// Synthetic producers feed the cache end to end: pool → fan-out → worker
/// pool → TradeHandler → MemoryCache.
#[tokio::test]
async fn synthetic_round_trip_reaches_the_cache() {
    let cache = Arc::new(MemoryCache::new());
    let handler: Arc<dyn TaskHandler> =
        Arc::new(TradeHandler::new(Arc::clone(&cache) as Arc<dyn TickCache>));

    let root = CancellationToken::new();
    let pool = ExchangerPool::new(4, root.child_token());
    let src_rx = pool.take_out().unwrap();

    let (pool_tx, mut pool_rx) = mpsc::channel::<Task>(64);
    let fanout = tokio::spawn(fan_out(root.child_token(), src_rx, vec![pool_tx]));

    let (result_tx, mut result_rx) = mpsc::channel(64);
    let driver = tokio::spawn(async move {
        let mut workers = WorkerPool::new("pool-1", 10, handler);
        workers.create();
        while let Some(task) = pool_rx.recv().await {
            workers.work(task, &result_tx).await;
        }
        workers.wait().await;
    });

    pool.add_synthetic("e1").unwrap();

    // Let a few 100 ms ticks flow through.
    tokio::time::sleep(Duration::from_millis(500)).await;
    pool.stop_pool().await;
    fanout.await.unwrap();
    driver.await.unwrap();

    let mut processed = 0;
    while let Some(result) = result_rx.recv().await {
        assert!(result.is_ok());
        processed += 1;
    }
    assert!(processed > 0, "expected synthetic ticks to be processed");

    let (exchanges, symbols) = cache.get_collection().await.unwrap();
    assert_eq!(exchanges, vec!["e1".to_string()]);
    assert!(!symbols.is_empty());
    let latest = cache.get_latest("e1", &symbols[0]).await.unwrap();
    assert!(latest > 0.0);
}
