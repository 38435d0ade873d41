//! Merge stage re-circulating per-exchange results as global tasks.

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::domain::{Task, TaskResult, Trade, GLOBAL_EXCHANGE};
use crate::error::Result;

/// Merges `sources` into `out`, one forwarder task per source.
///
/// Each successfully parsed result is re-wrapped as a task from the
/// `global` pseudo-exchange so the merge pool caches one cross-exchange
/// stream alongside the per-exchange streams. Errored results are logged
/// and dropped. `out` closes when every source has closed.
pub async fn fan_in(
    token: CancellationToken,
    sources: Vec<mpsc::Receiver<TaskResult>>,
    out: mpsc::Sender<Task>,
) {
    let mut forwarders = JoinSet::new();
    for mut source in sources {
        let out = out.clone();
        let token = token.clone();
        forwarders.spawn(async move {
            loop {
                let result = tokio::select! {
                    _ = token.cancelled() => return,
                    result = source.recv() => match result {
                        Some(result) => result,
                        None => return,
                    },
                };

                if let Some(err) = &result.err {
                    error!(from = %result.from, error = %err, "fan-in: dropping errored result");
                    continue;
                }

                let task = match global_task(&result) {
                    Ok(task) => task,
                    Err(err) => {
                        error!(from = %result.from, error = %err, "fan-in: failed to re-wrap result");
                        continue;
                    }
                };

                tokio::select! {
                    _ = token.cancelled() => return,
                    sent = out.send(task) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }
    drop(out);

    while forwarders.join_next().await.is_some() {}
    info!("fan-in: all result streams closed, output closed");
}

fn global_task(result: &TaskResult) -> Result<Task> {
    let trade = Trade {
        symbol: result.symbol.clone(),
        price: result.price,
        timestamp: result.timestamp,
    };
    Ok(Task::new(GLOBAL_EXCHANGE, serde_json::to_string(&trade)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn ok_result(from: &str, symbol: &str, price: f64) -> TaskResult {
        TaskResult {
            from: from.to_string(),
            symbol: symbol.to_string(),
            price,
            timestamp: 1_700_000_000,
            err: None,
        }
    }

    #[tokio::test]
    async fn rewraps_ok_results_as_global_tasks() {
        let (a_tx, a_rx) = mpsc::channel(4);
        let (b_tx, b_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let handle = tokio::spawn(fan_in(
            CancellationToken::new(),
            vec![a_rx, b_rx],
            out_tx,
        ));

        a_tx.send(ok_result("e1", "BTCUSDT", 30000.0)).await.unwrap();
        b_tx.send(ok_result("e2", "ETHUSDT", 2000.0)).await.unwrap();
        drop(a_tx);
        drop(b_tx);
        handle.await.unwrap();

        let mut symbols = Vec::new();
        while let Some(task) = out_rx.recv().await {
            assert_eq!(task.from, GLOBAL_EXCHANGE);
            symbols.push(Trade::parse(&task.data).unwrap().symbol);
        }
        symbols.sort();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[tokio::test]
    async fn errored_results_are_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let handle = tokio::spawn(fan_in(CancellationToken::new(), vec![rx], out_tx));

        tx.send(TaskResult {
            from: "e1".to_string(),
            symbol: String::new(),
            price: 0.0,
            timestamp: 0,
            err: Some(Error::Parse("bad tick".to_string())),
        })
        .await
        .unwrap();
        tx.send(ok_result("e1", "SOLUSDT", 100.0)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let task = out_rx.recv().await.unwrap();
        assert_eq!(Trade::parse(&task.data).unwrap().symbol, "SOLUSDT");
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn output_closes_when_all_sources_close() {
        let (tx, rx) = mpsc::channel::<TaskResult>(1);
        let (out_tx, mut out_rx) = mpsc::channel(1);

        let handle = tokio::spawn(fan_in(CancellationToken::new(), vec![rx], out_tx));
        drop(tx);
        handle.await.unwrap();

        assert!(out_rx.recv().await.is_none());
    }
}
