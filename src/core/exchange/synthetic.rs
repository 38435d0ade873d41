//! Synthetic connector fabricating plausible ticks for test mode.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Exchanger, ExchangerResult};
use crate::core::domain::{Task, Trade, SYMBOLS};

/// Interval used when the caller passes zero.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Connector emitting random ticks over the fixed symbol set.
pub struct SyntheticExchanger {
    name: String,
    interval: Duration,
    token: CancellationToken,
}

impl SyntheticExchanger {
    pub fn new(name: &str, interval: Duration, parent: &CancellationToken) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        Self {
            name: name.to_string(),
            interval,
            token: parent.child_token(),
        }
    }
}

fn generate_trade(rng: &mut StdRng) -> Trade {
    let symbol = SYMBOLS[rng.gen_range(0..SYMBOLS.len())];
    let price = match symbol {
        "BTCUSDT" => 100_000.0 + rng.gen::<f64>() * 10_000.0,
        "ETHUSDT" => 2_000.0 + rng.gen::<f64>() * 100.0,
        "SOLUSDT" => 100.0 + rng.gen::<f64>() * 10.0,
        "DOGEUSDT" => 0.1 + rng.gen::<f64>() * 0.1,
        _ => 1.2 + rng.gen::<f64>(),
    };
    Trade {
        symbol: symbol.to_string(),
        price,
        timestamp: Utc::now().timestamp(),
    }
}

#[async_trait]
impl Exchanger for SyntheticExchanger {
    async fn stream(&self, out: mpsc::Sender<Task>, results: mpsc::Sender<ExchangerResult>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut rng = StdRng::from_entropy();

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {
                    let trade = generate_trade(&mut rng);
                    let Ok(data) = serde_json::to_string(&trade) else {
                        continue;
                    };
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        sent = out.send(Task::new(&self.name, data)) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        let _ = results
            .send(ExchangerResult {
                name: self.name.clone(),
                host: String::new(),
                port: 0,
                received_tasks: 0,
                err: None,
            })
            .await;
    }

    fn stop(&self) {
        self.token.cancel();
    }

    fn name(&self) -> &str {
        &self.name
    }
}
