//! TCP connector reading line-delimited tick frames.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Exchanger, ExchangerResult};
use crate::core::domain::Task;
use crate::error::{Error, Result};

/// Connector for one live exchange endpoint.
///
/// Owns its TCP connection and cancellation token. The dial, every line
/// read and every downstream send honor cancellation.
#[derive(Debug)]
pub struct LiveExchanger {
    name: String,
    host: String,
    port: u16,
    token: CancellationToken,
    received: AtomicU64,
}

impl LiveExchanger {
    /// Rejects empty hosts and zero ports at construction.
    pub fn new(name: &str, host: &str, port: u16, parent: &CancellationToken) -> Result<Self> {
        if host.is_empty() {
            return Err(Error::Validation(format!(
                "exchanger {name}: host must not be empty"
            )));
        }
        if port == 0 {
            return Err(Error::Validation(format!(
                "exchanger {name}: port must not be zero"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
            token: parent.child_token(),
            received: AtomicU64::new(0),
        })
    }

    async fn run(&self, out: &mpsc::Sender<Task>) -> Result<()> {
        let stream = tokio::select! {
            _ = self.token.cancelled() => return Err(Error::Canceled),
            conn = TcpStream::connect((self.host.as_str(), self.port)) => conn?,
        };
        info!(exchange = %self.name, host = %self.host, port = self.port, "connected");

        let mut lines = BufReader::new(stream).lines();
        loop {
            let line = tokio::select! {
                _ = self.token.cancelled() => return Err(Error::Canceled),
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                return Err(Error::Connection(format!(
                    "connection to exchanger {} closed",
                    self.name
                )));
            };

            tokio::select! {
                _ = self.token.cancelled() => return Err(Error::Canceled),
                sent = out.send(Task::new(&self.name, line)) => {
                    if sent.is_err() {
                        // Pipeline gone; nothing left to feed.
                        return Err(Error::Canceled);
                    }
                    self.received.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

#[async_trait]
impl Exchanger for LiveExchanger {
    async fn stream(&self, out: mpsc::Sender<Task>, results: mpsc::Sender<ExchangerResult>) {
        let err = match self.run(&out).await {
            Err(Error::Canceled) => None,
            Err(err) => Some(err),
            Ok(()) => None,
        };
        let _ = results
            .send(ExchangerResult {
                name: self.name.clone(),
                host: self.host.clone(),
                port: self.port,
                received_tasks: self.received.load(Ordering::Relaxed),
                err,
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
