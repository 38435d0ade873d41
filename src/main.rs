use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use marketflow::app::{App, Config};

#[derive(Parser)]
#[command(name = "marketflow", about = "Real-time market data pipeline")]
struct Cli {
    /// Port for the HTTP query API.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.port == 0 || cli.port >= 65000 {
        eprintln!("invalid port: {}", cli.port);
        std::process::exit(1);
    }

    let _ = dotenvy::dotenv();
    init_logging(cli.debug);

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    info!("marketflow starting");

    let token = CancellationToken::new();
    let app = match App::bootstrap(config, token.clone()).await {
        Ok(app) => app,
        Err(err) => {
            error!(error = %err, "startup failed");
            std::process::exit(1);
        }
    };

    let mut run = tokio::spawn(app.run(cli.port));

    tokio::select! {
        result = &mut run => {
            finish(result);
            return;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            token.cancel();
        }
    }

    finish(run.await);
}

fn finish(result: Result<marketflow::error::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("marketflow stopped"),
        Ok(Err(err)) => {
            error!(error = %err, "application error");
            std::process::exit(1);
        }
        Err(err) => {
            error!(error = %err, "application task failed");
            std::process::exit(1);
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
