//! gcsproxy -- serve object storage buckets over plain HTTP.
//!
//! The process is stateless: SIGTERM/SIGINT only stop accepting connections
//! and wait for in-flight requests, bounded by `server.shutdown_timeout`.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gcsproxy::config::{self, Config};

/// Command-line arguments for the gcsproxy server.
#[derive(Parser, Debug)]
#[command(
    name = "gcsproxy",
    version,
    about = "HTTP reverse proxy for object storage buckets"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "gcsproxy.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,

    /// Override the bucket served by the proxy endpoint.
    #[arg(long)]
    bucket: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::read_config(&cli.config)?;
    if let Some(bucket) = cli.bucket {
        config.bucket_name = bucket;
    }
    config.validate()?;

    init_tracing(&config);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        gcsproxy::metrics::init_metrics()?;
        info!(
            "Prometheus metrics initialized at {}",
            config.observability.metrics_path
        );
    }

    let storage = gcsproxy::storage::from_config(&config.storage)?;

    if config.proxy.bucket_on_path {
        info!(
            "Proxy endpoint {} takes the bucket from the path",
            config::normalize_endpoint(&config.proxy.endpoint)
        );
    } else {
        info!(
            "Proxy endpoint {} serves bucket {}",
            config::normalize_endpoint(&config.proxy.endpoint),
            config.bucket_name
        );
    }
    if !config.map.endpoint.is_empty() {
        info!(
            "Path mapping endpoint {}",
            config::normalize_endpoint(&config.map.endpoint)
        );
    }

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(gcsproxy::AppState { config, storage });
    let app = gcsproxy::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("gcsproxy listening on {}", bind_addr);

    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        })
        .into_future();

    // Once a signal arrives, in-flight requests get shutdown_timeout to
    // finish before the process exits anyway.
    let drain_deadline = async move {
        if signalled_rx.await.is_ok() {
            tokio::time::sleep(shutdown_timeout).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => warn!("Shutdown timeout of {:?} reached, exiting", shutdown_timeout),
    }

    info!("gcsproxy shut down");

    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` takes precedence over
/// `logging.level`.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
