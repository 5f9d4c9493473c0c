//! Resilient multi-provider video transcription pipeline.
//!
//! Turns a short-video share link (or free text containing one) into a
//! structured Chinese video script by chaining flaky third-party
//! providers behind circuit breakers and fallback chains.
//!
//! # Architecture Overview
//!
//! ```text
//!  Client request
//!      │
//!      ▼
//!  ┌──────────┐    ┌─────────────┐    ┌───────────────────────────────┐
//!  │   http   │───▶│  admission  │───▶│        pipeline stages        │
//!  │  server  │    │ (semaphore) │    │ resolve → transcribe → script │
//!  └──────────┘    └─────────────┘    └───────────────┬───────────────┘
//!                                                     │ per stage
//!                                                     ▼
//!                                     ┌───────────────────────────────┐
//!                                     │        fallback chain         │
//!                                     │  adapter → ResilientClient    │
//!                                     │  (breaker, retries, timeout)  │
//!                                     └───────────────────────────────┘
//!
//!  Cross-cutting: config reload, provider callbacks, observability,
//!  security validation
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipscribe::config::loader::load_config;
use clipscribe::config::watcher::ConfigWatcher;
use clipscribe::{HttpServer, PipelineConfig, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "clipscribe", about = "Video link to structured script pipeline")]
struct Args {
    /// Path to a TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipscribe=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "clipscribe starting");

    let config = match args.config.as_deref() {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };

    tracing::info!(
        bind_address = %config.server.bind_address,
        max_concurrency = config.concurrency.max_concurrency,
        resolve_chain = ?config.chains.resolve,
        transcribe_chain = ?config.chains.transcribe,
        script_chain = ?config.chains.script,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, "Listening for connections");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            clipscribe::observability::metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    // The watcher handle must outlive the server or reloads stop.
    let (config_updates, _watcher) = match args.config.as_deref() {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            (updates, Some(handle))
        }
        None => {
            let (_tx, updates) = mpsc::unbounded_channel();
            (updates, None)
        }
    };

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config);
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
