//! # fh-runner
//!
//! Main entry point for the firehose market data server.
//!
//! Loads a JSON configuration file, builds the firehose described by its
//! `feed` block, connects the distribution server, subscribes the configured
//! identifiers and logs every dispatched update until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! fh-runner config.json --log-level info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fh_core::Value;
use fh_core::logging::{LogOptions, init_logging};
use fh_md::{FireHoseLiveDataServer, LiveDataReceiver, SubscriptionListener};
use tracing::{error, info};

/// Firehose market data server.
#[derive(Parser)]
#[command(name = "fh-runner", about = "Firehose market data ingestion and distribution")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output. Overrides `module.log_path`.
    #[arg(long)]
    log_dir: Option<String>,
}

/// Logs each dispatched update and every subscription change.
struct LogReceiver;

impl LiveDataReceiver for LogReceiver {
    fn live_data_received(&self, id: &str, value: &Value) {
        info!("{id} {value}");
    }
}

impl SubscriptionListener for LogReceiver {
    fn subscribed(&self, id: &str) {
        info!("subscribed {id}");
    }

    fn unsubscribed(&self, id: &str) {
        info!("unsubscribed {id}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration (logging options live in it)
    let config = fh_core::config::load_config(&cli.config)?;
    let module_name = config.module_name();
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());

    // 2. Initialize logging
    init_logging(&LogOptions {
        level: &cli.log_level,
        dir: log_dir.as_deref(),
        module_name: &module_name,
        json: config.log_json(),
    });
    info!("fh-runner starting, config={}, log_level={}", cli.config.display(), cli.log_level);

    // 3. Build firehose and server
    let firehose = fh_md::registry::create_firehose(&module_name, &config.feed, tokio::runtime::Handle::current())?;
    let receiver = Arc::new(LogReceiver);
    let server = Arc::new(FireHoseLiveDataServer::new(&module_name, firehose, receiver.clone(), &config.server));
    server.set_subscription_listener(Some(receiver));

    // connect/subscribe/disconnect block on locks and thread joins
    let subscriptions = config.subscriptions.clone();
    let srv = server.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        srv.connect()?;
        let handles = srv.subscribe(&subscriptions)?;
        info!("subscribed to {} identifier(s)", handles.len());
        Ok(())
    })
    .await??;

    info!("server '{module_name}' connected, press Ctrl+C to stop");

    // 4. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 5. Disconnect
    let srv = server.clone();
    match tokio::task::spawn_blocking(move || srv.disconnect()).await? {
        Ok(()) => {}
        Err(e) => error!("error disconnecting: {e}"),
    }
    info!(
        "received {} update(s), dispatched {}, goodbye",
        server.updates_received(),
        server.updates_dispatched()
    );
    Ok(())
}
