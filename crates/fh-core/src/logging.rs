//! Logging initialization using the `tracing` ecosystem.
//!
//! Provides:
//! - Console output (colored, human-readable, with thread ids so the
//!   connector, pipeline and dispatch threads can be told apart)
//! - File output (daily rotation via `tracing-appender`)
//! - Optional JSON formatting for both sinks
//! - Configurable log level via env var `RUST_LOG` or explicit parameter

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging options, usually assembled from the `module` config block and CLI flags.
#[derive(Debug, Clone)]
pub struct LogOptions<'a> {
    /// Default level if `RUST_LOG` is not set (e.g. `"info"`).
    pub level: &'a str,
    /// Directory for daily-rotating log files. `None` logs to the console only.
    pub dir: Option<&'a str>,
    /// Log file prefix (e.g. `"firehose"`).
    pub module_name: &'a str,
    /// Emit structured JSON lines instead of human-readable text.
    pub json: bool,
}

/// Initialize the global tracing subscriber.
///
/// Should be called once at program start. Calling it a second time is a
/// no-op rather than a panic, which keeps it usable from tests.
pub fn init_logging(opts: &LogOptions<'_>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(opts.level));

    let console_layer = if opts.json {
        fmt::layer().json().with_target(true).with_thread_ids(true).boxed()
    } else {
        fmt::layer().with_target(true).with_thread_ids(true).with_thread_names(true).with_ansi(true).boxed()
    };

    let file_layer = opts.dir.map(|dir| {
        let file_appender = tracing_appender::rolling::daily(dir, opts.module_name);
        let layer = fmt::layer().with_writer(file_appender).with_ansi(false).with_target(true).with_thread_ids(true);
        if opts.json { layer.json().boxed() } else { layer.boxed() }
    });

    let _ = tracing_subscriber::registry().with(env_filter).with(console_layer).with(file_layer).try_init();
}
