//! Configuration parsing for the firehose system.
//!
//! The runner reads its settings from a single JSON file. The top-level
//! structure carries logging metadata, the feed description (transport and
//! framing), the distribution server settings, and the identifiers to
//! subscribe to at startup.
//!
//! # Example config
//!
//! ```json
//! {
//!   "module": { "module_name": "firehose", "log_path": "/tmp/log" },
//!   "feed": {
//!     "transport": { "type": "network", "host": "10.0.0.5", "port": 9000 },
//!     "framing": { "type": "line" }
//!   },
//!   "server": { "market_data_timeout_ms": 30000 },
//!   "subscriptions": ["test1", "test2"]
//! }
//! ```
//!
//! Optional fields fall back to the defaults exposed by the `effective_*`
//! accessors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::error::FeedError;
use crate::record::DEFAULT_MAX_RECORD_LEN;

/// Connect timeout used when the config does not set one.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read (heartbeat) timeout used when the config does not set one.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(150);

/// How long a snapshot waits for missing identifiers by default.
pub const DEFAULT_MARKET_DATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    pub module: Option<ModuleMeta>,

    /// Where the market data comes from and how it is framed.
    pub feed: FeedConfig,

    /// Distribution server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Identifiers subscribed to at startup.
    #[serde(default)]
    pub subscriptions: Vec<String>,
}

impl AppConfig {
    /// Returns the module name, defaulting to `"firehose"`.
    pub fn module_name(&self) -> String {
        self.module.as_ref().and_then(|m| m.module_name.clone()).unwrap_or_else(|| "firehose".to_string())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.module.as_ref().and_then(|m| m.log_path.clone())
    }

    pub fn log_json(&self) -> bool {
        self.module.as_ref().and_then(|m| m.log_json).unwrap_or(false)
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), FeedError> {
        self.feed.transport.validate()?;
        if self.feed.framing.effective_max_record_len() == 0 {
            return Err(FeedError::Config("max_record_len must be positive".into()));
        }
        Ok(())
    }
}

/// Module metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    pub log_json: Option<bool>,
}

/// Feed description: one transport plus one framing.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub transport: TransportConfig,

    #[serde(default)]
    pub framing: FramingConfig,

    /// Hand decoded records to a dedicated worker thread instead of
    /// interpreting them on the connector task.
    pub pipelined: Option<bool>,
}

impl FeedConfig {
    pub fn is_pipelined(&self) -> bool {
        self.pipelined.unwrap_or(false)
    }
}

/// Transport selection, tagged by `"type"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// TCP client.
    Network {
        host: String,
        port: u16,
        connect_timeout_sec: Option<u64>,
        heartbeat_timeout_sec: Option<u64>,
    },
    /// Replay of a capture file, optionally paced to a byte rate.
    File { path: PathBuf, bytes_per_sec: Option<u64> },
}

impl TransportConfig {
    /// Effective connect timeout (network only).
    pub fn connect_timeout(&self) -> Duration {
        match self {
            TransportConfig::Network { connect_timeout_sec: Some(s), .. } => Duration::from_secs(*s),
            _ => DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Effective heartbeat timeout (network only).
    pub fn heartbeat_timeout(&self) -> Duration {
        match self {
            TransportConfig::Network { heartbeat_timeout_sec: Some(s), .. } => Duration::from_secs(*s),
            _ => DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }

    fn validate(&self) -> Result<(), FeedError> {
        match self {
            TransportConfig::Network { host, port, .. } => {
                if host.trim().is_empty() {
                    return Err(FeedError::Config("network transport needs a host".into()));
                }
                if *port == 0 {
                    return Err(FeedError::Config("network transport needs a non-zero port".into()));
                }
            }
            TransportConfig::File { path, .. } => {
                if path.as_os_str().is_empty() {
                    return Err(FeedError::Config("file transport needs a path".into()));
                }
            }
        }
        Ok(())
    }
}

/// Record framing, tagged by `"type"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FramingConfig {
    Line { max_record_len: Option<usize> },
    LengthPrefixed { max_record_len: Option<usize> },
}

impl Default for FramingConfig {
    fn default() -> Self {
        FramingConfig::Line { max_record_len: None }
    }
}

impl FramingConfig {
    pub fn effective_max_record_len(&self) -> usize {
        match self {
            FramingConfig::Line { max_record_len } | FramingConfig::LengthPrefixed { max_record_len } => {
                max_record_len.unwrap_or(DEFAULT_MAX_RECORD_LEN)
            }
        }
    }
}

/// Distribution server settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    /// Snapshot wait bound in milliseconds (default: 30000).
    pub market_data_timeout_ms: Option<u64>,

    /// CPU core for the dispatch thread. Negative or absent disables pinning.
    pub dispatch_cpu_core: Option<i32>,
}

impl ServerConfig {
    pub fn market_data_timeout(&self) -> Duration {
        self.market_data_timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_MARKET_DATA_TIMEOUT)
    }
}

/// Load, parse and validate a JSON config file.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: AppConfig = serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn network_config_with_defaults() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{
                "feed": { "transport": { "type": "network", "host": "127.0.0.1", "port": 9000 } },
                "subscriptions": ["test1"]
            }"#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.module_name(), "firehose");
        assert_eq!(cfg.feed.transport.connect_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.feed.transport.heartbeat_timeout(), Duration::from_secs(150));
        assert_eq!(cfg.feed.framing.effective_max_record_len(), DEFAULT_MAX_RECORD_LEN);
        assert!(!cfg.feed.is_pipelined());
        assert_eq!(cfg.server.market_data_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.subscriptions, vec!["test1"]);
    }

    #[test]
    fn file_config_with_overrides() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{
                "module": { "module_name": "replay", "log_path": "/tmp/log", "log_json": true },
                "feed": {
                    "transport": { "type": "file", "path": "capture.jsonl", "bytes_per_sec": 4096 },
                    "framing": { "type": "length_prefixed", "max_record_len": 1024 },
                    "pipelined": true
                },
                "server": { "market_data_timeout_ms": 250, "dispatch_cpu_core": 2 }
            }"#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.module_name(), "replay");
        assert!(cfg.log_json());
        assert!(matches!(cfg.feed.transport, TransportConfig::File { bytes_per_sec: Some(4096), .. }));
        assert_eq!(cfg.feed.framing.effective_max_record_len(), 1024);
        assert!(cfg.feed.is_pipelined());
        assert_eq!(cfg.server.market_data_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.server.dispatch_cpu_core, Some(2));
    }

    #[test]
    fn invalid_network_config_rejected() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{ "feed": { "transport": { "type": "network", "host": " ", "port": 9000 } } }"#)
                .unwrap();
        assert!(matches!(cfg.validate(), Err(FeedError::Config(_))));

        let cfg: AppConfig =
            serde_json::from_str(r#"{ "feed": { "transport": { "type": "network", "host": "h", "port": 0 } } }"#)
                .unwrap();
        assert!(matches!(cfg.validate(), Err(FeedError::Config(_))));
    }

    #[test]
    fn load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "feed": {{ "transport": {{ "type": "file", "path": "x.jsonl" }} }} }}"#).unwrap();
        let cfg = load_config(file.path()).unwrap();
        assert!(matches!(cfg.feed.transport, TransportConfig::File { bytes_per_sec: None, .. }));
    }

    #[test]
    fn load_config_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
