//! Typed error definitions for the firehose ingestion and distribution layer.
//!
//! [`FeedError`] covers the four failure families of the system: transport
//! failures, lifecycle misuse, snapshot timeouts, and configuration problems.
//! All variants implement `std::error::Error` via `thiserror`, so they
//! integrate with `anyhow::Result` at the binary boundary.

use std::time::Duration;

use thiserror::Error;

/// Domain-specific errors for the firehose system.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Socket or file I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport did not connect within its connect timeout.
    #[error("connect to {target} timed out after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },

    /// No bytes arrived within the transport's heartbeat window.
    #[error("no data from {target} for {timeout:?}")]
    ReadTimeout { target: String, timeout: Duration },

    /// The record stream could not tokenize the incoming bytes.
    #[error("decode error: {0}")]
    Decode(String),

    /// The record pipeline thread exited while the reader was still feeding it.
    #[error("record pipeline worker exited")]
    PipelineClosed,

    /// `start()` called on a firehose that is already running.
    #[error("firehose already started")]
    AlreadyStarted,

    /// `stop()` called on a firehose that is not running.
    #[error("firehose not started")]
    NotStarted,

    /// `connect()` called on a server that is already connected.
    #[error("server already connected")]
    AlreadyConnected,

    /// An operation that needs a live connection was called while disconnected.
    #[error("connection to market data feed is down")]
    NotConnected,

    /// One or more identifiers never received a value within the wait timeout.
    #[error("market data unavailable for {}", missing.join(", "))]
    SnapshotUnavailable { missing: Vec<String> },
}

impl FeedError {
    /// Whether this error came from the transport (and so ends the connection).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FeedError::Io(_) | FeedError::ConnectTimeout { .. } | FeedError::ReadTimeout { .. } | FeedError::Decode(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_unavailable_names_every_identifier() {
        let err = FeedError::SnapshotUnavailable { missing: vec!["A".into(), "C".into()] };
        assert_eq!(err.to_string(), "market data unavailable for A, C");
    }

    #[test]
    fn transport_classification() {
        assert!(FeedError::Decode("bad frame".into()).is_transport());
        assert!(FeedError::Io(std::io::Error::other("reset")).is_transport());
        assert!(!FeedError::AlreadyStarted.is_transport());
        assert!(!FeedError::PipelineClosed.is_transport());
        assert!(!FeedError::SnapshotUnavailable { missing: vec![] }.is_transport());
    }
}
