//! # fh-core
//!
//! Core crate for the firehose market data system, providing:
//!
//! - **Types** (`types`) — market values, scalars, connection states
//! - **Configuration** (`config`) — JSON config deserialization
//! - **Error types** (`error`) — domain-specific `FeedError` via thiserror
//! - **Record streams** (`record`) — byte-stream tokenizers (line, length-prefixed)
//! - **CPU affinity** (`cpu_affinity`) — thread-to-core pinning for the dispatch thread
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod cpu_affinity;
pub mod error;
pub mod logging;
pub mod record;
pub mod types;

// Re-export types at crate root for convenience.
pub use error::FeedError;
pub use types::*;
