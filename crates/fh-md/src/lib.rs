//! # fh-md
//!
//! Market data ingestion and distribution.
//!
//! ## Architecture
//!
//! ```text
//! Transport ──► ConnectorJob ──► RecordStream ──► FeedHandler ──► FireHoseCache
//!                                                                      │
//!                        LiveDataReceiver ◄── dispatch thread ◄── FireHoseLiveDataServer
//! ```
//!
//! - [`connector`] — connector jobs and the network / file replay transports
//! - [`firehose`] — latest-value firehose and the connector-driven implementation
//! - [`server`] — coalescing subscribe / snapshot server over a firehose
//! - [`json_feed`] — JSON-lines feed handler
//! - [`json_util`] — JSON parsing helpers
//! - [`registry`] — builds a firehose from config

pub mod connector;
pub mod firehose;
pub mod json_feed;
pub mod json_util;
pub mod registry;
pub mod server;

pub use firehose::FireHoseLiveData;
pub use server::{FireHoseLiveDataServer, LiveDataReceiver, SubscriptionListener};
