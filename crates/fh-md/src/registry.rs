//! Firehose registry: builds a firehose from the `feed` config block.

use std::sync::Arc;

use anyhow::{Result, bail};
use fh_core::config::{FeedConfig, FramingConfig};
use fh_core::record::{LengthPrefixedRecordStreamFactory, LineRecordStreamFactory};
use tokio::runtime::Handle;
use tracing::info;

use crate::connector::{ConnectorJobFactory, Pipeline, stream_factory, transport_factory};
use crate::firehose::FireHoseLiveData;
use crate::firehose::streamed::StreamedFireHoseLiveData;
use crate::json_feed::JsonFeed;

/// Create a JSON-lines firehose for `feed`, running its connector on `runtime`.
///
/// Line framing yields `String` records; length-prefixed framing yields raw
/// byte records. Both are interpreted by [`JsonFeed`].
pub fn create_firehose(label: &str, feed: &FeedConfig, runtime: Handle) -> Result<Arc<dyn FireHoseLiveData>> {
    let max_record_len = feed.framing.effective_max_record_len();
    if max_record_len == 0 {
        bail!("[{label}] max_record_len must be positive");
    }
    let transports = transport_factory(&feed.transport);
    let pipeline = feed.is_pipelined().then(Pipeline::default);
    let handler = Arc::new(JsonFeed::new(label));

    info!(
        "[{label}] firehose: transport={:?} framing={:?} pipelined={}",
        feed.transport,
        feed.framing,
        pipeline.is_some()
    );

    let firehose: Arc<dyn FireHoseLiveData> = match feed.framing {
        FramingConfig::Line { .. } => {
            let streams = stream_factory(LineRecordStreamFactory { max_record_len });
            let jobs = ConnectorJobFactory::new(label, transports, streams);
            Arc::new(StreamedFireHoseLiveData::<String>::new(jobs, handler, pipeline, runtime))
        }
        FramingConfig::LengthPrefixed { .. } => {
            let jobs = ConnectorJobFactory::new(
                label,
                transports,
                stream_factory(LengthPrefixedRecordStreamFactory { max_record_len }),
            );
            Arc::new(StreamedFireHoseLiveData::<Vec<u8>>::new(jobs, handler, pipeline, runtime))
        }
    };
    Ok(firehose)
}
