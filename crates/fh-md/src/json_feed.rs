//! JSON-lines feed handler.
//!
//! Interprets each record as one JSON object:
//!
//! - `{"id":"test1","fields":{"LAST":52.07,"BID":"52.05"}}` publishes a value
//!   for `test1`, replacing the previous one in full.
//! - `{"complete":true}` marks the market data as complete; `false` clears it.
//!
//! Anything else (malformed JSON, a missing id, acks) is dropped.

use fh_core::MarketValue;
use tracing::{debug, info};

use crate::firehose::FireHoseCache;
use crate::firehose::streamed::FeedHandler;
use crate::json_util::parse_fields;

/// One interpreted record.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Value { id: String, value: MarketValue },
    Complete(bool),
}

/// Parse a JSON-lines record. Returns `None` for records that carry no data.
pub fn parse_record(text: &str) -> Option<FeedMessage> {
    let v: serde_json::Value = serde_json::from_str(text).ok()?;

    if let Some(complete) = v.get("complete").and_then(serde_json::Value::as_bool) {
        return Some(FeedMessage::Complete(complete));
    }

    let id = v.get("id")?.as_str()?;
    if id.is_empty() {
        return None;
    }
    let fields = v.get("fields")?.as_object()?;
    Some(FeedMessage::Value { id: id.to_string(), value: parse_fields(fields) })
}

/// Feed handler for JSON-lines captures and sockets.
///
/// Works with both line framing (`String` records) and length-prefixed
/// framing (`Vec<u8>` records holding UTF-8 JSON).
pub struct JsonFeed {
    label: String,
}

impl JsonFeed {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }

    fn apply(&self, text: &str, cache: &FireHoseCache) {
        match parse_record(text) {
            Some(FeedMessage::Value { id, value }) => cache.store_value(&id, value.into_value()),
            Some(FeedMessage::Complete(complete)) => {
                info!("[{}] market data complete: {complete}", self.label);
                cache.set_market_data_complete(complete);
            }
            None => debug!("[{}] dropped record: {text}", self.label),
        }
    }
}

impl FeedHandler<String> for JsonFeed {
    fn record_received(&self, record: String, cache: &FireHoseCache) {
        self.apply(&record, cache);
    }

    fn connected(&self, _cache: &FireHoseCache) {
        info!("[{}] feed connected", self.label);
    }

    fn disconnected(&self, _cache: &FireHoseCache) {
        info!("[{}] feed disconnected", self.label);
    }
}

impl FeedHandler<Vec<u8>> for JsonFeed {
    fn record_received(&self, record: Vec<u8>, cache: &FireHoseCache) {
        match std::str::from_utf8(&record) {
            Ok(text) => self.apply(text, cache),
            Err(e) => debug!("[{}] dropped non-UTF-8 record of {} bytes: {e}", self.label, record.len()),
        }
    }

    fn connected(&self, _cache: &FireHoseCache) {
        info!("[{}] feed connected", self.label);
    }

    fn disconnected(&self, _cache: &FireHoseCache) {
        info!("[{}] feed disconnected", self.label);
    }
}

#[cfg(test)]
mod tests {
    use fh_core::Scalar;

    use super::*;

    #[test]
    fn parse_value_record() {
        let msg = parse_record(r#"{"id":"test1","fields":{"LAST":52.07,"BID":"52.05","VENUE":"XLON"}}"#).unwrap();
        match msg {
            FeedMessage::Value { id, value } => {
                assert_eq!(id, "test1");
                assert_eq!(value.number("LAST"), Some(52.07));
                assert_eq!(value.number("BID"), Some(52.05));
                assert_eq!(value.field("VENUE"), Some(&Scalar::Text("XLON".into())));
            }
            other => panic!("expected value, got {other:?}"),
        }
    }

    #[test]
    fn parse_complete_markers() {
        assert_eq!(parse_record(r#"{"complete":true}"#), Some(FeedMessage::Complete(true)));
        assert_eq!(parse_record(r#"{"complete":false}"#), Some(FeedMessage::Complete(false)));
    }

    #[test]
    fn non_data_records_are_dropped() {
        assert!(parse_record("not json").is_none());
        assert!(parse_record(r#"{"fields":{"LAST":1}}"#).is_none());
        assert!(parse_record(r#"{"id":"","fields":{"LAST":1}}"#).is_none());
        assert!(parse_record(r#"{"id":"test1"}"#).is_none());
        assert!(parse_record(r#"{"op":"ack"}"#).is_none());
    }

    #[test]
    fn handler_publishes_into_the_cache() {
        let cache = FireHoseCache::new();
        let feed = JsonFeed::new("test");
        FeedHandler::<String>::record_received(&feed, r#"{"id":"a","fields":{"LAST":1.5}}"#.into(), &cache);
        FeedHandler::<Vec<u8>>::record_received(&feed, br#"{"complete":true}"#.to_vec(), &cache);
        FeedHandler::<Vec<u8>>::record_received(&feed, vec![0xff, 0xfe], &cache);

        assert_eq!(cache.latest_value("a").and_then(|v| v.number("LAST")), Some(1.5));
        assert!(cache.is_market_data_complete());
        assert_eq!(cache.updates_received(), 1);
    }
}
