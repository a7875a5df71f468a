//! The firehose: the latest value per identifier from an unfiltered feed.
//!
//! A [`FireHoseLiveData`] receives every update the feed produces, keeps the
//! most recent [`Value`] for each identifier, and reports whether the feed has
//! delivered a complete market snapshot. Consumers register one
//! [`ValueUpdateListener`] and one [`DataStateListener`]; both are invoked on
//! the thread that interpreted the record.

pub mod streamed;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ahash::AHashMap;
use fh_core::{FeedError, Value};
use parking_lot::RwLock;
use tracing::debug;

/// Notified with every new value, after it has been stored.
pub trait ValueUpdateListener: Send + Sync {
    fn value_updated(&self, id: &str, value: &Value);
}

/// Notified whenever the "market data complete" flag changes.
pub trait DataStateListener: Send + Sync {
    fn data_state_changed(&self);
}

/// A source of live market data for all identifiers at once.
pub trait FireHoseLiveData: Send + Sync {
    /// Begin receiving data. Fails with [`FeedError::AlreadyStarted`] if running.
    fn start(&self) -> Result<(), FeedError>;

    /// Stop receiving data. Fails with [`FeedError::NotStarted`] if not running.
    fn stop(&self) -> Result<(), FeedError>;

    fn is_started(&self) -> bool;

    /// The most recent value for `id`, if one has arrived.
    fn latest_value(&self, id: &str) -> Option<Value>;

    /// Whether the feed has reported that every identifier has been sent.
    fn is_market_data_complete(&self) -> bool;

    fn set_value_update_listener(&self, listener: Option<Arc<dyn ValueUpdateListener>>);

    fn set_data_state_listener(&self, listener: Option<Arc<dyn DataStateListener>>);

    /// Total values stored since creation.
    fn updates_received(&self) -> u64;
}

/// Shared state behind every firehose: values, completeness and listeners.
///
/// Listeners are called after the value map lock is released, so a listener
/// may read the cache back without deadlocking.
#[derive(Default)]
pub struct FireHoseCache {
    values: RwLock<AHashMap<String, Value>>,
    complete: AtomicBool,
    updates: AtomicU64,
    value_listener: RwLock<Option<Arc<dyn ValueUpdateListener>>>,
    state_listener: RwLock<Option<Arc<dyn DataStateListener>>>,
}

impl FireHoseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest value for `id` and notify the value listener.
    pub fn store_value(&self, id: &str, value: Value) {
        self.values.write().insert(id.to_string(), value.clone());
        self.updates.fetch_add(1, Ordering::Relaxed);

        let listener = self.value_listener.read().clone();
        if let Some(listener) = listener {
            listener.value_updated(id, &value);
        }
    }

    /// Set the complete flag, notifying the state listener only on change.
    pub fn set_market_data_complete(&self, complete: bool) {
        if self.complete.swap(complete, Ordering::AcqRel) == complete {
            return;
        }
        debug!("market data complete changed to {complete}");
        let listener = self.state_listener.read().clone();
        if let Some(listener) = listener {
            listener.data_state_changed();
        }
    }

    pub fn latest_value(&self, id: &str) -> Option<Value> {
        self.values.read().get(id).cloned()
    }

    pub fn is_market_data_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn set_value_update_listener(&self, listener: Option<Arc<dyn ValueUpdateListener>>) {
        *self.value_listener.write() = listener;
    }

    pub fn set_data_state_listener(&self, listener: Option<Arc<dyn DataStateListener>>) {
        *self.state_listener.write() = listener;
    }

    pub fn updates_received(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Number of identifiers with a value.
    pub(crate) fn len(&self) -> usize {
        self.values.read().len()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use std::collections::BTreeMap;

    use fh_core::{MarketValue, Scalar};
    use parking_lot::Mutex;

    use super::*;

    struct Seen(Mutex<Vec<(String, f64)>>);

    impl ValueUpdateListener for Seen {
        fn value_updated(&self, id: &str, value: &Value) {
            self.0.lock().push((id.to_string(), value.number("LAST").unwrap_or(f64::NAN)));
        }
    }

    struct Changes(AtomicUsize);

    impl DataStateListener for Changes {
        fn data_state_changed(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn new_value_replaces_old_in_full() {
        let cache = FireHoseCache::new();
        let mut both = BTreeMap::<String, Scalar>::new();
        both.insert("BID".to_string(), 1.0.into());
        both.insert("ASK".to_string(), 2.0.into());
        cache.store_value("a", MarketValue::new(both).into_value());
        cache.store_value("a", MarketValue::single("LAST", 3.0).into_value());

        let v = cache.latest_value("a").unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v.number("BID"), None);
        assert_eq!(cache.updates_received(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.latest_value("b").is_none());
    }

    #[test]
    fn value_listener_sees_every_update_in_order() {
        let cache = FireHoseCache::new();
        let seen = Arc::new(Seen(Mutex::new(Vec::new())));
        cache.store_value("early", MarketValue::single("LAST", 0.5).into_value());
        cache.set_value_update_listener(Some(seen.clone()));
        cache.store_value("a", MarketValue::single("LAST", 1.0).into_value());
        cache.store_value("a", MarketValue::single("LAST", 2.0).into_value());
        cache.set_value_update_listener(None);
        cache.store_value("a", MarketValue::single("LAST", 3.0).into_value());

        assert_eq!(*seen.0.lock(), vec![("a".to_string(), 1.0), ("a".to_string(), 2.0)]);
    }

    #[test]
    fn state_listener_fires_only_on_change() {
        let cache = FireHoseCache::new();
        let changes = Arc::new(Changes(AtomicUsize::new(0)));
        cache.set_data_state_listener(Some(changes.clone()));

        cache.set_market_data_complete(false);
        cache.set_market_data_complete(true);
        cache.set_market_data_complete(true);
        assert!(cache.is_market_data_complete());
        cache.set_market_data_complete(false);

        assert_eq!(changes.0.load(Ordering::SeqCst), 2);
        assert!(!cache.is_market_data_complete());
    }

    #[test]
    fn listener_can_read_the_cache_back() {
        struct ReadBack(Arc<FireHoseCache>, Mutex<Option<Value>>);
        impl ValueUpdateListener for ReadBack {
            fn value_updated(&self, id: &str, _value: &Value) {
                *self.1.lock() = self.0.latest_value(id);
            }
        }

        let cache = Arc::new(FireHoseCache::new());
        let listener = Arc::new(ReadBack(cache.clone(), Mutex::new(None)));
        cache.set_value_update_listener(Some(listener.clone()));
        cache.store_value("a", MarketValue::single("LAST", 7.0).into_value());
        cache.set_value_update_listener(None);

        assert_eq!(listener.1.lock().as_ref().and_then(|v| v.number("LAST")), Some(7.0));
    }
}
