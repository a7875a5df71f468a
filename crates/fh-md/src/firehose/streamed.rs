//! A firehose fed by a connector job.
//!
//! [`StreamedFireHoseLiveData`] owns at most one [`ConnectorJob`] per
//! start/stop cycle. Records from the job are handed to a [`FeedHandler`],
//! which decodes them into identifier/value pairs and publishes them through
//! the shared [`FireHoseCache`].

use std::sync::Arc;

use fh_core::{ConnectionState, FeedError, Value};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::info;

use super::{DataStateListener, FireHoseCache, FireHoseLiveData, ValueUpdateListener};
use crate::connector::{ConnectorCallback, ConnectorJob, ConnectorJobFactory, ConnectorJobHandle, Pipeline};

/// The feed-specific part of a streamed firehose.
pub trait FeedHandler<T>: Send + Sync {
    /// Interpret one record and publish whatever it carries into `cache`.
    fn record_received(&self, record: T, cache: &FireHoseCache);

    fn connected(&self, _cache: &FireHoseCache) {}

    fn disconnected(&self, _cache: &FireHoseCache) {}
}

/// Bridges connector events to the feed handler and the cache.
struct FeedCallback<T> {
    cache: Arc<FireHoseCache>,
    handler: Arc<dyn FeedHandler<T>>,
}

impl<T: Send> ConnectorCallback<T> for FeedCallback<T> {
    fn connected(&self) {
        self.handler.connected(&self.cache);
    }

    fn received(&self, record: T) {
        self.handler.record_received(record, &self.cache);
    }

    fn disconnected(&self) {
        self.handler.disconnected(&self.cache);
        self.cache.set_market_data_complete(false);
    }
}

/// Firehose backed by a [`ConnectorJob`] running on a tokio runtime.
///
/// `start`, `stop` and `is_started` are serialised on an internal mutex.
/// A job that ends on its own (end of input, transport failure) still counts
/// as started until `stop` is called; reconnecting is the owner's decision.
pub struct StreamedFireHoseLiveData<T> {
    jobs: ConnectorJobFactory<T>,
    pipeline: Option<Pipeline>,
    callback: Arc<FeedCallback<T>>,
    runtime: Handle,
    job: Mutex<Option<ConnectorJobHandle>>,
}

impl<T: Send + 'static> StreamedFireHoseLiveData<T> {
    pub fn new(
        jobs: ConnectorJobFactory<T>,
        handler: Arc<dyn FeedHandler<T>>,
        pipeline: Option<Pipeline>,
        runtime: Handle,
    ) -> Self {
        let callback = Arc::new(FeedCallback { cache: Arc::new(FireHoseCache::new()), handler });
        Self { jobs, pipeline, callback, runtime, job: Mutex::new(None) }
    }

    pub fn label(&self) -> &str {
        self.jobs.label()
    }

    pub fn cache(&self) -> &FireHoseCache {
        &self.callback.cache
    }

    /// State of the current job, or `Disconnected` when not started.
    pub fn connection_state(&self) -> ConnectionState {
        self.job.lock().as_ref().map(ConnectorJobHandle::state).unwrap_or_default()
    }

    /// Observe the current job's state transitions.
    pub fn state_receiver(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.job.lock().as_ref().map(ConnectorJobHandle::state_receiver)
    }
}

impl<T: Send + 'static> FireHoseLiveData for StreamedFireHoseLiveData<T> {
    fn start(&self) -> Result<(), FeedError> {
        let mut job = self.job.lock();
        if job.is_some() {
            return Err(FeedError::AlreadyStarted);
        }
        let callback: Arc<dyn ConnectorCallback<T>> = self.callback.clone();
        let (instance, handle): (ConnectorJob<T>, ConnectorJobHandle) = self.jobs.new_instance(callback, self.pipeline);
        self.runtime.spawn(instance.run());
        info!("[{}] firehose started", self.label());
        *job = Some(handle);
        Ok(())
    }

    fn stop(&self) -> Result<(), FeedError> {
        let handle = self.job.lock().take().ok_or(FeedError::NotStarted)?;
        handle.poison();
        info!("[{}] firehose stopped, {} identifiers cached", self.label(), self.callback.cache.len());
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.job.lock().is_some()
    }

    fn latest_value(&self, id: &str) -> Option<Value> {
        self.callback.cache.latest_value(id)
    }

    fn is_market_data_complete(&self) -> bool {
        self.callback.cache.is_market_data_complete()
    }

    fn set_value_update_listener(&self, listener: Option<Arc<dyn ValueUpdateListener>>) {
        self.callback.cache.set_value_update_listener(listener);
    }

    fn set_data_state_listener(&self, listener: Option<Arc<dyn DataStateListener>>) {
        self.callback.cache.set_data_state_listener(listener);
    }

    fn updates_received(&self) -> u64 {
        self.callback.cache.updates_received()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use fh_core::MarketValue;
    use fh_core::config::TransportConfig;
    use fh_core::record::LineRecordStreamFactory;

    use super::*;
    use crate::connector::{stream_factory, transport_factory};

    /// `"<id> <last>"` sets a value, `"COMPLETE"` sets the flag.
    struct SpaceSeparated {
        complete_seen: Mutex<Vec<bool>>,
        connects: AtomicUsize,
    }

    impl FeedHandler<String> for SpaceSeparated {
        fn record_received(&self, record: String, cache: &FireHoseCache) {
            if record == "COMPLETE" {
                cache.set_market_data_complete(true);
                self.complete_seen.lock().push(cache.is_market_data_complete());
                return;
            }
            if let Some((id, last)) = record.split_once(' ') {
                if let Ok(last) = last.parse::<f64>() {
                    cache.store_value(id, MarketValue::single("LAST", last).into_value());
                }
            }
        }

        fn connected(&self, _cache: &FireHoseCache) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Changes(AtomicUsize);

    impl DataStateListener for Changes {
        fn data_state_changed(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn replay_firehose(path: &Path) -> (StreamedFireHoseLiveData<String>, Arc<SpaceSeparated>) {
        let config = TransportConfig::File { path: path.to_path_buf(), bytes_per_sec: None };
        let jobs = ConnectorJobFactory::new(
            "replay",
            transport_factory(&config),
            stream_factory(LineRecordStreamFactory::default()),
        );
        let handler = Arc::new(SpaceSeparated { complete_seen: Mutex::new(Vec::new()), connects: AtomicUsize::new(0) });
        (StreamedFireHoseLiveData::new(jobs, handler.clone(), None, Handle::current()), handler)
    }

    async fn wait_terminated(firehose: &StreamedFireHoseLiveData<String>) {
        let mut rx = firehose.state_receiver().unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_terminal())).await.unwrap().unwrap();
    }

    fn capture(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn start_twice_and_stop_when_stopped_are_errors() {
        let file = capture("a 1\n");
        let (firehose, _) = replay_firehose(file.path());

        assert!(matches!(firehose.stop(), Err(FeedError::NotStarted)));
        firehose.start().unwrap();
        assert!(matches!(firehose.start(), Err(FeedError::AlreadyStarted)));
        assert!(firehose.is_started());
        firehose.stop().unwrap();
        assert!(!firehose.is_started());
        assert!(matches!(firehose.stop(), Err(FeedError::NotStarted)));
        assert_eq!(firehose.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn replay_publishes_values_and_resets_complete_on_disconnect() {
        let file = capture("test1 52.07\ntest2 52.15\nCOMPLETE\ntest3 52.16\ntest3 52.17\n");
        let (firehose, handler) = replay_firehose(file.path());
        let changes = Arc::new(Changes(AtomicUsize::new(0)));
        firehose.set_data_state_listener(Some(changes.clone()));

        firehose.start().unwrap();
        wait_terminated(&firehose).await;

        assert_eq!(firehose.latest_value("test1").and_then(|v| v.number("LAST")), Some(52.07));
        assert_eq!(firehose.latest_value("test3").and_then(|v| v.number("LAST")), Some(52.17));
        assert!(firehose.latest_value("test4").is_none());
        assert_eq!(firehose.updates_received(), 4);

        assert_eq!(*handler.complete_seen.lock(), vec![true]);
        assert!(!firehose.is_market_data_complete());
        assert_eq!(changes.0.load(Ordering::SeqCst), 2);

        assert!(firehose.is_started());
        firehose.stop().unwrap();
    }

    #[tokio::test]
    async fn restart_runs_a_fresh_job() {
        let file = capture("a 1\n");
        let (firehose, handler) = replay_firehose(file.path());

        firehose.start().unwrap();
        wait_terminated(&firehose).await;
        firehose.stop().unwrap();

        firehose.start().unwrap();
        wait_terminated(&firehose).await;
        firehose.stop().unwrap();

        assert_eq!(handler.connects.load(Ordering::SeqCst), 2);
        assert_eq!(firehose.updates_received(), 2);
    }
}
