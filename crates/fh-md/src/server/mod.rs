//! Distribution server over a firehose.
//!
//! [`FireHoseLiveDataServer`] turns the firehose's continuous update stream
//! into subscribe / unsubscribe / snapshot semantics:
//!
//! - every update lands in the subscription's coalescing slot; a subscription
//!   is queued for dispatch only when its slot goes from empty to full, so a
//!   slow receiver sees the freshest value, never a backlog;
//! - a dedicated dispatch thread drains the queue into the
//!   [`LiveDataReceiver`];
//! - `snapshot` returns the latest values, blocking up to the market data
//!   timeout for identifiers that have not arrived yet.
//!
//! The firehose keeps receiving everything regardless of subscriptions.

pub mod dispatch;
pub mod snapshot;
pub mod subscription;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use crossbeam_channel::Sender;
use fh_core::config::ServerConfig;
use fh_core::{ConnectionStatus, FeedError, Value};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use self::dispatch::{Dispatch, offer, run_dispatch_loop};
use self::snapshot::MarketDataWaiters;
pub use self::subscription::SubscriptionHandle;
use crate::firehose::{DataStateListener, FireHoseLiveData, ValueUpdateListener};

/// Downstream fan-out, invoked on the dispatch thread.
pub trait LiveDataReceiver: Send + Sync {
    fn live_data_received(&self, id: &str, value: &Value);
}

/// Told when identifiers enter or leave the subscription registry. Called on
/// the subscribing thread after the registry lock is released.
pub trait SubscriptionListener: Send + Sync {
    fn subscribed(&self, id: &str);
    fn unsubscribed(&self, id: &str);
}

/// State shared with the firehose listeners and the dispatch thread.
struct Shared {
    label: String,
    firehose: Arc<dyn FireHoseLiveData>,
    receiver: Arc<dyn LiveDataReceiver>,
    subscriptions: RwLock<AHashMap<String, Arc<SubscriptionHandle>>>,
    /// Delivery queue of the running dispatch thread; `None` while disconnected.
    queue: RwLock<Option<Sender<Dispatch>>>,
    waiters: MarketDataWaiters,
    status: Mutex<ConnectionStatus>,
    updates_received: AtomicU64,
    updates_dispatched: AtomicU64,
}

impl Shared {
    fn is_connected(&self) -> bool {
        *self.status.lock() == ConnectionStatus::Connected
    }

    fn on_value(&self, id: &str, value: &Value) {
        self.updates_received.fetch_add(1, Ordering::Relaxed);
        self.waiters.notify(id);

        let Some(handle) = self.subscriptions.read().get(id).cloned() else {
            return;
        };
        let queue = self.queue.read();
        if let Some(queue) = queue.as_ref() {
            offer(&handle, value.clone(), queue);
        }
    }
}

/// Firehose listener; holds the server weakly so the firehose does not keep it alive.
struct Listener(Weak<Shared>);

impl ValueUpdateListener for Listener {
    fn value_updated(&self, id: &str, value: &Value) {
        if let Some(shared) = self.0.upgrade() {
            shared.on_value(id, value);
        }
    }
}

impl DataStateListener for Listener {
    fn data_state_changed(&self) {
        if let Some(shared) = self.0.upgrade() {
            shared.waiters.notify_all();
        }
    }
}

struct DispatchThread {
    queue: Sender<Dispatch>,
    join: JoinHandle<()>,
}

/// Subscribe / snapshot server over a [`FireHoseLiveData`].
///
/// All methods are blocking and may be called from any thread. Dropping a
/// connected server disconnects it.
pub struct FireHoseLiveDataServer {
    shared: Arc<Shared>,
    market_data_timeout: Duration,
    dispatch_cpu_core: Option<i32>,
    /// Serialises connect and disconnect; `Some` while connected.
    dispatch: Mutex<Option<DispatchThread>>,
    subscription_listener: RwLock<Option<Arc<dyn SubscriptionListener>>>,
}

impl FireHoseLiveDataServer {
    pub fn new(
        label: impl Into<String>,
        firehose: Arc<dyn FireHoseLiveData>,
        receiver: Arc<dyn LiveDataReceiver>,
        config: &ServerConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            label: label.into(),
            firehose,
            receiver,
            subscriptions: RwLock::new(AHashMap::new()),
            queue: RwLock::new(None),
            waiters: MarketDataWaiters::new(),
            status: Mutex::new(ConnectionStatus::NotConnected),
            updates_received: AtomicU64::new(0),
            updates_dispatched: AtomicU64::new(0),
        });
        Self {
            shared,
            market_data_timeout: config.market_data_timeout(),
            dispatch_cpu_core: config.dispatch_cpu_core,
            dispatch: Mutex::new(None),
            subscription_listener: RwLock::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn firehose(&self) -> &Arc<dyn FireHoseLiveData> {
        &self.shared.firehose
    }

    pub fn market_data_timeout(&self) -> Duration {
        self.market_data_timeout
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.shared.status.lock()
    }

    pub fn set_subscription_listener(&self, listener: Option<Arc<dyn SubscriptionListener>>) {
        *self.subscription_listener.write() = listener;
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Install the firehose listeners, start the dispatch thread, then start
    /// the firehose.
    pub fn connect(&self) -> Result<(), FeedError> {
        let mut dispatch = self.dispatch.lock();
        if dispatch.is_some() {
            return Err(FeedError::AlreadyConnected);
        }
        let label = self.shared.label.clone();

        let (tx, rx) = crossbeam_channel::unbounded();
        let thread = {
            let shared = self.shared.clone();
            let core = self.dispatch_cpu_core;
            std::thread::Builder::new().name(format!("{label}-dispatch")).spawn(move || {
                run_dispatch_loop(&shared.label, rx, &*shared.receiver, &shared.updates_dispatched, core);
            })?
        };
        *self.shared.queue.write() = Some(tx.clone());

        let listener = Arc::new(Listener(Arc::downgrade(&self.shared)));
        self.shared.firehose.set_value_update_listener(Some(listener.clone()));
        self.shared.firehose.set_data_state_listener(Some(listener));

        if let Err(e) = self.shared.firehose.start() {
            error!("[{label}] failed to start firehose: {e}");
            self.teardown(DispatchThread { queue: tx, join: thread });
            return Err(e);
        }

        *self.shared.status.lock() = ConnectionStatus::Connected;
        *dispatch = Some(DispatchThread { queue: tx, join: thread });
        info!("[{label}] connected");
        Ok(())
    }

    /// Stop the firehose, stop the dispatch thread and release snapshot waiters.
    pub fn disconnect(&self) -> Result<(), FeedError> {
        let mut dispatch = self.dispatch.lock();
        let thread = dispatch.take().ok_or(FeedError::NotConnected)?;
        let label = &self.shared.label;

        *self.shared.status.lock() = ConnectionStatus::NotConnected;
        if let Err(e) = self.shared.firehose.stop() {
            warn!("[{label}] stopping firehose: {e}");
        }
        self.teardown(thread);
        info!("[{label}] disconnected");
        Ok(())
    }

    fn teardown(&self, thread: DispatchThread) {
        let label = &self.shared.label;
        self.shared.firehose.set_value_update_listener(None);
        self.shared.firehose.set_data_state_listener(None);
        self.shared.queue.write().take();

        let _ = thread.queue.send(Dispatch::Shutdown);
        if thread.join.join().is_err() {
            error!("[{label}] dispatch thread panicked");
        }
        // Nothing drains the slots now; empty them so the next connect can queue again.
        for handle in self.shared.subscriptions.read().values() {
            handle.take();
        }
        let waiting = self.shared.waiters.waiting_ids();
        if !waiting.is_empty() {
            info!("[{label}] releasing snapshot waiters for {}", waiting.join(", "));
        }
        self.shared.waiters.notify_all();
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Create (or reuse) a subscription per identifier and return its handle.
    pub fn subscribe<I, S>(&self, ids: I) -> Result<HashMap<String, Arc<SubscriptionHandle>>, FeedError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.shared.is_connected() {
            return Err(FeedError::NotConnected);
        }
        let mut handles = HashMap::new();
        let mut added = Vec::new();
        {
            let mut subscriptions = self.shared.subscriptions.write();
            for id in ids {
                let id = id.as_ref();
                let handle = subscriptions
                    .entry(id.to_string())
                    .or_insert_with(|| {
                        debug!("[{}] subscribed to {id}", self.shared.label);
                        added.push(id.to_string());
                        Arc::new(SubscriptionHandle::new(id))
                    })
                    .clone();
                handles.insert(id.to_string(), handle);
            }
        }
        if let Some(listener) = self.subscription_listener.read().as_ref() {
            for id in &added {
                listener.subscribed(id);
            }
        }
        Ok(handles)
    }

    /// Stop dispatching for these identifiers and return how many
    /// subscriptions were removed.
    ///
    /// Works whether or not the server is connected. Nothing is sent
    /// upstream: the firehose keeps receiving every identifier, so only the
    /// local registry and the [`SubscriptionListener`] see the change.
    pub fn unsubscribe<I, S>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut removed = Vec::new();
        {
            let mut subscriptions = self.shared.subscriptions.write();
            for id in ids {
                if let Some(handle) = subscriptions.remove(id.as_ref()) {
                    handle.deactivate();
                    removed.push(handle.id().to_string());
                }
            }
        }
        if let Some(listener) = self.subscription_listener.read().as_ref() {
            for id in &removed {
                listener.unsubscribed(id);
            }
        }
        removed.len()
    }

    pub fn is_subscribed_to(&self, id: &str) -> bool {
        self.shared.subscriptions.read().contains_key(id)
    }

    /// Subscribed identifiers, sorted.
    pub fn active_subscription_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.subscriptions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn num_active_subscriptions(&self) -> usize {
        self.shared.subscriptions.read().len()
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    /// Latest value for each identifier.
    ///
    /// Identifiers without a value are waited for, up to the market data
    /// timeout, until they arrive, the feed reports complete data, or the
    /// server disconnects. Any still missing afterwards fail the whole call
    /// with [`FeedError::SnapshotUnavailable`].
    pub fn snapshot<I, S>(&self, ids: I) -> Result<HashMap<String, Value>, FeedError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        if !self.shared.is_connected() {
            return Err(FeedError::NotConnected);
        }

        let firehose = &self.shared.firehose;
        let mut values = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match firehose.latest_value(&id) {
                Some(v) => {
                    values.insert(id, v);
                }
                None => missing.push(id),
            }
        }
        if missing.is_empty() {
            return Ok(values);
        }

        self.wait_for_market_data(&missing);

        let mut still_missing = Vec::new();
        for id in missing {
            match firehose.latest_value(&id) {
                Some(v) => {
                    values.insert(id, v);
                }
                None => still_missing.push(id),
            }
        }
        if still_missing.is_empty() {
            return Ok(values);
        }
        still_missing.sort();
        still_missing.dedup();
        warn!("[{}] snapshot missing {}", self.shared.label, still_missing.join(", "));
        Err(FeedError::SnapshotUnavailable { missing: still_missing })
    }

    fn wait_for_market_data(&self, ids: &[String]) {
        let shared = &self.shared;
        let deadline = Instant::now() + self.market_data_timeout;
        debug!("[{}] waiting up to {:?} for {}", shared.label, self.market_data_timeout, ids.join(", "));
        shared.waiters.wait_for(ids, deadline, || {
            !shared.is_connected()
                || shared.firehose.is_market_data_complete()
                || ids.iter().all(|id| shared.firehose.latest_value(id).is_some())
        });
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    /// Value updates seen from the firehose while connected.
    pub fn updates_received(&self) -> u64 {
        self.shared.updates_received.load(Ordering::Relaxed)
    }

    /// Values handed to the [`LiveDataReceiver`].
    pub fn updates_dispatched(&self) -> u64 {
        self.shared.updates_dispatched.load(Ordering::Relaxed)
    }
}

impl Drop for FireHoseLiveDataServer {
    fn drop(&mut self) {
        if self.dispatch.get_mut().is_some() {
            let _ = self.disconnect();
        }
    }
}
