//! The dispatch loop: drains coalesced updates on a dedicated thread.
//!
//! ```text
//! value_updated ──► offer() ──► slot empty? ──► Dispatch::Deliver ──► run_dispatch_loop
//!                                  │                                        │
//!                                  └─ slot full: replaced, not re-queued    └─► LiveDataReceiver
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender};
use fh_core::Value;
use tracing::{debug, info, warn};

use super::LiveDataReceiver;
use super::subscription::SubscriptionHandle;

/// Entries on the delivery queue.
pub enum Dispatch {
    /// A subscription with a pending value.
    Deliver(Arc<SubscriptionHandle>),
    /// Ends the loop.
    Shutdown,
}

/// Put `value` into the subscription's slot, queueing the subscription only
/// if the slot was empty. Returns whether it was queued.
///
/// A subscription is therefore on the queue at most once while it holds a
/// pending value.
pub fn offer(handle: &Arc<SubscriptionHandle>, value: Value, queue: &Sender<Dispatch>) -> bool {
    if handle.swap(value).is_some() {
        return false;
    }
    if queue.send(Dispatch::Deliver(handle.clone())).is_err() {
        // Dispatcher already gone; do not leave a value that nothing will drain.
        handle.take();
        return false;
    }
    true
}

/// Run the dispatch loop on the calling thread until `Dispatch::Shutdown`
/// arrives or every sender is dropped.
///
/// If `cpu_core` is `Some`, the thread is pinned to that core first.
pub fn run_dispatch_loop(
    label: &str,
    rx: Receiver<Dispatch>,
    receiver: &dyn LiveDataReceiver,
    dispatched: &AtomicU64,
    cpu_core: Option<i32>,
) {
    fh_core::cpu_affinity::maybe_bind(cpu_core);
    info!("[{label}] dispatch loop started");

    while let Ok(entry) = rx.recv() {
        let handle = match entry {
            Dispatch::Deliver(handle) => handle,
            Dispatch::Shutdown => break,
        };
        if !handle.is_active() {
            debug!("[{label}] skipping removed subscription {}", handle.id());
            continue;
        }
        match handle.take() {
            Some(value) => {
                receiver.live_data_received(handle.id(), &value);
                dispatched.fetch_add(1, Ordering::Relaxed);
            }
            None => warn!("[{label}] no pending value for {} at dispatch", handle.id()),
        }
    }

    info!("[{label}] dispatch loop exited");
}

#[cfg(test)]
mod tests {
    use fh_core::MarketValue;
    use parking_lot::Mutex;

    use super::*;

    fn last(v: f64) -> Value {
        MarketValue::single("LAST", v).into_value()
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<(String, f64)>>);

    impl LiveDataReceiver for Collect {
        fn live_data_received(&self, id: &str, value: &Value) {
            self.0.lock().push((id.to_string(), value.number("LAST").unwrap_or(f64::NAN)));
        }
    }

    #[test]
    fn pending_subscription_is_queued_once() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let h = Arc::new(SubscriptionHandle::new("a"));

        assert!(offer(&h, last(1.0), &tx));
        assert!(!offer(&h, last(2.0), &tx));
        assert!(!offer(&h, last(3.0), &tx));
        assert_eq!(rx.len(), 1);

        h.take();
        assert!(offer(&h, last(4.0), &tx));
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn offer_to_a_closed_queue_leaves_the_slot_empty() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let h = Arc::new(SubscriptionHandle::new("a"));
        assert!(!offer(&h, last(1.0), &tx));
        assert!(!h.has_pending());
    }

    #[test]
    fn loop_delivers_latest_skips_empty_and_removed_then_stops() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let a = Arc::new(SubscriptionHandle::new("a"));
        let gone = Arc::new(SubscriptionHandle::new("gone"));

        offer(&a, last(1.0), &tx);
        offer(&a, last(2.0), &tx);
        offer(&gone, last(9.0), &tx);
        gone.deactivate();
        // Race with a concurrent clear: the slot is empty at dequeue time.
        tx.send(Dispatch::Deliver(Arc::new(SubscriptionHandle::new("empty")))).unwrap();
        tx.send(Dispatch::Shutdown).unwrap();
        offer(&Arc::new(SubscriptionHandle::new("after")), last(5.0), &tx);

        let collect = Collect::default();
        let dispatched = AtomicU64::new(0);
        run_dispatch_loop("test", rx, &collect, &dispatched, None);

        assert_eq!(*collect.0.lock(), vec![("a".to_string(), 2.0)]);
        assert_eq!(dispatched.load(Ordering::Relaxed), 1);
    }
}
