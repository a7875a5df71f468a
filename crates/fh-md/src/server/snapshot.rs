//! Blocking waits for market data to arrive.
//!
//! Snapshot callers register the identifiers they are missing and sleep on a
//! single condition variable. Any update for a registered identifier, any
//! change of the complete flag, and disconnect wake every waiter; each one
//! then re-checks its own condition.

use std::time::Instant;

use ahash::AHashMap;
use parking_lot::{Condvar, Mutex};

#[derive(Default)]
pub struct MarketDataWaiters {
    /// Identifier to number of callers waiting for it.
    waiting: Mutex<AHashMap<String, usize>>,
    cond: Condvar,
}

impl MarketDataWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `done()` holds or `deadline` passes.
    ///
    /// `done` is evaluated with the waiter lock held, so a notification sent
    /// after the caller's last check cannot be missed.
    pub fn wait_for(&self, ids: &[String], deadline: Instant, mut done: impl FnMut() -> bool) {
        let mut waiting = self.waiting.lock();
        for id in ids {
            *waiting.entry(id.clone()).or_insert(0) += 1;
        }

        while !done() {
            if self.cond.wait_until(&mut waiting, deadline).timed_out() {
                break;
            }
        }

        for id in ids {
            if let Some(n) = waiting.get_mut(id.as_str()) {
                *n -= 1;
                if *n == 0 {
                    waiting.remove(id.as_str());
                }
            }
        }
    }

    /// Wake all waiters if anyone is waiting for `id`.
    pub fn notify(&self, id: &str) {
        let waiting = self.waiting.lock();
        if waiting.contains_key(id) {
            self.cond.notify_all();
        }
    }

    /// Wake all waiters unconditionally.
    pub fn notify_all(&self) {
        let _waiting = self.waiting.lock();
        self.cond.notify_all();
    }

    /// Identifiers currently being waited for, sorted.
    pub fn waiting_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.waiting.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn returns_at_deadline_and_unregisters() {
        let w = MarketDataWaiters::new();
        let started = Instant::now();
        w.wait_for(&["C".to_string()], started + Duration::from_millis(50), || false);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(w.waiting_ids().is_empty());
    }

    #[test]
    fn notify_for_a_waited_id_wakes_the_waiter() {
        let w = Arc::new(MarketDataWaiters::new());
        let ready = Arc::new(AtomicBool::new(false));

        let waiter = {
            let (w, ready) = (w.clone(), ready.clone());
            std::thread::spawn(move || {
                let started = Instant::now();
                w.wait_for(&["C".to_string(), "C".to_string()], started + Duration::from_secs(10), || {
                    ready.load(Ordering::SeqCst)
                });
                started.elapsed()
            })
        };

        while w.waiting_ids().is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(w.waiting_ids(), vec!["C".to_string()]);
        ready.store(true, Ordering::SeqCst);
        w.notify("other");
        w.notify("C");

        let elapsed = waiter.join().unwrap();
        assert!(elapsed < Duration::from_secs(5));
        assert!(w.waiting_ids().is_empty());
    }
}
