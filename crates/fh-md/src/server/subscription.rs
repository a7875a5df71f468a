//! Per-identifier coalescing slots.

use std::sync::atomic::{AtomicBool, Ordering};

use fh_core::Value;
use parking_lot::Mutex;

/// The dispatch handle of one subscription.
///
/// Holds at most one pending, undelivered value. A newer value replaces the
/// pending one in place; older undelivered values are dropped.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: String,
    pending: Mutex<Option<Value>>,
    active: AtomicBool,
}

impl SubscriptionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), pending: Mutex::new(None), active: AtomicBool::new(true) }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Store `value` as the pending one, returning whatever it replaced.
    pub fn swap(&self, value: Value) -> Option<Value> {
        self.pending.lock().replace(value)
    }

    /// Take and clear the pending value.
    pub fn take(&self) -> Option<Value> {
        self.pending.lock().take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// False once the subscription has been removed.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.take();
    }
}
