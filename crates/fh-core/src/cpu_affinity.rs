//! CPU affinity for the dispatch thread.
//!
//! The dispatch thread is the single consumer of every coalesced update, so
//! pinning it to a quiet core keeps delivery latency flat under load. This
//! module wraps the `core_affinity` crate.

use tracing::{info, warn};

/// Bind the current thread to the specified CPU core.
///
/// Returns `true` if the binding succeeded, `false` if the core ID is invalid
/// or the OS rejected the request.
pub fn bind_to_core(core_id: usize) -> bool {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    let Some(core) = core_ids.iter().find(|c| c.id == core_id) else {
        warn!("CPU core {core_id} not available (system has {} cores)", core_ids.len());
        return false;
    };
    let ok = core_affinity::set_for_current(*core);
    if ok {
        info!("bound thread to CPU core {core_id}");
    } else {
        warn!("failed to bind thread to CPU core {core_id}");
    }
    ok
}

/// Bind the current thread to `core_id` if one is configured.
///
/// Negative ids mean "no pinning", matching how the config file disables it.
pub fn maybe_bind(core_id: Option<i32>) {
    if let Some(id) = core_id
        && id >= 0
    {
        bind_to_core(id as usize);
    }
}
