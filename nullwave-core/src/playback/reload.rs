//! Background reload task for `PlaybackRing`.
//!
//! ## Loop
//!
//! ```text
//! wait (condvar) until reload_requested || shutdown
//! for i in 0..N:
//!     wait (condvar) while i is inside the exclusion window of the cursor
//!     release + recreate slot i
//! clear reload_requested
//! ```
//!
//! Every wait is a `Condvar::wait_for` bounded by `SIGNAL_WAIT`, so the
//! thread sleeps instead of spinning and still observes shutdown promptly
//! even if a notification is missed.

use std::sync::{atomic::Ordering, Arc};

use tracing::{debug, info, trace};

use crate::playback::ring::{PlaybackRing, SIGNAL_WAIT};

/// Body of the reload thread. Returns when the ring is shut down.
pub(crate) fn run(ring: Arc<PlaybackRing>) {
    info!("reload task started");
    while wait_for_request(&ring) {
        if !reload_pass(&ring) {
            break;
        }
        ring.reload_requested.store(false, Ordering::Release);
        let passes = ring.reload_passes.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(passes, "reload pass complete");
        ring.notify();
    }
    info!("reload task stopped");
}

/// Block until a pass is requested. Returns `false` on shutdown.
fn wait_for_request(ring: &PlaybackRing) -> bool {
    let mut guard = ring.signal.lock();
    loop {
        if ring.shutdown.load(Ordering::Acquire) {
            return false;
        }
        if ring.reload_requested.load(Ordering::Acquire) {
            return true;
        }
        ring.changed.wait_for(&mut guard, SIGNAL_WAIT);
    }
}

/// Recreate every slot once. Returns `false` if shutdown interrupted the pass.
fn reload_pass(ring: &PlaybackRing) -> bool {
    for index in 0..ring.slots.len() {
        loop {
            if !wait_until_recyclable(ring, index) {
                return false;
            }
            if ring.recreate(index) {
                trace!(slot = index, "slot recycled");
                break;
            }
        }
    }
    true
}

/// Block while `index` is protected by the cursor. Returns `false` on shutdown.
fn wait_until_recyclable(ring: &PlaybackRing, index: usize) -> bool {
    let mut guard = ring.signal.lock();
    loop {
        if ring.shutdown.load(Ordering::Acquire) {
            return false;
        }
        let cursor = ring.cursor.load(Ordering::Acquire);
        if !ring.geometry.is_protected(index, cursor) {
            return true;
        }
        ring.changed.wait_for(&mut guard, SIGNAL_WAIT);
    }
}
