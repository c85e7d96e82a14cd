//! `PlaybackRing` — round-robin pool of static-mode playback slots.
//!
//! ## Why a ring
//!
//! A static-mode handle plays glitch-free but must be stopped, flushed,
//! reloaded and restarted before its content can change, and releasing and
//! recreating it is slower still. The ring keeps `N` interchangeable slots:
//! each write lands on the slot under the cursor and the cursor moves on,
//! while the background reload task (see `reload`) recreates slots the
//! cursor left behind so the next lap finds fresh handles.
//!
//! ```text
//!   reloadable          exclusion window (exclusion_offset = 12)
//!  ┌─────────┐ ┌───────────────────────────────────────────┐
//!   [0][1][2]   [3][4] ... [12][13][14][cur=15]
//!                                       ▲
//!                                  write_next
//! ```
//!
//! Slots written during the last `exclusion_offset` writes may still be
//! audible, so reload only recycles the few slots just ahead of the cursor
//! and trails it around the ring.
//!
//! ## Concurrency
//!
//! `write_next` runs on the playback task thread, the reload pass on its own
//! thread. Each slot sits behind its own `parking_lot::Mutex`; the reload
//! pass only takes a slot lock outside the exclusion window, so the two
//! threads never contend on a slot that is audible or about to be written.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::{
    audio::{backend::AudioBackend, codec::samples_to_bytes, config::DeviceConfig},
    buffering::chunk::SampleBlock,
    error::Result,
    playback::{
        geometry::RingGeometry,
        slot::{PlaybackSlot, SlotState},
    },
};

/// Upper bound on any single condvar wait, so shutdown is always observed.
pub(crate) const SIGNAL_WAIT: Duration = Duration::from_millis(10);

pub struct PlaybackRing {
    pub(crate) backend: Arc<dyn AudioBackend>,
    pub(crate) config: DeviceConfig,
    pub(crate) buffer_bytes: usize,
    pub(crate) geometry: RingGeometry,
    pub(crate) slots: Vec<Mutex<PlaybackSlot>>,
    /// Next slot to receive a write.
    pub(crate) cursor: AtomicUsize,
    pub(crate) reload_requested: AtomicBool,
    /// A slot is being released and recreated right now.
    pub(crate) recreating: AtomicBool,
    pub(crate) shutdown: AtomicBool,
    pub(crate) reload_passes: AtomicU64,
    /// Paired with `changed`; notified on cursor moves, reload requests,
    /// finished recreations and shutdown.
    pub(crate) signal: Mutex<()>,
    pub(crate) changed: Condvar,
    reloader: Mutex<Option<JoinHandle<()>>>,
    /// Encoding scratch for `write_next`.
    scratch: Mutex<Vec<u8>>,
}

impl PlaybackRing {
    /// Build a ring of empty slots. Call `open_all` before writing.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        config: DeviceConfig,
        buffer_bytes: usize,
        geometry: RingGeometry,
    ) -> Self {
        let slots = (0..geometry.slots)
            .map(|i| Mutex::new(PlaybackSlot::empty(i)))
            .collect();
        Self {
            backend,
            config,
            buffer_bytes,
            geometry,
            slots,
            cursor: AtomicUsize::new(0),
            reload_requested: AtomicBool::new(false),
            recreating: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            reload_passes: AtomicU64::new(0),
            signal: Mutex::new(()),
            changed: Condvar::new(),
            reloader: Mutex::new(None),
            scratch: Mutex::new(Vec::with_capacity(buffer_bytes)),
        }
    }

    /// Allocate every slot.
    ///
    /// # Errors
    /// Propagates the first allocation failure after releasing the slots
    /// that were already created.
    pub fn open_all(&self) -> Result<()> {
        for (i, slot) in self.slots.iter().enumerate() {
            let result = slot
                .lock()
                .allocate(self.backend.as_ref(), &self.config, self.buffer_bytes);
            if let Err(e) = result {
                warn!(slot = i, "playback slot allocation failed: {e}");
                for created in &self.slots[..i] {
                    created.lock().release();
                }
                return Err(e);
            }
        }
        self.cursor.store(0, Ordering::Release);
        self.reload_requested.store(false, Ordering::Release);
        info!(
            slots = self.geometry.slots,
            buffer_bytes = self.buffer_bytes,
            "playback ring opened"
        );
        Ok(())
    }

    /// Start the background reload task. A no-op if it is already running.
    pub fn spawn_reloader(self: &Arc<Self>) -> Result<()> {
        let mut reloader = self.reloader.lock();
        if reloader.is_some() {
            return Ok(());
        }
        self.shutdown.store(false, Ordering::Release);
        let ring = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("nullwave-reload".into())
            .spawn(move || crate::playback::reload::run(ring))?;
        *reloader = Some(handle);
        Ok(())
    }

    /// Load `block` into the slot under the cursor and play it.
    ///
    /// The cursor advances whether or not the write succeeded; a failed
    /// slot is retried on its next turn, after the reload pass has had a
    /// chance to recreate it.
    pub fn write_next(&self, block: &SampleBlock) -> Result<()> {
        let index = self.cursor.load(Ordering::Acquire);
        let result = {
            let mut bytes = self.scratch.lock();
            samples_to_bytes(&block.samples, &mut bytes);
            self.slots[index].lock().load_and_play(&bytes)
        };

        let next = self.geometry.next(index);
        self.cursor.store(next, Ordering::Release);
        if next == self.geometry.free_threshold {
            self.reload_requested.store(true, Ordering::Release);
            debug!(cursor = next, "reload requested");
        }
        self.notify();

        if let Err(ref e) = result {
            debug!(slot = index, "playback write failed: {e}");
        }
        result
    }

    /// Ask the reload task to recycle every slot on its next pass.
    pub fn request_reload(&self) {
        self.reload_requested.store(true, Ordering::Release);
        self.notify();
    }

    /// Stop every slot in index order without releasing handles.
    ///
    /// Waits for an in-flight slot recreation first. Individual failures are
    /// logged; the first one is returned after all slots were visited.
    pub fn stop_all(&self) -> Result<()> {
        self.wait_for_recreation();
        let mut first_err = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if let Err(e) = slot.lock().stop() {
                warn!(slot = i, "failed to stop playback slot: {e}");
                first_err.get_or_insert(e);
            }
        }
        debug!("playback ring stopped");
        first_err.map_or(Ok(()), Err)
    }

    /// Stop the reload task and release every slot. Idempotent.
    pub fn close_all(&self) {
        self.wait_for_recreation();
        self.shutdown.store(true, Ordering::Release);
        self.notify();
        if let Some(handle) = self.reloader.lock().take() {
            if handle.join().is_err() {
                warn!("reload task panicked");
            }
        }
        for slot in &self.slots {
            slot.lock().release();
        }
        info!("playback ring closed");
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buffer_bytes
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn is_reload_requested(&self) -> bool {
        self.reload_requested.load(Ordering::Acquire)
    }

    /// Whether the reload task is releasing and recreating a slot right now.
    pub fn is_recreating(&self) -> bool {
        self.recreating.load(Ordering::Acquire)
    }

    /// Completed reload passes since the ring was created.
    pub fn reload_passes(&self) -> u64 {
        self.reload_passes.load(Ordering::Acquire)
    }

    /// # Panics
    /// Panics if `index >= len()`.
    pub fn slot_state(&self, index: usize) -> SlotState {
        self.slots[index].lock().state()
    }

    /// How many times slot `index` has been (re)created.
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    pub fn slot_generation(&self, index: usize) -> u64 {
        self.slots[index].lock().generation()
    }

    pub(crate) fn notify(&self) {
        // Taking the lock orders this wake-up after any waiter's predicate check.
        drop(self.signal.lock());
        self.changed.notify_all();
    }

    fn wait_for_recreation(&self) {
        let mut guard = self.signal.lock();
        while self.recreating.load(Ordering::Acquire) {
            self.changed.wait_for(&mut guard, SIGNAL_WAIT);
        }
    }

    /// Release and recreate slot `index` unless the cursor has moved onto it.
    ///
    /// Returns `false` if the slot turned out to be protected and was skipped.
    pub(crate) fn recreate(&self, index: usize) -> bool {
        let mut slot = self.slots[index].lock();
        if self
            .geometry
            .is_protected(index, self.cursor.load(Ordering::Acquire))
        {
            return false;
        }
        self.recreating.store(true, Ordering::Release);
        if let Err(e) = slot.allocate(self.backend.as_ref(), &self.config, self.buffer_bytes) {
            warn!(slot = index, "failed to recreate playback slot: {e}");
        }
        self.recreating.store(false, Ordering::Release);
        drop(slot);
        self.notify();
        true
    }
}

impl std::fmt::Debug for PlaybackRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackRing")
            .field("geometry", &self.geometry)
            .field("cursor", &self.cursor())
            .field("reload_requested", &self.is_reload_requested())
            .finish_non_exhaustive()
    }
}
