//! `CancellationEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! CancellationEngine::new()
//!     └─► start()          → devices open, ring filled, tasks scheduled
//!         ├─► resume()     → capture recording, status = Running
//!         ├─► pause()      → capture stopped, ring stopped, status = Paused
//!         ├─► set_*_period → both tasks cancelled, joined, rescheduled
//!         └─► teardown()   → tasks joined, devices released, status = Stopped
//! ```
//!
//! ## Threading
//!
//! Capture and playback each run on a `PeriodicTask` thread. Playback first
//! fires `1.5 × mic_period` after capture so a block is normally waiting in
//! the handoff by then. Control methods take `&self` and may be called from
//! any thread; they serialize on the session lock.

pub mod pipeline;
pub mod scheduler;

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    audio::{
        backend::AudioBackend,
        capture::CaptureSource,
        codec::samples_in,
        config::{suggested_buffer_bytes, DeviceConfig},
    },
    buffering::handoff::Handoff,
    error::{NullwaveError, Result},
    ipc::events::{DiagnosticsSnapshot, EngineStatus, EngineStatusEvent},
    playback::{
        geometry::{RingGeometry, DEFAULT_EXCLUSION_OFFSET, DEFAULT_FREE_THRESHOLD, DEFAULT_SLOTS},
        ring::PlaybackRing,
    },
    telemetry::TelemetrySink,
};

use pipeline::{CaptureTask, PipelineDiagnostics, PipelineShared, PlaybackTask};
use scheduler::PeriodicTask;

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 64;

/// Configuration for `CancellationEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub capture: DeviceConfig,
    pub playback: DeviceConfig,
    /// Capture task period. Default: 20 ms.
    pub mic_period_ms: u64,
    /// Playback task period. Default: 20 ms.
    pub out_period_ms: u64,
    /// Gain applied to captured samples. Default: 1.0.
    pub amplitude: f32,
    /// Playback slots in the ring. Default: 16.
    pub ring_slots: usize,
    /// Fraction of a lap at which reload is requested. Default: 13/16.
    pub free_threshold: f32,
    /// Fraction of the ring reload may recycle. Default: 3/4.
    pub exclusion_offset: f32,
    /// Leave the engine paused after `start()`. Default: true.
    pub start_paused: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capture: DeviceConfig::input(),
            playback: DeviceConfig::output(),
            mic_period_ms: 20,
            out_period_ms: 20,
            amplitude: 1.0,
            ring_slots: DEFAULT_SLOTS,
            free_threshold: DEFAULT_FREE_THRESHOLD,
            exclusion_offset: DEFAULT_EXCLUSION_OFFSET,
            start_paused: true,
        }
    }
}

impl EngineConfig {
    pub fn geometry(&self) -> RingGeometry {
        RingGeometry::from_fractions(self.ring_slots, self.free_threshold, self.exclusion_offset)
    }
}

#[derive(Debug, Clone, Copy)]
struct Periods {
    mic: Duration,
    out: Duration,
}

/// Everything that exists between `start()` and `teardown()`.
struct Session {
    shared: Arc<PipelineShared>,
    capture_task: Option<PeriodicTask>,
    playback_task: Option<PeriodicTask>,
}

impl Session {
    fn cancel_tasks(&mut self) {
        if let Some(mut task) = self.capture_task.take() {
            task.cancel();
        }
        if let Some(mut task) = self.playback_task.take() {
            task.cancel();
        }
    }

    fn schedule(&mut self, periods: Periods) -> Result<()> {
        let mut capture = CaptureTask::new(Arc::clone(&self.shared));
        self.capture_task = Some(PeriodicTask::spawn(
            "capture",
            Duration::ZERO,
            periods.mic,
            move || {
                capture.run_cycle();
            },
        )?);

        let mut playback = PlaybackTask::new(Arc::clone(&self.shared));
        self.playback_task = Some(PeriodicTask::spawn(
            "playback",
            periods.mic * 3 / 2,
            periods.out,
            move || {
                playback.run_cycle();
            },
        )?);
        Ok(())
    }
}

/// The top-level engine handle.
///
/// `CancellationEngine` is `Send + Sync`; wrap it in an `Arc` to drive it
/// from several threads.
pub struct CancellationEngine {
    backend: Arc<dyn AudioBackend>,
    config: EngineConfig,
    periods: Mutex<Periods>,
    amplitude: Arc<AtomicU32>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    session: Mutex<Option<Session>>,
    status: Mutex<EngineStatus>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl CancellationEngine {
    /// Create an engine. Does not touch any device until `start()`.
    pub fn new(backend: Arc<dyn AudioBackend>, config: EngineConfig) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let periods = Periods {
            mic: Duration::from_millis(config.mic_period_ms.max(1)),
            out: Duration::from_millis(config.out_period_ms.max(1)),
        };
        Self {
            backend,
            amplitude: Arc::new(AtomicU32::new(config.amplitude.to_bits())),
            config,
            periods: Mutex::new(periods),
            telemetry: None,
            session: Mutex::new(None),
            status: Mutex::new(EngineStatus::Idle),
            status_tx,
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        }
    }

    /// Hand every played `(original, inverted)` pair to `sink`.
    ///
    /// Takes effect at the next `start()`.
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Open the devices, fill the playback ring and schedule both tasks.
    ///
    /// # Errors
    /// - `AlreadyRunning` if a session is active.
    /// - Device errors from opening the microphone or any playback slot;
    ///   everything opened so far is released again.
    pub fn start(&self) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(NullwaveError::AlreadyRunning);
        }

        self.diagnostics.reset();
        match self.open_session() {
            Ok(mut opened) => {
                let paused = opened.shared.is_paused();
                if let Err(e) = opened.schedule(*self.periods.lock()) {
                    close_session(opened);
                    self.set_status(EngineStatus::Error, Some(e.to_string()));
                    return Err(e);
                }
                info!(
                    buffer_bytes = opened.shared.buffer_bytes,
                    paused, "cancellation engine started"
                );
                *session = Some(opened);
                let status = if paused {
                    EngineStatus::Paused
                } else {
                    EngineStatus::Running
                };
                self.set_status(status, None);
                Ok(())
            }
            Err(e) => {
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Stop capture and every playback slot without releasing them.
    /// A no-op while already paused.
    ///
    /// # Errors
    /// `NotRunning` before `start()`; otherwise the first device failure,
    /// after all devices were visited.
    pub fn pause(&self) -> Result<()> {
        let session = self.session.lock();
        let shared = &session.as_ref().ok_or(NullwaveError::NotRunning)?.shared;
        if shared.paused.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let capture_result = shared.capture.lock().stop();
        if let Err(ref e) = capture_result {
            warn!("failed to stop capture: {e}");
        }
        let ring_result = {
            let _gate = shared.playback_gate.lock();
            shared.ring.stop_all()
        };
        self.set_status(EngineStatus::Paused, None);
        info!("cancellation engine paused");
        capture_result.and(ring_result)
    }

    /// Restart capture. Playback slots start again on their next write.
    /// A no-op while already running.
    ///
    /// # Errors
    /// `NotRunning` before `start()`, or the capture start failure (the
    /// engine then stays paused).
    pub fn resume(&self) -> Result<()> {
        let session = self.session.lock();
        let shared = &session.as_ref().ok_or(NullwaveError::NotRunning)?.shared;
        if !shared.is_paused() {
            return Ok(());
        }

        {
            let mut capture = shared.capture.lock();
            capture.start()?;
            shared.handoff.clear();
            shared.paused.store(false, Ordering::Release);
        }
        self.set_status(EngineStatus::Running, None);
        info!("cancellation engine resumed");
        Ok(())
    }

    /// Change the capture period. Both tasks are rescheduled.
    ///
    /// # Errors
    /// `InvalidPeriod` for 0 ms.
    pub fn set_mic_period(&self, ms: u64) -> Result<()> {
        self.reschedule(|p| p.mic = Duration::from_millis(ms), ms)
    }

    /// Change the playback period. Both tasks are rescheduled.
    ///
    /// # Errors
    /// `InvalidPeriod` for 0 ms.
    pub fn set_out_period(&self, ms: u64) -> Result<()> {
        self.reschedule(|p| p.out = Duration::from_millis(ms), ms)
    }

    /// Set the gain applied to every following capture cycle.
    pub fn set_amplitude(&self, amplitude: f32) {
        self.amplitude.store(amplitude.to_bits(), Ordering::Relaxed);
    }

    /// Cancel both tasks and release every device. Idempotent and
    /// best-effort: failures are logged, never returned.
    pub fn teardown(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        close_session(session);
        self.set_status(EngineStatus::Stopped, None);
        info!("cancellation engine torn down");
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of pipeline counters for the current (or last) session.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Negotiated buffer size in bytes, while a session is active.
    pub fn buffer_bytes(&self) -> Option<usize> {
        self.session.lock().as_ref().map(|s| s.shared.buffer_bytes)
    }

    pub fn amplitude(&self) -> f32 {
        f32::from_bits(self.amplitude.load(Ordering::Relaxed))
    }

    pub fn mic_period(&self) -> Duration {
        self.periods.lock().mic
    }

    pub fn out_period(&self) -> Duration {
        self.periods.lock().out
    }

    pub fn is_paused(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map_or(true, |s| s.shared.is_paused())
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn open_session(&self) -> Result<Session> {
        let mut capture = CaptureSource::new(Arc::clone(&self.backend), self.config.capture.clone());
        capture.open()?;

        let playback = &self.config.playback;
        let buffer_bytes = capture.suggested_buffer_bytes().max(suggested_buffer_bytes(
            self.backend.min_buffer_bytes(playback),
            playback,
        ));

        let ring = Arc::new(PlaybackRing::new(
            Arc::clone(&self.backend),
            playback.clone(),
            buffer_bytes,
            self.config.geometry(),
        ));
        let opened = ring.open_all().and_then(|()| ring.spawn_reloader());
        if let Err(e) = opened {
            ring.close_all();
            if let Err(close_err) = capture.close() {
                warn!("failed to close capture after start failure: {close_err}");
            }
            return Err(e);
        }

        if !self.config.start_paused {
            if let Err(e) = capture.start() {
                ring.close_all();
                if let Err(close_err) = capture.close() {
                    warn!("failed to close capture after start failure: {close_err}");
                }
                return Err(e);
            }
        }

        let shared = Arc::new(PipelineShared {
            handoff: Handoff::new(
                samples_in(buffer_bytes, self.config.capture.bits_per_sample),
                self.config.capture.sample_rate_hz,
            ),
            capture: Mutex::new(capture),
            ring,
            paused: self.config.start_paused.into(),
            amplitude: Arc::clone(&self.amplitude),
            diagnostics: Arc::clone(&self.diagnostics),
            telemetry: self.telemetry.clone(),
            playback_gate: Mutex::new(()),
            block_len: samples_in(buffer_bytes, self.config.capture.bits_per_sample),
            sample_rate: self.config.capture.sample_rate_hz,
            buffer_bytes,
        });
        Ok(Session {
            shared,
            capture_task: None,
            playback_task: None,
        })
    }

    fn reschedule(&self, update: impl FnOnce(&mut Periods), ms: u64) -> Result<()> {
        if ms == 0 {
            return Err(NullwaveError::InvalidPeriod);
        }
        let mut session = self.session.lock();
        let periods = {
            let mut periods = self.periods.lock();
            update(&mut periods);
            *periods
        };
        if let Some(active) = session.as_mut() {
            active.cancel_tasks();
            if let Err(e) = active.schedule(periods) {
                return Err(self.abort_reschedule(active, e));
            }
            info!(mic = ?periods.mic, out = ?periods.out, "tasks rescheduled");
        }
        Ok(())
    }

    /// Drop whatever `schedule` managed to spawn and report the session as
    /// failed. The session stays open until `teardown`.
    fn abort_reschedule(&self, session: &mut Session, err: NullwaveError) -> NullwaveError {
        session.cancel_tasks();
        session.shared.paused.store(true, Ordering::Release);
        warn!("failed to reschedule tasks: {err}");
        self.set_status(EngineStatus::Error, Some(err.to_string()));
        err
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Drop for CancellationEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Join the tasks, then release capture and the ring.
fn close_session(mut session: Session) {
    session.cancel_tasks();
    let shared = &session.shared;
    shared.paused.store(true, Ordering::Release);
    {
        let mut capture = shared.capture.lock();
        if capture.is_open() {
            if let Err(e) = capture.close() {
                warn!("failed to close capture: {e}");
            }
        }
    }
    shared.ring.close_all();
    shared.handoff.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fake::FakeBackend;

    fn engine(backend: &FakeBackend) -> CancellationEngine {
        CancellationEngine::new(Arc::new(backend.clone()), EngineConfig::default())
    }

    #[test]
    fn default_config_matches_reference_values() {
        let config = EngineConfig::default();
        assert_eq!(config.mic_period_ms, 20);
        assert_eq!(config.out_period_ms, 20);
        assert!(config.start_paused);
        assert_eq!(config.geometry(), RingGeometry::default());
        assert_eq!(config.capture.sample_rate_hz, 8_000);
    }

    #[test]
    fn start_twice_is_rejected() {
        let backend = FakeBackend::new();
        let engine = engine(&backend);
        engine.start().expect("start");
        assert!(matches!(engine.start(), Err(NullwaveError::AlreadyRunning)));
        assert_eq!(engine.status(), EngineStatus::Paused);
        engine.teardown();
    }

    #[test]
    fn control_before_start_is_not_running() {
        let engine = engine(&FakeBackend::new());
        assert!(matches!(engine.pause(), Err(NullwaveError::NotRunning)));
        assert!(matches!(engine.resume(), Err(NullwaveError::NotRunning)));
        assert_eq!(engine.buffer_bytes(), None);
    }

    #[test]
    fn zero_period_is_rejected_without_change() {
        let engine = engine(&FakeBackend::new());
        assert!(matches!(engine.set_mic_period(0), Err(NullwaveError::InvalidPeriod)));
        assert!(matches!(engine.set_out_period(0), Err(NullwaveError::InvalidPeriod)));
        assert_eq!(engine.mic_period(), Duration::from_millis(20));
    }

    #[test]
    fn buffer_size_uses_larger_platform_minimum() {
        let backend = FakeBackend::new().with_min_buffer_bytes(Some(3000));
        let engine = engine(&backend);
        engine.start().expect("start");
        assert_eq!(engine.buffer_bytes(), Some(3000));
        engine.teardown();
    }

    #[test]
    fn failed_ring_open_releases_everything() {
        let backend = FakeBackend::new().with_playback_open_limit(4);
        let engine = engine(&backend);
        assert!(engine.start().is_err());
        assert_eq!(engine.status(), EngineStatus::Error);
        assert_eq!(backend.playbacks_released(), 4);
        assert_eq!(backend.captures_released(), 1);
    }

    #[test]
    fn failed_reschedule_cancels_tasks_and_reports_error() {
        let backend = FakeBackend::new();
        let engine = engine(&backend);
        engine.start().expect("start");
        engine.resume().expect("resume");
        let mut status_rx = engine.subscribe_status();

        {
            let mut session = engine.session.lock();
            let active = session.as_mut().expect("session open");
            assert!(active.capture_task.is_some());
            let err = engine.abort_reschedule(active, NullwaveError::AlreadyRunning);
            assert!(matches!(err, NullwaveError::AlreadyRunning));
            assert!(active.capture_task.is_none());
            assert!(active.playback_task.is_none());
        }

        assert_eq!(engine.status(), EngineStatus::Error);
        assert!(engine.is_paused());
        let event = status_rx.try_recv().expect("status event");
        assert_eq!(event.status, EngineStatus::Error);
        assert!(event.detail.is_some());

        engine.teardown();
        assert_eq!(backend.playbacks_released(), backend.playbacks_opened());
    }

    #[test]
    fn teardown_is_idempotent() {
        let backend = FakeBackend::new();
        let engine = engine(&backend);
        engine.start().expect("start");
        engine.teardown();
        engine.teardown();
        assert_eq!(engine.status(), EngineStatus::Stopped);
        assert_eq!(backend.playbacks_released(), 16);
    }
}
