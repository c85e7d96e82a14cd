//! Cycle bodies of the two periodic tasks.
//!
//! ## Capture cycle (every `mic_period`)
//!
//! ```text
//! 1. Paused                     → no-op
//! 2. Handoff still holds a block → no-op (playback is behind)
//! 3. CaptureSource::read        → one buffer of PCM bytes
//! 4. Decode to i16, scale by the current amplitude
//! 5. Handoff::publish
//! ```
//!
//! ## Playback cycle (every `out_period`)
//!
//! ```text
//! 1. Paused                     → no-op
//! 2. Handoff::consume           → nothing new = silence gap
//! 3. Invert polarity (clamped)
//! 4. PlaybackRing::write_next
//! 5. Offer (original, inverted) to telemetry, if enabled
//! ```
//!
//! Failed cycles are logged and counted, never retried: the next tick
//! simply tries again with fresh audio.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    audio::{
        capture::CaptureSource,
        codec::{bytes_to_samples, invert, samples_to_bytes, scale},
    },
    buffering::{chunk::SampleBlock, handoff::Handoff},
    ipc::events::DiagnosticsSnapshot,
    playback::ring::PlaybackRing,
    telemetry::TelemetrySink,
};

pub struct PipelineDiagnostics {
    pub blocks_captured: AtomicUsize,
    pub captures_skipped: AtomicUsize,
    pub blocks_dropped: AtomicUsize,
    pub capture_errors: AtomicUsize,
    pub blocks_played: AtomicUsize,
    pub silence_gaps: AtomicUsize,
    pub write_errors: AtomicUsize,
}

impl Default for PipelineDiagnostics {
    fn default() -> Self {
        Self {
            blocks_captured: AtomicUsize::new(0),
            captures_skipped: AtomicUsize::new(0),
            blocks_dropped: AtomicUsize::new(0),
            capture_errors: AtomicUsize::new(0),
            blocks_played: AtomicUsize::new(0),
            silence_gaps: AtomicUsize::new(0),
            write_errors: AtomicUsize::new(0),
        }
    }
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.blocks_captured.store(0, Ordering::Relaxed);
        self.captures_skipped.store(0, Ordering::Relaxed);
        self.blocks_dropped.store(0, Ordering::Relaxed);
        self.capture_errors.store(0, Ordering::Relaxed);
        self.blocks_played.store(0, Ordering::Relaxed);
        self.silence_gaps.store(0, Ordering::Relaxed);
        self.write_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_captured: self.blocks_captured.load(Ordering::Relaxed),
            captures_skipped: self.captures_skipped.load(Ordering::Relaxed),
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            blocks_played: self.blocks_played.load(Ordering::Relaxed),
            silence_gaps: self.silence_gaps.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

/// Result of one cycle, mostly for tests and trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Paused,
    /// Capture skipped because the previous block is still unread.
    Skipped,
    /// Capture published a block.
    Published,
    /// Capture read a block but the handoff refused it.
    Dropped,
    /// Playback found nothing new.
    Silent,
    /// Playback wrote a block to the ring.
    Played,
    Failed,
}

/// State shared by both tasks and the engine's control methods.
pub struct PipelineShared {
    pub handoff: Handoff,
    /// Also serializes capture cycles against pause/resume/teardown.
    pub capture: Mutex<CaptureSource>,
    pub ring: Arc<PlaybackRing>,
    pub paused: AtomicBool,
    /// `f32` bit pattern of the capture gain.
    pub amplitude: Arc<AtomicU32>,
    pub diagnostics: Arc<PipelineDiagnostics>,
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
    /// Held for the whole playback cycle, so `pause` never races a write.
    pub playback_gate: Mutex<()>,
    pub block_len: usize,
    pub sample_rate: u32,
    pub buffer_bytes: usize,
}

impl PipelineShared {
    pub fn amplitude(&self) -> f32 {
        f32::from_bits(self.amplitude.load(Ordering::Relaxed))
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

pub struct CaptureTask {
    shared: Arc<PipelineShared>,
    raw: Vec<u8>,
    block: SampleBlock,
}

impl CaptureTask {
    pub fn new(shared: Arc<PipelineShared>) -> Self {
        let raw = vec![0u8; shared.buffer_bytes];
        let block = SampleBlock::silent(shared.block_len, shared.sample_rate);
        Self { shared, raw, block }
    }

    pub fn run_cycle(&mut self) -> CycleOutcome {
        let shared = &self.shared;
        let mut capture = shared.capture.lock();
        if shared.is_paused() {
            return CycleOutcome::Paused;
        }
        if shared.handoff.has_pending() {
            shared.diagnostics.captures_skipped.fetch_add(1, Ordering::Relaxed);
            trace!("capture skipped: previous block unread");
            return CycleOutcome::Skipped;
        }

        let n = match capture.read(&mut self.raw) {
            Ok(n) => n,
            Err(e) => {
                shared.diagnostics.capture_errors.fetch_add(1, Ordering::Relaxed);
                warn!("capture read failed: {e}");
                return CycleOutcome::Failed;
            }
        };
        drop(capture);

        bytes_to_samples(&self.raw[..n], &mut self.block.samples);
        scale(&mut self.block.samples, shared.amplitude());

        if shared.handoff.publish(&self.block) {
            shared.diagnostics.blocks_captured.fetch_add(1, Ordering::Relaxed);
            trace!(samples = self.block.len(), "block published");
            CycleOutcome::Published
        } else {
            shared.diagnostics.blocks_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("captured block dropped: handoff full");
            CycleOutcome::Dropped
        }
    }
}

pub struct PlaybackTask {
    shared: Arc<PipelineShared>,
    block: SampleBlock,
    original: Vec<u8>,
    inverted: Vec<u8>,
}

impl PlaybackTask {
    pub fn new(shared: Arc<PipelineShared>) -> Self {
        let block = SampleBlock::silent(shared.block_len, shared.sample_rate);
        Self {
            shared,
            block,
            original: Vec::new(),
            inverted: Vec::new(),
        }
    }

    pub fn run_cycle(&mut self) -> CycleOutcome {
        let shared = &self.shared;
        let _gate = shared.playback_gate.lock();
        if shared.is_paused() {
            return CycleOutcome::Paused;
        }
        if !shared.handoff.consume(&mut self.block) {
            shared.diagnostics.silence_gaps.fetch_add(1, Ordering::Relaxed);
            trace!("nothing to play");
            return CycleOutcome::Silent;
        }

        if shared.telemetry.is_some() {
            samples_to_bytes(&self.block.samples, &mut self.original);
        }
        invert(&mut self.block.samples);

        if let Err(e) = shared.ring.write_next(&self.block) {
            shared.diagnostics.write_errors.fetch_add(1, Ordering::Relaxed);
            warn!("playback write failed: {e}");
            return CycleOutcome::Failed;
        }
        shared.diagnostics.blocks_played.fetch_add(1, Ordering::Relaxed);

        if let Some(sink) = shared.telemetry.as_ref() {
            samples_to_bytes(&self.block.samples, &mut self.inverted);
            sink.offer(&self.original, &self.inverted);
        }
        CycleOutcome::Played
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{config::DeviceConfig, fake::FakeBackend},
        playback::geometry::RingGeometry,
    };

    fn shared_with(backend: &FakeBackend, paused: bool) -> Arc<PipelineShared> {
        let backend: Arc<dyn crate::audio::backend::AudioBackend> = Arc::new(backend.clone());
        let mut capture = CaptureSource::new(Arc::clone(&backend), DeviceConfig::input());
        capture.open().expect("open capture");
        capture.start().expect("start capture");
        let ring = Arc::new(PlaybackRing::new(
            backend,
            DeviceConfig::output(),
            1024,
            RingGeometry::default(),
        ));
        ring.open_all().expect("open ring");
        Arc::new(PipelineShared {
            handoff: Handoff::new(512, 8_000),
            capture: Mutex::new(capture),
            ring,
            paused: AtomicBool::new(paused),
            amplitude: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
            telemetry: None,
            playback_gate: Mutex::new(()),
            block_len: 512,
            sample_rate: 8_000,
            buffer_bytes: 1024,
        })
    }

    #[test]
    fn paused_cycles_do_nothing() {
        let backend = FakeBackend::new();
        let shared = shared_with(&backend, true);
        assert_eq!(CaptureTask::new(Arc::clone(&shared)).run_cycle(), CycleOutcome::Paused);
        assert_eq!(PlaybackTask::new(Arc::clone(&shared)).run_cycle(), CycleOutcome::Paused);
        assert!(backend.writes().is_empty());
    }

    #[test]
    fn capture_skips_while_block_pending() {
        let backend = FakeBackend::new().with_capture_pattern(&[100; 512]);
        let shared = shared_with(&backend, false);
        let mut capture = CaptureTask::new(Arc::clone(&shared));

        assert_eq!(capture.run_cycle(), CycleOutcome::Published);
        assert_eq!(capture.run_cycle(), CycleOutcome::Skipped);
        let snap = shared.diagnostics.snapshot();
        assert_eq!(snap.blocks_captured, 1);
        assert_eq!(snap.captures_skipped, 1);
    }

    #[test]
    fn playback_without_block_is_silence_gap() {
        let backend = FakeBackend::new();
        let shared = shared_with(&backend, false);
        let mut playback = PlaybackTask::new(Arc::clone(&shared));
        assert_eq!(playback.run_cycle(), CycleOutcome::Silent);
        assert_eq!(shared.diagnostics.snapshot().silence_gaps, 1);
        assert!(backend.writes().is_empty());
    }

    #[test]
    fn scaled_block_is_inverted_into_ring() {
        let backend = FakeBackend::new().with_capture_pattern(&[1000; 512]);
        let shared = shared_with(&backend, false);
        shared.amplitude.store(0.5f32.to_bits(), Ordering::Relaxed);

        assert_eq!(CaptureTask::new(Arc::clone(&shared)).run_cycle(), CycleOutcome::Published);
        assert_eq!(PlaybackTask::new(Arc::clone(&shared)).run_cycle(), CycleOutcome::Played);

        let writes = backend.writes();
        assert_eq!(writes.len(), 1);
        let mut expected = Vec::new();
        samples_to_bytes(&[-500; 512], &mut expected);
        assert_eq!(writes[0].data, expected);
        assert_eq!(shared.ring.cursor(), 1);
    }

    #[test]
    fn diagnostics_reset_clears_counters() {
        let diagnostics = PipelineDiagnostics::default();
        diagnostics.write_errors.fetch_add(2, Ordering::Relaxed);
        diagnostics.reset();
        assert_eq!(diagnostics.snapshot(), DiagnosticsSnapshot::default());
    }
}
