//! # nullwave-core
//!
//! Phase-inversion noise cancellation engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureSource ─(capture task, every mic_period)─► scale ─► Handoff
//!                                                                           │
//!        PlaybackRing ◄─ invert ◄─(playback task, every out_period)─────────┘
//!            │    ▲
//!            │    └── reload task recreates slots behind the write cursor
//!            ▼
//!        speakers (static-mode slot 0..N, round-robin)
//! ```
//!
//! Capture and playback never block each other: the handoff holds a single
//! block and drops the newest when playback falls behind.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod telemetry;

// Convenience re-exports for downstream crates
pub use audio::{AudioBackend, DeviceConfig, FakeBackend};
#[cfg(feature = "audio-cpal")]
pub use audio::CpalBackend;
pub use engine::{CancellationEngine, EngineConfig};
pub use error::{NullwaveError, Result};
pub use ipc::events::{DiagnosticsSnapshot, EngineStatus, EngineStatusEvent};
pub use playback::{PlaybackRing, RingGeometry};
pub use telemetry::{TcpExporter, TelemetrySink, DEFAULT_TELEMETRY_PORT};
