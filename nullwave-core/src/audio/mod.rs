//! Audio devices: PCM codec, device profiles, backend traits and the
//! capture wrapper.
//!
//! # Backends
//!
//! Everything above this module talks to `AudioBackend`. `FakeBackend`
//! is always available; `CpalBackend` needs the `audio-cpal` feature.

pub mod backend;
pub mod capture;
pub mod codec;
pub mod config;
#[cfg(feature = "audio-cpal")]
pub mod cpal_backend;
pub mod device;
pub mod fake;

pub use backend::{AudioBackend, CaptureDevice, HandleState, PlayState, PlaybackDevice};
pub use capture::CaptureSource;
pub use config::{DeviceConfig, Direction};
#[cfg(feature = "audio-cpal")]
pub use cpal_backend::CpalBackend;
pub use fake::FakeBackend;
