//! Capability traits over platform audio handles.
//!
//! `AudioBackend` is the extensibility point: the pipeline, the capture
//! source and the playback ring only ever see these traits, so the same
//! code drives real devices (`CpalBackend`) and scripted fakes
//! (`FakeBackend`).

use crate::audio::config::DeviceConfig;
use crate::error::Result;

/// Platform initialization state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// The platform rejected the handle; it must be recreated before use.
    Uninitialized,
    Initialized,
}

/// Play state of a playback handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
    Paused,
}

/// A microphone handle.
pub trait CaptureDevice: Send + 'static {
    fn state(&self) -> HandleState;

    fn is_recording(&self) -> bool;

    fn start_recording(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Block until `buf` is full or the device becomes invalid.
    ///
    /// Returns the number of bytes written into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Release native resources. The handle is unusable afterwards.
    fn release(&mut self);
}

/// A playback handle in pre-loaded (static) buffer mode.
///
/// Content can only be replaced while stopped: callers stop and flush
/// before every `write`, then `play`.
pub trait PlaybackDevice: Send + 'static {
    fn state(&self) -> HandleState;

    fn play_state(&self) -> PlayState;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Discard any loaded data. A no-op while already stopped and empty.
    fn flush(&mut self);

    /// Load `data` into the static buffer.
    ///
    /// # Errors
    /// `BadValue` if `data` does not fit the buffer, `NotInitialized` if
    /// the handle rejects the write.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    fn release(&mut self);
}

/// Factory for capture and playback handles.
pub trait AudioBackend: Send + Sync + 'static {
    /// Smallest buffer (bytes) the platform accepts for `config`, if known.
    fn min_buffer_bytes(&self, config: &DeviceConfig) -> Option<usize>;

    fn open_capture(
        &self,
        config: &DeviceConfig,
        buffer_bytes: usize,
    ) -> Result<Box<dyn CaptureDevice>>;

    fn open_playback(
        &self,
        config: &DeviceConfig,
        buffer_bytes: usize,
    ) -> Result<Box<dyn PlaybackDevice>>;
}
