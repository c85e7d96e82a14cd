//! `CaptureSource` — lifecycle wrapper around one microphone handle.
//!
//! ## Contract
//!
//! ```text
//! open()   idempotent; recreates a handle the platform left uninitialized
//! start()  NoDevice before open, no-op while already recording
//! stop()   NoDevice before open, NotInitialized on a rejected handle
//! read()   blocks for exactly one buffer, NoDevice without a usable handle
//! close()  releases the handle; later calls return NoDevice
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    audio::{
        backend::{AudioBackend, CaptureDevice, HandleState},
        config::{suggested_buffer_bytes, DeviceConfig},
    },
    error::{NullwaveError, Result},
};

pub struct CaptureSource {
    backend: Arc<dyn AudioBackend>,
    config: DeviceConfig,
    device: Option<Box<dyn CaptureDevice>>,
    bytes_last_read: usize,
}

impl CaptureSource {
    pub fn new(backend: Arc<dyn AudioBackend>, config: DeviceConfig) -> Self {
        Self {
            backend,
            config,
            device: None,
            bytes_last_read: 0,
        }
    }

    /// Platform minimum buffer size for this configuration, floored at 1024 bytes.
    pub fn suggested_buffer_bytes(&self) -> usize {
        suggested_buffer_bytes(self.backend.min_buffer_bytes(&self.config), &self.config)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Create the handle, or recreate it if the platform left it uninitialized.
    ///
    /// # Errors
    /// `NotInitialized` if the backend cannot create the handle.
    pub fn open(&mut self) -> Result<()> {
        if let Some(device) = self.device.as_ref() {
            if device.state() == HandleState::Initialized {
                debug!("capture device already open");
                return Ok(());
            }
            info!("capture device uninitialized, recreating");
            if let Some(mut stale) = self.device.take() {
                stale.release();
            }
        }

        let buffer_bytes = self.suggested_buffer_bytes();
        let device = self
            .backend
            .open_capture(&self.config, buffer_bytes)
            .map_err(|e| {
                warn!("could not create capture device: {e}");
                NullwaveError::NotInitialized
            })?;
        info!(
            sample_rate = self.config.sample_rate_hz,
            channels = self.config.channels,
            buffer_bytes,
            "capture device created"
        );
        self.device = Some(device);
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        let device = self.usable_device()?;
        if device.is_recording() {
            return Ok(());
        }
        device.start_recording()?;
        debug!("capture started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        let device = self.device.as_mut().ok_or(NullwaveError::NoDevice)?;
        if device.state() == HandleState::Uninitialized {
            warn!("stop on uninitialized capture device");
            return Err(NullwaveError::NotInitialized);
        }
        device.stop()?;
        debug!("capture stopped");
        Ok(())
    }

    /// Fill `buf` from the microphone, blocking until it is full or the
    /// device becomes invalid.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let device = self.usable_device()?;
        let n = device.read(buf)?;
        self.bytes_last_read = n;
        Ok(n)
    }

    /// Stop and release the handle.
    pub fn close(&mut self) -> Result<()> {
        let mut device = self.device.take().ok_or(NullwaveError::NoDevice)?;
        if device.state() == HandleState::Initialized {
            if let Err(e) = device.stop() {
                warn!("stop before release failed: {e}");
            }
        }
        device.release();
        info!("capture device released");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.is_recording())
    }

    /// Bytes returned by the most recent successful `read`.
    pub fn bytes_last_read(&self) -> usize {
        self.bytes_last_read
    }

    fn usable_device(&mut self) -> Result<&mut Box<dyn CaptureDevice>> {
        match self.device.as_mut() {
            Some(device) if device.state() == HandleState::Initialized => Ok(device),
            _ => Err(NullwaveError::NoDevice),
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fake::FakeBackend;

    fn source(backend: &Arc<FakeBackend>) -> CaptureSource {
        let backend: Arc<dyn AudioBackend> = backend.clone();
        CaptureSource::new(backend, DeviceConfig::input())
    }

    #[test]
    fn start_before_open_is_no_device() {
        let backend = Arc::new(FakeBackend::new());
        let mut src = source(&backend);
        assert!(matches!(src.start(), Err(NullwaveError::NoDevice)));
        assert!(matches!(src.stop(), Err(NullwaveError::NoDevice)));
        assert!(matches!(src.close(), Err(NullwaveError::NoDevice)));
        let mut buf = [0u8; 4];
        assert!(matches!(src.read(&mut buf), Err(NullwaveError::NoDevice)));
    }

    #[test]
    fn open_is_idempotent() {
        let backend = Arc::new(FakeBackend::new());
        let mut src = source(&backend);
        src.open().expect("first open");
        src.open().expect("second open");
        assert_eq!(backend.captures_opened(), 1);
    }

    #[test]
    fn open_recreates_uninitialized_handle() {
        let backend = Arc::new(FakeBackend::new());
        let mut src = source(&backend);
        src.open().expect("open");
        backend.invalidate_capture();
        assert!(matches!(src.stop(), Err(NullwaveError::NotInitialized)));
        src.open().expect("reopen");
        assert_eq!(backend.captures_opened(), 2);
        src.start().expect("start after reopen");
    }

    #[test]
    fn start_twice_is_a_no_op() {
        let backend = Arc::new(FakeBackend::new());
        let mut src = source(&backend);
        src.open().expect("open");
        src.start().expect("start");
        src.start().expect("second start");
        assert!(src.is_recording());
        src.stop().expect("stop");
        assert!(!src.is_recording());
    }

    #[test]
    fn read_records_bytes_last_read() {
        let backend = Arc::new(FakeBackend::new());
        backend.push_capture_samples(&[1, 2, 3, 4]);
        let mut src = source(&backend);
        src.open().expect("open");
        src.start().expect("start");
        let mut buf = [0u8; 8];
        assert_eq!(src.read(&mut buf).expect("read"), 8);
        assert_eq!(src.bytes_last_read(), 8);
        assert_eq!(&buf[..2], &[1, 0]);
    }

    #[test]
    fn close_releases_and_later_calls_fail() {
        let backend = Arc::new(FakeBackend::new());
        let mut src = source(&backend);
        src.open().expect("open");
        src.close().expect("close");
        assert!(!src.is_open());
        assert!(matches!(src.close(), Err(NullwaveError::NoDevice)));
        assert_eq!(backend.captures_released(), 1);
    }

    #[test]
    fn suggested_buffer_is_floored() {
        let backend = Arc::new(FakeBackend::new().with_min_buffer_bytes(Some(256)));
        let src = source(&backend);
        assert_eq!(src.suggested_buffer_bytes(), 1024);
    }
}
