//! `PlaybackSlot` — one static-mode playback handle.
//!
//! ```text
//! Empty ──allocate──► Stopped ⇄ Playing ⇄ Paused ──release──► Empty
//! ```
//!
//! `load_and_play` is the only way content changes: stop and flush if the
//! handle is playing or paused, load the new buffer, then play.

use tracing::{debug, trace};

use crate::{
    audio::{
        backend::{AudioBackend, PlayState, PlaybackDevice},
        config::DeviceConfig,
    },
    error::{NullwaveError, Result},
};

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No handle: never allocated, released, or a recreation failed.
    Empty,
    Stopped,
    Playing,
    Paused,
}

impl SlotState {
    pub fn is_allocated(self) -> bool {
        self != SlotState::Empty
    }
}

pub struct PlaybackSlot {
    index: usize,
    device: Option<Box<dyn PlaybackDevice>>,
    /// Number of times a handle has been created for this slot.
    generation: u64,
}

impl PlaybackSlot {
    pub fn empty(index: usize) -> Self {
        Self {
            index,
            device: None,
            generation: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> SlotState {
        match self.device.as_ref().map(|d| d.play_state()) {
            None => SlotState::Empty,
            Some(PlayState::Stopped) => SlotState::Stopped,
            Some(PlayState::Playing) => SlotState::Playing,
            Some(PlayState::Paused) => SlotState::Paused,
        }
    }

    /// Create a fresh handle, releasing any existing one first.
    pub fn allocate(
        &mut self,
        backend: &dyn AudioBackend,
        config: &DeviceConfig,
        buffer_bytes: usize,
    ) -> Result<()> {
        self.release();
        let device = backend.open_playback(config, buffer_bytes)?;
        self.device = Some(device);
        self.generation += 1;
        trace!(slot = self.index, generation = self.generation, "slot allocated");
        Ok(())
    }

    /// Stop and drop the handle. A no-op on an empty slot.
    pub fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            if device.play_state() != PlayState::Stopped {
                if let Err(e) = device.stop() {
                    debug!(slot = self.index, "stop before release failed: {e}");
                }
            }
            device.release();
        }
    }

    /// Replace the slot's content with `data` and start playing it.
    ///
    /// # Errors
    /// - `NoDevice` if the slot is empty.
    /// - `BadValue` / `NotInitialized` as reported by the handle.
    /// - `WriteFailure` if the handle accepted fewer bytes than given.
    pub fn load_and_play(&mut self, data: &[u8]) -> Result<()> {
        let device = self.device.as_mut().ok_or(NullwaveError::NoDevice)?;
        match device.play_state() {
            PlayState::Playing | PlayState::Paused => {
                device.stop()?;
                device.flush();
            }
            PlayState::Stopped => {}
        }

        let written = device.write(data)?;
        if written != data.len() {
            return Err(NullwaveError::WriteFailure {
                written,
                expected: data.len(),
            });
        }
        device.play()
    }

    /// Stop playback without releasing the handle.
    pub fn stop(&mut self) -> Result<()> {
        match self.device.as_mut() {
            Some(device) if device.play_state() != PlayState::Stopped => device.stop(),
            _ => Ok(()),
        }
    }
}

impl Drop for PlaybackSlot {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fake::{FakeBackend, WriteFault};

    fn allocated(backend: &FakeBackend) -> PlaybackSlot {
        let mut slot = PlaybackSlot::empty(0);
        slot.allocate(backend, &DeviceConfig::output(), 1024)
            .expect("allocate");
        slot
    }

    #[test]
    fn empty_slot_reports_no_device() {
        let mut slot = PlaybackSlot::empty(3);
        assert_eq!(slot.state(), SlotState::Empty);
        assert!(matches!(
            slot.load_and_play(&[0; 4]),
            Err(NullwaveError::NoDevice)
        ));
    }

    #[test]
    fn allocated_slot_starts_stopped_then_plays() {
        let backend = FakeBackend::new();
        let mut slot = allocated(&backend);
        assert_eq!(slot.state(), SlotState::Stopped);
        slot.load_and_play(&[1, 2, 3, 4]).expect("first write");
        assert_eq!(slot.state(), SlotState::Playing);
        slot.load_and_play(&[5, 6, 7, 8]).expect("rewrite while playing");
        assert_eq!(slot.state(), SlotState::Playing);

        let writes = backend.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].data, vec![5, 6, 7, 8]);
    }

    #[test]
    fn write_errors_are_reported() {
        let backend = FakeBackend::new();
        let mut slot = allocated(&backend);

        backend.set_write_fault(Some(WriteFault::BadValue));
        assert!(matches!(
            slot.load_and_play(&[0; 8]),
            Err(NullwaveError::BadValue(_))
        ));

        backend.set_write_fault(Some(WriteFault::NotInitialized));
        assert!(matches!(
            slot.load_and_play(&[0; 8]),
            Err(NullwaveError::NotInitialized)
        ));

        backend.set_write_fault(Some(WriteFault::Short));
        assert!(matches!(
            slot.load_and_play(&[0; 8]),
            Err(NullwaveError::WriteFailure {
                written: 4,
                expected: 8
            })
        ));
        assert_eq!(slot.state(), SlotState::Stopped);
    }

    #[test]
    fn oversized_write_is_bad_value() {
        let backend = FakeBackend::new();
        let mut slot = allocated(&backend);
        assert!(matches!(
            slot.load_and_play(&vec![0; 2048]),
            Err(NullwaveError::BadValue(_))
        ));
    }

    #[test]
    fn reallocate_releases_previous_handle() {
        let backend = FakeBackend::new();
        let mut slot = allocated(&backend);
        slot.load_and_play(&[0; 4]).expect("write");
        slot.allocate(&backend, &DeviceConfig::output(), 1024)
            .expect("reallocate");
        assert_eq!(slot.generation(), 2);
        assert_eq!(slot.state(), SlotState::Stopped);
        assert_eq!(backend.playbacks_released(), 1);

        slot.release();
        assert_eq!(slot.state(), SlotState::Empty);
        assert_eq!(backend.playbacks_released(), 2);
    }
}
