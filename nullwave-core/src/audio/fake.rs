//! `FakeBackend` — in-memory backend for tests and hardware-free runs.
//!
//! Capture reads are served from, in order: bytes queued with
//! `push_capture_samples`, then a repeating pattern set with
//! `with_capture_pattern`, then silence. Reads never block, so a fake
//! microphone behaves like a device that always has a buffer ready.
//!
//! Every playback handle gets a sequential id in open order and every
//! successful `write` is appended to a shared log that tests inspect.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;

use crate::{
    audio::{
        backend::{AudioBackend, CaptureDevice, HandleState, PlayState, PlaybackDevice},
        codec::samples_to_bytes,
        config::DeviceConfig,
    },
    error::{NullwaveError, Result},
};

/// Injected failure for playback writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    BadValue,
    NotInitialized,
    /// Accept only half of the data.
    Short,
}

/// One successful playback write.
#[derive(Debug, Clone)]
pub struct PlaybackWrite {
    pub device_id: usize,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct CaptureFeed {
    queued: VecDeque<u8>,
    pattern: Vec<u8>,
    pattern_pos: usize,
}

#[derive(Default)]
struct Shared {
    feed: Mutex<CaptureFeed>,
    capture_valid: Mutex<Option<Arc<AtomicBool>>>,
    writes: Mutex<Vec<PlaybackWrite>>,
    write_fault: Mutex<Option<WriteFault>>,
    captures_opened: AtomicUsize,
    captures_released: AtomicUsize,
    playbacks_opened: AtomicUsize,
    playbacks_released: AtomicUsize,
    playback_open_limit: Mutex<Option<usize>>,
    playback_open_delay: Mutex<Option<Duration>>,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    min_buffer_bytes: Option<usize>,
    shared: Arc<Shared>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_buffer_bytes(mut self, min: Option<usize>) -> Self {
        self.min_buffer_bytes = min;
        self
    }

    /// Repeat `samples` forever once queued data runs out.
    pub fn with_capture_pattern(self, samples: &[i16]) -> Self {
        {
            let mut feed = self.shared.feed.lock();
            samples_to_bytes(samples, &mut feed.pattern);
            feed.pattern_pos = 0;
        }
        self
    }

    /// Refuse to create more than `limit` playback handles.
    pub fn with_playback_open_limit(self, limit: usize) -> Self {
        *self.shared.playback_open_limit.lock() = Some(limit);
        self
    }

    /// Make every later `open_playback` take at least `delay`.
    pub fn set_playback_open_delay(&self, delay: Option<Duration>) {
        *self.shared.playback_open_delay.lock() = delay;
    }

    pub fn push_capture_samples(&self, samples: &[i16]) {
        let mut bytes = Vec::new();
        samples_to_bytes(samples, &mut bytes);
        self.shared.feed.lock().queued.extend(bytes);
    }

    /// Make the most recently opened capture handle report uninitialized.
    pub fn invalidate_capture(&self) {
        if let Some(valid) = self.shared.capture_valid.lock().as_ref() {
            valid.store(false, Ordering::SeqCst);
        }
    }

    pub fn set_write_fault(&self, fault: Option<WriteFault>) {
        *self.shared.write_fault.lock() = fault;
    }

    pub fn writes(&self) -> Vec<PlaybackWrite> {
        self.shared.writes.lock().clone()
    }

    pub fn captures_opened(&self) -> usize {
        self.shared.captures_opened.load(Ordering::SeqCst)
    }

    pub fn captures_released(&self) -> usize {
        self.shared.captures_released.load(Ordering::SeqCst)
    }

    pub fn playbacks_opened(&self) -> usize {
        self.shared.playbacks_opened.load(Ordering::SeqCst)
    }

    pub fn playbacks_released(&self) -> usize {
        self.shared.playbacks_released.load(Ordering::SeqCst)
    }
}

impl AudioBackend for FakeBackend {
    fn min_buffer_bytes(&self, _config: &DeviceConfig) -> Option<usize> {
        self.min_buffer_bytes
    }

    fn open_capture(
        &self,
        _config: &DeviceConfig,
        _buffer_bytes: usize,
    ) -> Result<Box<dyn CaptureDevice>> {
        let valid = Arc::new(AtomicBool::new(true));
        *self.shared.capture_valid.lock() = Some(Arc::clone(&valid));
        self.shared.captures_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCapture {
            shared: Arc::clone(&self.shared),
            valid,
            recording: false,
            released: false,
        }))
    }

    fn open_playback(
        &self,
        _config: &DeviceConfig,
        buffer_bytes: usize,
    ) -> Result<Box<dyn PlaybackDevice>> {
        if let Some(limit) = *self.shared.playback_open_limit.lock() {
            if self.shared.playbacks_opened.load(Ordering::SeqCst) >= limit {
                return Err(NullwaveError::AudioDevice(
                    "fake playback handle limit reached".into(),
                ));
            }
        }
        let delay = *self.shared.playback_open_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let id = self.shared.playbacks_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePlayback {
            shared: Arc::clone(&self.shared),
            id,
            capacity: buffer_bytes,
            loaded: Vec::with_capacity(buffer_bytes),
            play_state: PlayState::Stopped,
            released: false,
        }))
    }
}

struct FakeCapture {
    shared: Arc<Shared>,
    valid: Arc<AtomicBool>,
    recording: bool,
    released: bool,
}

impl CaptureDevice for FakeCapture {
    fn state(&self) -> HandleState {
        if self.valid.load(Ordering::SeqCst) && !self.released {
            HandleState::Initialized
        } else {
            HandleState::Uninitialized
        }
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn start_recording(&mut self) -> Result<()> {
        if self.state() == HandleState::Uninitialized {
            return Err(NullwaveError::NotInitialized);
        }
        self.recording = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.recording = false;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state() == HandleState::Uninitialized {
            return Err(NullwaveError::NotInitialized);
        }
        let mut guard = self.shared.feed.lock();
        let feed = &mut *guard;
        for byte in buf.iter_mut() {
            *byte = if let Some(b) = feed.queued.pop_front() {
                b
            } else if feed.pattern.is_empty() {
                0
            } else {
                let b = feed.pattern[feed.pattern_pos];
                feed.pattern_pos = (feed.pattern_pos + 1) % feed.pattern.len();
                b
            };
        }
        Ok(buf.len())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.recording = false;
            self.shared.captures_released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct FakePlayback {
    shared: Arc<Shared>,
    id: usize,
    capacity: usize,
    loaded: Vec<u8>,
    play_state: PlayState,
    released: bool,
}

impl PlaybackDevice for FakePlayback {
    fn state(&self) -> HandleState {
        if self.released {
            HandleState::Uninitialized
        } else {
            HandleState::Initialized
        }
    }

    fn play_state(&self) -> PlayState {
        self.play_state
    }

    fn play(&mut self) -> Result<()> {
        if self.released {
            return Err(NullwaveError::NotInitialized);
        }
        self.play_state = PlayState::Playing;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if self.play_state == PlayState::Playing {
            self.play_state = PlayState::Paused;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.play_state = PlayState::Stopped;
        Ok(())
    }

    fn flush(&mut self) {
        self.loaded.clear();
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.released {
            return Err(NullwaveError::NotInitialized);
        }
        if data.len() > self.capacity {
            return Err(NullwaveError::BadValue(format!(
                "{} bytes exceed static buffer of {}",
                data.len(),
                self.capacity
            )));
        }
        let accepted = match *self.shared.write_fault.lock() {
            Some(WriteFault::BadValue) => {
                return Err(NullwaveError::BadValue("injected fault".into()))
            }
            Some(WriteFault::NotInitialized) => return Err(NullwaveError::NotInitialized),
            Some(WriteFault::Short) => data.len() / 2,
            None => data.len(),
        };
        self.loaded.clear();
        self.loaded.extend_from_slice(&data[..accepted]);
        self.shared.writes.lock().push(PlaybackWrite {
            device_id: self.id,
            data: self.loaded.clone(),
        });
        Ok(accepted)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.play_state = PlayState::Stopped;
            self.shared.playbacks_released.fetch_add(1, Ordering::SeqCst);
        }
    }
}
