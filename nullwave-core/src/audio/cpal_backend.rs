//! `CpalBackend` — real devices through cpal.
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send` on most platforms, while capture and playback
//! handles must move onto the scheduler threads. Every stream is therefore
//! built, played and dropped on its own `StreamThread`; the handle only
//! keeps the shared state the callback reads plus a stop channel.
//!
//! # Capture
//!
//! The input callback converts to `i16` and pushes into an SPSC
//! `ringbuf` producer. `read` drains the consumer with `drain_exact`,
//! giving the blocking "fill one buffer" semantics of a platform record
//! call.
//!
//! # Playback
//!
//! cpal has no static-buffer playback object, so one shared output stream
//! mixes every registered `Voice`. A voice is the loaded buffer of one
//! playback handle plus its play position; `play` starts it from the top
//! and it falls silent once the buffer is exhausted. The callback only
//! `try_lock`s, so a voice that is being reloaded is skipped for one
//! callback rather than blocking the audio thread.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        backend::{AudioBackend, CaptureDevice, HandleState, PlayState, PlaybackDevice},
        codec::{bytes_to_samples, samples_to_bytes},
        config::{DeviceConfig, Direction},
        device::select_device,
    },
    buffering::{create_sample_ring, drain_exact, Consumer, Producer, SampleConsumer},
    error::{NullwaveError, Result},
};

/// Capture ring capacity, in device buffers.
const CAPTURE_RING_BUFFERS: usize = 8;

/// Extra time a blocking read waits beyond one buffer's duration.
const READ_SLACK: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Stream threads
// ---------------------------------------------------------------------------

/// Owns the OS thread a `cpal::Stream` lives on.
struct StreamThread {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Build and play a stream on a fresh thread.
    ///
    /// Blocks until the stream is confirmed playing (or failed).
    fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Stream> + Send + 'static,
    {
        let (open_tx, open_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name(format!("nullwave-{name}"))
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = open_tx.send(Err(NullwaveError::AudioStream(e.to_string())));
                    return;
                }
                let _ = open_tx.send(Ok(()));
                // Returns once the owner drops `stop_tx`.
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match open_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(NullwaveError::Other(anyhow::anyhow!(
                "audio stream thread died during open"
            ))),
        }
    }

    fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("audio stream thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pick a supported format for the requested rate and channel count,
/// preferring native `i16`.
fn stream_format(device: &cpal::Device, config: &DeviceConfig) -> Result<SampleFormat> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = match config.direction {
        Direction::Input => device.supported_input_configs().map(|r| r.collect()),
        Direction::Output => device.supported_output_configs().map(|r| r.collect()),
    }
    .map_err(|e| NullwaveError::AudioDevice(e.to_string()))?;

    let rate = SampleRate(config.sample_rate_hz);
    let candidates: Vec<SampleFormat> = ranges
        .iter()
        .filter(|r| {
            r.channels() == config.channels
                && r.min_sample_rate() <= rate
                && rate <= r.max_sample_rate()
        })
        .map(|r| r.sample_format())
        .collect();
    [SampleFormat::I16, SampleFormat::F32, SampleFormat::U16]
        .into_iter()
        .find(|f| candidates.contains(f))
        .ok_or_else(|| {
            NullwaveError::AudioStream(format!(
                "{} Hz x{} not supported by this device",
                config.sample_rate_hz, config.channels
            ))
        })
}

fn stream_config(config: &DeviceConfig) -> StreamConfig {
    StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate_hz),
        buffer_size: cpal::BufferSize::Default,
    }
}

fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn u16_to_i16(s: u16) -> i16 {
    (s as i32 - 32_768) as i16
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// `AudioBackend` over the default cpal host.
///
/// The host is looked up on each stream thread, since not every platform
/// host may cross threads.
pub struct CpalBackend {
    /// Shared output mixer, created on the first playback open.
    output: Mutex<Option<OutputStream>>,
}

struct OutputStream {
    config: DeviceConfig,
    mixer: Arc<Mixer>,
    _thread: StreamThread,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            output: Mutex::new(None),
        }
    }

    fn mixer_for(&self, config: &DeviceConfig) -> Result<Arc<Mixer>> {
        let mut output = self.output.lock();
        if let Some(existing) = output.as_ref() {
            if existing.config == *config {
                return Ok(Arc::clone(&existing.mixer));
            }
            info!("playback configuration changed; reopening output stream");
        }
        // Drop the old stream before opening a new one on the same device.
        output.take();

        let mixer = Arc::new(Mixer::default());
        let thread = {
            let config = config.clone();
            let mixer = Arc::clone(&mixer);
            StreamThread::spawn("output", move || build_output(&config, mixer))?
        };
        *output = Some(OutputStream {
            config: config.clone(),
            mixer: Arc::clone(&mixer),
            _thread: thread,
        });
        Ok(mixer)
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn min_buffer_bytes(&self, _config: &DeviceConfig) -> Option<usize> {
        // cpal does not report a minimum static buffer; the floor applies.
        None
    }

    fn open_capture(
        &self,
        config: &DeviceConfig,
        buffer_bytes: usize,
    ) -> Result<Box<dyn CaptureDevice>> {
        let samples_per_buffer = (buffer_bytes / 2).max(1);
        let (producer, consumer) = create_sample_ring(samples_per_buffer * CAPTURE_RING_BUFFERS);
        let recording = Arc::new(AtomicBool::new(false));
        let valid = Arc::new(AtomicBool::new(true));

        let thread = {
            let config = config.clone();
            let recording = Arc::clone(&recording);
            let valid = Arc::clone(&valid);
            StreamThread::spawn("capture-stream", move || {
                build_input(&config, producer, recording, valid)
            })?
        };

        let buffer_duration =
            Duration::from_secs_f64(buffer_bytes as f64 / config.bytes_per_second().max(1) as f64);
        Ok(Box::new(CpalCapture {
            consumer,
            recording,
            valid,
            stream: Some(thread),
            scratch: Vec::with_capacity(samples_per_buffer),
            read_timeout: buffer_duration + READ_SLACK,
        }))
    }

    fn open_playback(
        &self,
        config: &DeviceConfig,
        buffer_bytes: usize,
    ) -> Result<Box<dyn PlaybackDevice>> {
        let mixer = self.mixer_for(config)?;
        let voice = Arc::new(Mutex::new(Voice::default()));
        mixer.voices.lock().push(Arc::clone(&voice));
        Ok(Box::new(CpalPlayback {
            mixer,
            voice,
            capacity: buffer_bytes,
            play_state: PlayState::Stopped,
            released: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

fn build_input(
    config: &DeviceConfig,
    mut producer: crate::buffering::SampleProducer,
    recording: Arc<AtomicBool>,
    valid: Arc<AtomicBool>,
) -> Result<Stream> {
    let host = cpal::default_host();
    let device = select_device(&host, Direction::Input, config.named_endpoint())?;
    info!(
        device = device.name().unwrap_or_default().as_str(),
        sample_rate = config.sample_rate_hz,
        channels = config.channels,
        "opening input device"
    );

    let format = stream_format(&device, config)?;
    let stream_config = stream_config(config);
    let err_fn = move |err: cpal::StreamError| {
        error!("input stream error: {err}");
        valid.store(false, Ordering::SeqCst);
    };

    let stream = match format {
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _info| {
                if !recording.load(Ordering::Relaxed) {
                    return;
                }
                let written = producer.push_slice(data);
                if written < data.len() {
                    warn!("capture ring full: dropped {} samples", data.len() - written);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::F32 => {
            let mut converted: Vec<i16> = Vec::new();
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _info| {
                    if !recording.load(Ordering::Relaxed) {
                        return;
                    }
                    converted.clear();
                    converted.extend(data.iter().map(|s| f32_to_i16(*s)));
                    let written = producer.push_slice(&converted);
                    if written < converted.len() {
                        warn!("capture ring full: dropped {} samples", converted.len() - written);
                    }
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let mut converted: Vec<i16> = Vec::new();
            device.build_input_stream(
                &stream_config,
                move |data: &[u16], _info| {
                    if !recording.load(Ordering::Relaxed) {
                        return;
                    }
                    converted.clear();
                    converted.extend(data.iter().map(|s| u16_to_i16(*s)));
                    let written = producer.push_slice(&converted);
                    if written < converted.len() {
                        warn!("capture ring full: dropped {} samples", converted.len() - written);
                    }
                },
                err_fn,
                None,
            )
        }
        fmt => {
            return Err(NullwaveError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    };
    stream.map_err(|e| NullwaveError::AudioStream(e.to_string()))
}

struct CpalCapture {
    consumer: SampleConsumer,
    recording: Arc<AtomicBool>,
    /// Cleared by the stream error callback.
    valid: Arc<AtomicBool>,
    stream: Option<StreamThread>,
    scratch: Vec<i16>,
    read_timeout: Duration,
}

impl CaptureDevice for CpalCapture {
    fn state(&self) -> HandleState {
        if self.stream.is_some() && self.valid.load(Ordering::SeqCst) {
            HandleState::Initialized
        } else {
            HandleState::Uninitialized
        }
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn start_recording(&mut self) -> Result<()> {
        if self.state() == HandleState::Uninitialized {
            return Err(NullwaveError::NotInitialized);
        }
        // Discard whatever was buffered before the last stop.
        self.scratch.resize(self.scratch.capacity().max(1), 0);
        while self.consumer.pop_slice(&mut self.scratch) > 0 {}
        self.recording.store(true, Ordering::SeqCst);
        debug!("cpal capture recording");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.recording.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state() == HandleState::Uninitialized {
            return Err(NullwaveError::NotInitialized);
        }
        self.scratch.resize(buf.len() / 2, 0);
        let recording = Arc::clone(&self.recording);
        let valid = Arc::clone(&self.valid);
        let filled = drain_exact(
            &mut self.consumer,
            &mut self.scratch,
            Instant::now() + self.read_timeout,
            move || recording.load(Ordering::Relaxed) && valid.load(Ordering::Relaxed),
        );

        let mut bytes = Vec::with_capacity(filled * 2);
        samples_to_bytes(&self.scratch[..filled], &mut bytes);
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn release(&mut self) {
        self.recording.store(false, Ordering::SeqCst);
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!("cpal capture stream released");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Voice {
    samples: Vec<i16>,
    pos: usize,
    playing: bool,
}

#[derive(Default)]
struct Mixer {
    voices: Mutex<Vec<Arc<Mutex<Voice>>>>,
}

impl Mixer {
    /// Sum every playing voice into `out`. Never blocks.
    fn render(&self, out: &mut [i32]) {
        out.iter_mut().for_each(|s| *s = 0);
        let Some(voices) = self.voices.try_lock() else {
            return;
        };
        for voice in voices.iter() {
            let Some(mut v) = voice.try_lock() else {
                continue;
            };
            if !v.playing {
                continue;
            }
            let start = v.pos;
            let n = out.len().min(v.samples.len().saturating_sub(start));
            for (acc, s) in out.iter_mut().zip(&v.samples[start..start + n]) {
                *acc += *s as i32;
            }
            v.pos += n;
        }
    }

    fn unregister(&self, voice: &Arc<Mutex<Voice>>) {
        self.voices.lock().retain(|v| !Arc::ptr_eq(v, voice));
    }
}

fn build_output(config: &DeviceConfig, mixer: Arc<Mixer>) -> Result<Stream> {
    let host = cpal::default_host();
    let device = select_device(&host, Direction::Output, config.named_endpoint())?;
    info!(
        device = device.name().unwrap_or_default().as_str(),
        sample_rate = config.sample_rate_hz,
        channels = config.channels,
        "opening output device"
    );

    let format = stream_format(&device, config)?;
    let stream_config = stream_config(config);
    let err_fn = |err: cpal::StreamError| error!("output stream error: {err}");
    let mut mix: Vec<i32> = Vec::new();

    let stream = match format {
        SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                mix.resize(data.len(), 0);
                mixer.render(&mut mix);
                for (out, s) in data.iter_mut().zip(&mix) {
                    *out = (*s).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                mix.resize(data.len(), 0);
                mixer.render(&mut mix);
                for (out, s) in data.iter_mut().zip(&mix) {
                    *out = (*s as f32 / 32_768.0).clamp(-1.0, 1.0);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [u16], _info: &cpal::OutputCallbackInfo| {
                mix.resize(data.len(), 0);
                mixer.render(&mut mix);
                for (out, s) in data.iter_mut().zip(&mix) {
                    *out = ((*s).clamp(i16::MIN as i32, i16::MAX as i32) + 32_768) as u16;
                }
            },
            err_fn,
            None,
        ),
        fmt => {
            return Err(NullwaveError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    };
    stream.map_err(|e| NullwaveError::AudioStream(e.to_string()))
}

struct CpalPlayback {
    mixer: Arc<Mixer>,
    voice: Arc<Mutex<Voice>>,
    capacity: usize,
    play_state: PlayState,
    released: bool,
}

impl PlaybackDevice for CpalPlayback {
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
        let mut voice = self.voice.lock();
        if self.play_state == PlayState::Stopped {
            voice.pos = 0;
        }
        voice.playing = true;
        self.play_state = PlayState::Playing;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if self.play_state == PlayState::Playing {
            self.voice.lock().playing = false;
            self.play_state = PlayState::Paused;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut voice = self.voice.lock();
        voice.playing = false;
        voice.pos = 0;
        self.play_state = PlayState::Stopped;
        Ok(())
    }

    fn flush(&mut self) {
        if self.play_state == PlayState::Stopped {
            self.voice.lock().samples.clear();
        }
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
        let whole = data.len() - data.len() % 2;
        let mut voice = self.voice.lock();
        bytes_to_samples(&data[..whole], &mut voice.samples);
        voice.pos = 0;
        Ok(whole)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.play_state = PlayState::Stopped;
            self.mixer.unregister(&self.voice);
        }
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.release();
    }
}
