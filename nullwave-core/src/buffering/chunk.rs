//! Typed sample block passed from the capture task to the playback task.

/// A contiguous block of signed 16-bit samples at a known sample rate.
///
/// Allocated once at pipeline start and reused every cycle; the handoff
/// copies samples in and out instead of moving the allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBlock {
    /// Interleaved 16-bit PCM samples.
    pub samples: Vec<i16>,
    /// Sample rate in Hz (e.g. 8000, 44100, 48000).
    pub sample_rate: u32,
}

impl SampleBlock {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// A block of `len` silent samples.
    pub fn silent(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0; len], sample_rate)
    }

    /// Returns the duration of this block in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the block contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Replace the contents with `src`, reusing the allocation when the
    /// length is unchanged.
    pub fn copy_from(&mut self, src: &SampleBlock) {
        if self.samples.len() == src.samples.len() {
            self.samples.copy_from_slice(&src.samples);
        } else {
            self.samples.clear();
            self.samples.extend_from_slice(&src.samples);
        }
        self.sample_rate = src.sample_rate;
    }
}
