//! Device configuration profiles.

use serde::{Deserialize, Serialize};

/// Default sampling rate for both directions (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 8_000;

/// Floor applied to every platform-suggested buffer size (bytes).
pub const MIN_BUFFER_BYTES: usize = 1024;

/// Endpoint name used by the input profile when none is configured.
pub const DEFAULT_INPUT_ENDPOINT: &str = "mic";

/// Which side of the pipeline a configuration describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// Parameters fixed at device-open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub direction: Direction,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Source (input) or sink (output) identifier. `None` lets the backend
    /// pick its default endpoint.
    pub endpoint: Option<String>,
}

impl DeviceConfig {
    /// Mono 16-bit microphone profile.
    pub fn input() -> Self {
        Self {
            direction: Direction::Input,
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            channels: 1,
            bits_per_sample: 16,
            endpoint: Some(DEFAULT_INPUT_ENDPOINT.to_string()),
        }
    }

    /// Mono 16-bit playback profile. Output has no fixed endpoint.
    pub fn output() -> Self {
        Self {
            direction: Direction::Output,
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            channels: 1,
            bits_per_sample: 16,
            endpoint: None,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate_hz: u32) -> Self {
        self.sample_rate_hz = sample_rate_hz;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Bytes occupied by one frame (all channels of one sample instant).
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8).max(1)
    }

    /// Bytes of audio produced per second at this configuration.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate_hz as usize * self.frame_bytes()
    }

    /// Endpoint name for matching against backend device names, treating
    /// the generic microphone alias as "use the default".
    pub fn named_endpoint(&self) -> Option<&str> {
        self.endpoint
            .as_deref()
            .filter(|name| !name.is_empty() && *name != DEFAULT_INPUT_ENDPOINT)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::input()
    }
}

/// Apply the buffer-size floor to a platform suggestion.
///
/// A missing or zero suggestion yields the floor. The result is rounded up
/// to a whole frame.
pub fn suggested_buffer_bytes(platform_min: Option<usize>, config: &DeviceConfig) -> usize {
    let size = platform_min.unwrap_or(0).max(MIN_BUFFER_BYTES);
    let frame = config.frame_bytes().max(1);
    size.div_ceil(frame) * frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_and_output_profiles_differ_in_endpoint() {
        let input = DeviceConfig::input();
        let output = DeviceConfig::output();
        assert_eq!(input.direction, Direction::Input);
        assert_eq!(output.direction, Direction::Output);
        assert_eq!(input.endpoint.as_deref(), Some(DEFAULT_INPUT_ENDPOINT));
        assert!(output.endpoint.is_none());
        assert_eq!(input.sample_rate_hz, output.sample_rate_hz);
        assert_eq!(input.bytes_per_second(), 16_000);
    }

    #[test]
    fn buffer_floor_is_1024_bytes() {
        let cfg = DeviceConfig::input();
        assert_eq!(suggested_buffer_bytes(None, &cfg), 1024);
        assert_eq!(suggested_buffer_bytes(Some(0), &cfg), 1024);
        assert_eq!(suggested_buffer_bytes(Some(640), &cfg), 1024);
        assert_eq!(suggested_buffer_bytes(Some(4096), &cfg), 4096);
    }

    #[test]
    fn buffer_size_rounds_up_to_whole_frames() {
        let mut cfg = DeviceConfig::output();
        cfg.channels = 3;
        assert_eq!(suggested_buffer_bytes(Some(1025), &cfg) % 6, 0);
        assert!(suggested_buffer_bytes(Some(1025), &cfg) >= 1025);
    }

    #[test]
    fn default_mic_alias_is_not_a_named_endpoint() {
        assert!(DeviceConfig::input().named_endpoint().is_none());
        let named = DeviceConfig::input().with_endpoint(Some("USB Mic".into()));
        assert_eq!(named.named_endpoint(), Some("USB Mic"));
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(DeviceConfig::output()).expect("serialize config");
        assert_eq!(json["direction"], "output");
        assert_eq!(json["sampleRateHz"], 8000);
        assert_eq!(json["bitsPerSample"], 16);
        assert!(json["endpoint"].is_null());
    }
}
