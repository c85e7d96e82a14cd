//! Persistent host settings (JSON file).

use std::fs;
use std::path::{Path, PathBuf};

use nullwave_core::{
    audio::config::{DeviceConfig, DEFAULT_SAMPLE_RATE},
    playback::geometry::DEFAULT_SLOTS,
    EngineConfig, DEFAULT_TELEMETRY_PORT,
};
use serde::{Deserialize, Serialize};

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "NULLWAVE_SETTINGS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub sample_rate_hz: u32,
    pub mic_period_ms: u64,
    pub out_period_ms: u64,
    pub amplitude: f32,
    pub ring_slots: usize,
    /// Open the devices but wait for an explicit resume.
    pub start_paused: bool,
    pub telemetry_enabled: bool,
    pub telemetry_port: u16,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            preferred_output_device: None,
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            mic_period_ms: 20,
            out_period_ms: 20,
            amplitude: 1.0,
            ring_slots: DEFAULT_SLOTS,
            start_paused: false,
            telemetry_enabled: false,
            telemetry_port: DEFAULT_TELEMETRY_PORT,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.sample_rate_hz = self.sample_rate_hz.clamp(4_000, 48_000);
        self.mic_period_ms = self.mic_period_ms.clamp(1, 1_000);
        self.out_period_ms = self.out_period_ms.clamp(1, 1_000);
        self.amplitude = if self.amplitude.is_finite() {
            self.amplitude.clamp(0.0, 4.0)
        } else {
            1.0
        };
        self.ring_slots = self.ring_slots.clamp(3, 64);
        if self.telemetry_port == 0 {
            self.telemetry_port = DEFAULT_TELEMETRY_PORT;
        }
        self.preferred_input_device = normalize_device_name(self.preferred_input_device.take());
        self.preferred_output_device = normalize_device_name(self.preferred_output_device.take());
    }

    /// Engine configuration for these settings. The engine always starts
    /// paused; the host resumes it unless `start_paused` is set.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            capture: DeviceConfig::input()
                .with_sample_rate(self.sample_rate_hz)
                .with_endpoint(self.preferred_input_device.clone()),
            playback: DeviceConfig::output()
                .with_sample_rate(self.sample_rate_hz)
                .with_endpoint(self.preferred_output_device.clone()),
            mic_period_ms: self.mic_period_ms,
            out_period_ms: self.out_period_ms,
            amplitude: self.amplitude,
            ring_slots: self.ring_slots,
            start_paused: true,
            ..EngineConfig::default()
        }
    }
}

fn normalize_device_name(raw: Option<String>) -> Option<String> {
    raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Nullwave")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("nullwave")
            .join("settings.json")
    }
}

/// Read settings from `path`, falling back to defaults for a missing or
/// unreadable file.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| match serde_json::from_str::<AppSettings>(&raw) {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::warn!(path = ?path, "ignoring malformed settings file: {e}");
                None
            }
        })
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
