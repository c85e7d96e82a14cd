//! Audio device enumeration and endpoint lookup.

use serde::{Deserialize, Serialize};

use crate::audio::config::Direction;

/// Metadata about an audio endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: Direction,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
}

/// Order devices default-first, then by case-insensitive name.
pub fn sort_devices(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
}

/// List the available endpoints for `direction`.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_devices(direction: Direction) -> Vec<DeviceInfo> {
    use cpal::traits::DeviceTrait;

    let host = cpal::default_host();
    let default_name = default_device(&host, direction).and_then(|d| d.name().ok());

    match devices_for(&host, direction) {
        Ok(devices) => {
            let mut list = devices
                .into_iter()
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("{direction:?} Device {}", idx + 1));
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    DeviceInfo {
                        name,
                        direction,
                        is_default,
                    }
                })
                .collect::<Vec<_>>();
            sort_devices(&mut list);
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate {direction:?} devices: {e}");
            default_name
                .map(|name| {
                    vec![DeviceInfo {
                        name,
                        direction,
                        is_default: true,
                    }]
                })
                .unwrap_or_default()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices(_direction: Direction) -> Vec<DeviceInfo> {
    vec![]
}

/// Resolve `preferred` to a device, falling back to the default endpoint
/// and then to the first available one.
#[cfg(feature = "audio-cpal")]
pub(crate) fn select_device(
    host: &cpal::Host,
    direction: Direction,
    preferred: Option<&str>,
) -> crate::error::Result<cpal::Device> {
    use cpal::traits::DeviceTrait;

    use crate::error::NullwaveError;

    if let Some(preferred) = preferred {
        match devices_for(host, direction) {
            Ok(devices) => {
                if let Some(device) = devices
                    .into_iter()
                    .find(|d| d.name().map(|n| n == preferred).unwrap_or(false))
                {
                    return Ok(device);
                }
                tracing::warn!("preferred {direction:?} device '{preferred}' not found, falling back");
            }
            Err(e) => tracing::warn!("failed to list devices while resolving preference: {e}"),
        }
    }

    if let Some(device) = default_device(host, direction) {
        return Ok(device);
    }

    let devices =
        devices_for(host, direction).map_err(|e| NullwaveError::AudioDevice(e.to_string()))?;
    let fallback = devices.into_iter().next().ok_or(NullwaveError::NoDevice)?;
    tracing::warn!("no default {direction:?} device, falling back to first available");
    Ok(fallback)
}

#[cfg(feature = "audio-cpal")]
fn devices_for(
    host: &cpal::Host,
    direction: Direction,
) -> Result<Vec<cpal::Device>, cpal::DevicesError> {
    use cpal::traits::HostTrait;

    Ok(match direction {
        Direction::Input => host.input_devices()?.collect(),
        Direction::Output => host.output_devices()?.collect(),
    })
}

#[cfg(feature = "audio-cpal")]
fn default_device(host: &cpal::Host, direction: Direction) -> Option<cpal::Device> {
    use cpal::traits::HostTrait;

    match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            direction: Direction::Output,
            is_default,
        }
    }

    #[test]
    fn default_device_sorts_first() {
        let mut list = vec![info("b speakers", false), info("Z headphones", true), info("A dock", false)];
        sort_devices(&mut list);
        let names: Vec<_> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Z headphones", "A dock", "b speakers"]);
    }

    #[test]
    fn device_info_serializes_camel_case() {
        let json = serde_json::to_value(info("dock", true)).expect("serialize");
        assert_eq!(json["isDefault"], true);
        assert_eq!(json["direction"], "output");
    }
}
