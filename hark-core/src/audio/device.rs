//! Input device enumeration and selection.

use serde::{Deserialize, Serialize};

/// An input device as shown by `--list-devices`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS. Also the id passed
    /// back through `EngineConfig::input_device`.
    pub name: String,
    /// Reported by the host as its default input.
    pub is_default: bool,
    /// Channel count of the device's default input config, if known.
    pub channels: Option<u16>,
    /// Sample rate of the device's default input config, if known.
    pub default_sample_rate: Option<u32>,
    /// Heuristic flag for devices that capture system output instead of a mic.
    pub is_loopback_like: bool,
    /// The device a user should pick when unsure. At most one per list.
    pub is_recommended: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "loopback",
    "monitor of",
    "wave out",
];

/// Best-effort name heuristic for loopback/system-output capture devices.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Order devices for display: default first, loopback devices last, then by name.
pub fn sort_for_display(devices: &mut [DeviceInfo]) {
    devices.sort_by_key(|d| {
        (
            !d.is_default,
            d.is_loopback_like,
            d.name.to_ascii_lowercase(),
        )
    });
}

/// Recommend the default device unless it looks like loopback, else the
/// first microphone-like device in display order.
pub fn mark_recommended(devices: &mut [DeviceInfo]) {
    for device in devices.iter_mut() {
        device.is_recommended = false;
    }
    let pick = devices
        .iter()
        .position(|d| d.is_default && !d.is_loopback_like)
        .or_else(|| devices.iter().position(|d| !d.is_loopback_like));
    if let Some(idx) = pick {
        devices[idx].is_recommended = true;
    }
}

/// Enumerate input devices on the default host, sorted for display.
///
/// Returns an empty `Vec` when compiled without cpal or when enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            return vec![];
        }
    };

    let mut list: Vec<DeviceInfo> = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            let default_config = device.default_input_config().ok();
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                channels: default_config.as_ref().map(|c| c.channels()),
                default_sample_rate: default_config.as_ref().map(|c| c.sample_rate().0),
                is_loopback_like: is_loopback_like_name(&name),
                is_recommended: false,
                name,
            }
        })
        .collect();

    sort_for_display(&mut list);
    mark_recommended(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

/// Resolve an input device: the named one if present, else the system
/// default, else the first input device.
#[cfg(feature = "audio-cpal")]
pub(crate) fn select_input_device(
    host: &cpal::Host,
    preferred_name: Option<&str>,
) -> crate::error::Result<cpal::Device> {
    use crate::error::HarkError;
    use cpal::traits::{DeviceTrait, HostTrait};
    use tracing::warn;

    if let Some(preferred_name) = preferred_name {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == preferred_name).unwrap_or(false))
                {
                    return Ok(device);
                }
                warn!(
                    "preferred input device '{}' not found, falling back",
                    preferred_name
                );
            }
            Err(e) => {
                warn!("failed to list input devices while resolving preference: {e}");
            }
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }

    let mut devices = host
        .input_devices()
        .map_err(|e| HarkError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(HarkError::NoDefaultInputDevice)?;
    warn!("no default input device, falling back to first available input");
    Ok(fallback)
}
