use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::RecorderError;

/// `(display_name, opaque_id)` pair for the settings layer. cpal addresses
/// devices by name, so the id is the name; callers must treat it as opaque.
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub id: String,
}

/// Render-side endpoints usable for WASAPI loopback capture.
pub fn list_loopback_devices() -> Result<Vec<AudioDeviceInfo>, RecorderError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| RecorderError::Audio(e.to_string()))?;
    Ok(collect_names(devices))
}

/// Capture-side endpoints (microphones).
pub fn list_microphone_devices() -> Result<Vec<AudioDeviceInfo>, RecorderError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| RecorderError::Audio(e.to_string()))?;
    Ok(collect_names(devices))
}

fn collect_names(devices: impl Iterator<Item = cpal::Device>) -> Vec<AudioDeviceInfo> {
    let mut result = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            result.push(AudioDeviceInfo {
                id: name.clone(),
                name,
            });
        }
    }
    result
}
