use serde::Serialize;

use crate::error::RecorderError;

#[derive(Debug, Clone, Serialize)]
pub struct MonitorInfo {
    pub index: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub is_primary: bool,
}

/// Outputs of the primary adapter, in DXGI enumeration order.
#[cfg(windows)]
pub fn enumerate_monitors() -> Result<Vec<MonitorInfo>, RecorderError> {
    use windows::Win32::Graphics::Dxgi::{CreateDXGIFactory1, IDXGIFactory1};

    unsafe {
        let factory: IDXGIFactory1 = CreateDXGIFactory1()
            .map_err(|e| RecorderError::Capture(format!("failed to create DXGI factory: {}", e)))?;
        let adapter = factory
            .EnumAdapters1(0)
            .map_err(|e| RecorderError::Capture(format!("no graphics adapter: {}", e)))?;

        let mut monitors = Vec::new();
        let mut index = 0u32;
        while let Ok(output) = adapter.EnumOutputs(index) {
            let desc = output
                .GetDesc()
                .map_err(|e| RecorderError::Capture(e.to_string()))?;
            let name_len = desc
                .DeviceName
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(desc.DeviceName.len());
            let rect = desc.DesktopCoordinates;
            monitors.push(MonitorInfo {
                index,
                name: String::from_utf16_lossy(&desc.DeviceName[..name_len]),
                width: (rect.right - rect.left).max(0) as u32,
                height: (rect.bottom - rect.top).max(0) as u32,
                is_primary: rect.left == 0 && rect.top == 0,
            });
            index += 1;
        }
        Ok(monitors)
    }
}

#[cfg(not(windows))]
pub fn enumerate_monitors() -> Result<Vec<MonitorInfo>, RecorderError> {
    Ok(Vec::new())
}

/// Out-of-range indices fall back to the primary monitor with a warning.
pub fn clamp_monitor_index(requested: u32, available: usize) -> u32 {
    if (requested as usize) < available {
        requested
    } else {
        log::warn!(
            "monitor index {} out of range ({} available); falling back to primary",
            requested,
            available
        );
        0
    }
}
