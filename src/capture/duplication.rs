//! DXGI desktop duplication frame source.
//!
//! Frames are acquired with a zero timeout (a miss is the common case, not
//! an error), copied GPU-side into a CPU-readable staging texture, and
//! memcpy'd row by row into the caller's BGRA buffer.

use std::time::Duration;

use windows::core::ComInterface;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_READ, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    IDXGIDevice, IDXGIOutput1, IDXGIOutputDuplication, IDXGIResource, DXGI_ERROR_ACCESS_LOST,
    DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO,
};

use crate::capture::monitors::{clamp_monitor_index, enumerate_monitors};
use crate::capture::FrameSource;
use crate::constants::{BYTES_PER_PIXEL, CAPTURE_RECOVERY_DELAY_MS};
use crate::error::RecorderError;

pub struct DesktopDuplicator {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    duplication: Option<IDXGIOutputDuplication>,
    staging: ID3D11Texture2D,
    width: u32,
    height: u32,
    monitor_index: u32,
}

impl DesktopDuplicator {
    pub fn new(monitor_index: u32) -> Result<Self, RecorderError> {
        let monitors = enumerate_monitors()?;
        if monitors.is_empty() {
            return Err(RecorderError::Capture("no monitors available".to_string()));
        }
        let index = clamp_monitor_index(monitor_index, monitors.len());
        let monitor = &monitors[index as usize];
        let (width, height) = (monitor.width, monitor.height);

        unsafe {
            let mut device: Option<ID3D11Device> = None;
            let mut context: Option<ID3D11DeviceContext> = None;
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
            .map_err(|e| RecorderError::Capture(format!("D3D11CreateDevice failed: {}", e)))?;

            let device = device
                .ok_or_else(|| RecorderError::Capture("D3D11 device missing".to_string()))?;
            let context = context
                .ok_or_else(|| RecorderError::Capture("D3D11 context missing".to_string()))?;

            let staging = create_staging_texture(&device, width, height)?;
            let duplication = duplicate_output(&device, index)?;

            log::info!(
                "desktop duplication active on {} ({}x{})",
                monitor.name,
                width,
                height
            );

            Ok(Self {
                device,
                context,
                duplication: Some(duplication),
                staging,
                width,
                height,
                monitor_index: index,
            })
        }
    }
}

fn duplicate_output(
    device: &ID3D11Device,
    monitor_index: u32,
) -> Result<IDXGIOutputDuplication, RecorderError> {
    unsafe {
        let dxgi_device: IDXGIDevice = device
            .cast()
            .map_err(|e| RecorderError::Capture(e.to_string()))?;
        let adapter = dxgi_device
            .GetAdapter()
            .map_err(|e| RecorderError::Capture(e.to_string()))?;
        let output = adapter
            .EnumOutputs(monitor_index)
            .map_err(|e| RecorderError::Capture(format!("monitor {} gone: {}", monitor_index, e)))?;
        let output1: IDXGIOutput1 = output
            .cast()
            .map_err(|e| RecorderError::Capture(e.to_string()))?;
        output1
            .DuplicateOutput(device)
            .map_err(|e| RecorderError::Capture(format!("DuplicateOutput failed: {}", e)))
    }
}

fn create_staging_texture(
    device: &ID3D11Device,
    width: u32,
    height: u32,
) -> Result<ID3D11Texture2D, RecorderError> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_STAGING,
        BindFlags: 0,
        CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
        MiscFlags: 0,
    };
    unsafe {
        let mut texture: Option<ID3D11Texture2D> = None;
        device
            .CreateTexture2D(&desc, None, Some(&mut texture))
            .map_err(|e| RecorderError::Capture(format!("staging texture failed: {}", e)))?;
        texture.ok_or_else(|| RecorderError::Capture("staging texture missing".to_string()))
    }
}

impl FrameSource for DesktopDuplicator {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn try_next_frame(&mut self, dest: &mut [u8]) -> Result<bool, String> {
        let row_bytes = self.width as usize * BYTES_PER_PIXEL;
        if dest.len() < row_bytes * self.height as usize {
            return Err(format!(
                "frame buffer too small: {} < {}",
                dest.len(),
                row_bytes * self.height as usize
            ));
        }
        let Some(duplication) = self.duplication.as_ref() else {
            return Err("duplication not active".to_string());
        };

        unsafe {
            let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource: Option<IDXGIResource> = None;
            match duplication.AcquireNextFrame(0, &mut frame_info, &mut resource) {
                Ok(()) => {}
                Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(false),
                Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => {
                    return Err(format!("duplication access lost: {}", e))
                }
                Err(e) => return Err(format!("AcquireNextFrame failed: {}", e)),
            }

            // A frame with no present is metadata only (cursor movement).
            let fresh_image = frame_info.LastPresentTime != 0;
            let copy_result: Result<(), String> = if fresh_image {
                resource
                    .ok_or_else(|| "acquired frame without resource".to_string())
                    .and_then(|resource| {
                        resource.cast::<ID3D11Texture2D>().map_err(|e| e.to_string())
                    })
                    .map(|texture| self.context.CopyResource(&self.staging, &texture))
            } else {
                Ok(())
            };
            // The duplication handle must be released even when the copy
            // failed, or the next acquire returns INVALID_CALL forever.
            let _ = duplication.ReleaseFrame();
            copy_result?;

            if !fresh_image {
                return Ok(false);
            }

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            self.context
                .Map(&self.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .map_err(|e| format!("staging map failed: {}", e))?;
            let src = mapped.pData as *const u8;
            for row in 0..self.height as usize {
                std::ptr::copy_nonoverlapping(
                    src.add(row * mapped.RowPitch as usize),
                    dest[row * row_bytes..].as_mut_ptr(),
                    row_bytes,
                );
            }
            self.context.Unmap(&self.staging, 0);
        }
        Ok(true)
    }

    /// Releases the duplication handle, waits, and reacquires the same
    /// monitor. The device is rebuilt only when reacquisition on the
    /// existing device fails (device removed).
    fn recover(&mut self) -> Result<(), String> {
        self.duplication = None;
        std::thread::sleep(Duration::from_millis(CAPTURE_RECOVERY_DELAY_MS));

        match duplicate_output(&self.device, self.monitor_index) {
            Ok(duplication) => {
                self.duplication = Some(duplication);
                Ok(())
            }
            Err(first_err) => {
                log::warn!("reacquire failed ({}); rebuilding device", first_err);
                let rebuilt =
                    DesktopDuplicator::new(self.monitor_index).map_err(|e| e.to_string())?;
                *self = rebuilt;
                Ok(())
            }
        }
    }
}
