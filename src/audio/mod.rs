//! Timestamped WAV sidecar capture.
//!
//! Up to two streams record in parallel with the video segments: desktop
//! playback via WASAPI loopback (an input stream built on a render
//! endpoint, at its native mix format) and the microphone at 48 kHz mono.
//! Each sidecar notes its start offset on the recorder's tick clock; the
//! snapshot path uses those offsets to align audio to the video tail.

pub mod devices;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use hound::{WavSpec, WavWriter};

use crate::clock::RecorderClock;
use crate::config::RecorderConfig;
use crate::constants::{AUDIO_FILE_BUFFER_BYTES, MIC_CHANNELS, MIC_SAMPLE_RATE, VOLUME_EPSILON};
use crate::error::RecorderError;
use crate::events::{ErrorSource, EventBus};

type SharedWriter = Arc<Mutex<Option<WavWriter<BufWriter<File>>>>>;

// cpal streams are not Send. They are created here, kept alive, and
// dropped from the facade thread; nothing calls into them concurrently.
struct StreamHolder(#[allow(dead_code)] cpal::Stream);
unsafe impl Send for StreamHolder {}

struct SidecarStream {
    _stream: StreamHolder,
    writer: SharedWriter,
    path: PathBuf,
    start_ticks: u64,
}

/// Snapshot of one sidecar for the mux path.
#[derive(Debug, Clone)]
pub struct SidecarInfo {
    pub path: PathBuf,
    pub start_offset_ms: u64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SidecarState {
    pub desktop: Option<SidecarInfo>,
    pub microphone: Option<SidecarInfo>,
}

pub struct AudioSidecarWriter {
    desktop: Option<SidecarStream>,
    microphone: Option<SidecarStream>,
    clock: Arc<RecorderClock>,
}

impl AudioSidecarWriter {
    /// Starts the enabled sidecars. A device that fails to open is reported
    /// as a non-fatal error event and skipped; video continues without it.
    /// Returns `None` when nothing could be (or had to be) started.
    pub(crate) fn start(
        config: &RecorderConfig,
        clock: Arc<RecorderClock>,
        desktop_path: PathBuf,
        microphone_path: PathBuf,
        events: &EventBus,
    ) -> Option<Self> {
        let mut writer = Self {
            desktop: None,
            microphone: None,
            clock,
        };

        if config.desktop_audio_enabled() {
            match start_loopback(
                config.desktop_device_id.as_deref(),
                config.desktop_volume,
                desktop_path,
                &writer.clock,
            ) {
                Ok(stream) => writer.desktop = Some(stream),
                Err(e) => events.error(
                    ErrorSource::Audio,
                    format!("desktop audio unavailable: {}", e),
                    false,
                ),
            }
        }

        if config.microphone_enabled() {
            match start_microphone(
                config.microphone_device_id.as_deref(),
                config.microphone_volume,
                microphone_path,
                &writer.clock,
            ) {
                Ok(stream) => writer.microphone = Some(stream),
                Err(e) => events.error(
                    ErrorSource::Audio,
                    format!("microphone unavailable: {}", e),
                    false,
                ),
            }
        }

        if writer.desktop.is_none() && writer.microphone.is_none() {
            None
        } else {
            Some(writer)
        }
    }

    pub fn state(&self) -> SidecarState {
        let now = self.clock.ticks();
        let info = |s: &SidecarStream| SidecarInfo {
            path: s.path.clone(),
            start_offset_ms: RecorderClock::ticks_to_millis(s.start_ticks),
            elapsed_secs: RecorderClock::ticks_to_secs(now.saturating_sub(s.start_ticks)),
        };
        SidecarState {
            desktop: self.desktop.as_ref().map(info),
            microphone: self.microphone.as_ref().map(info),
        }
    }

    /// Stops capture and finalizes the WAV headers.
    pub fn stop(mut self) {
        for sidecar in [self.desktop.take(), self.microphone.take()]
            .into_iter()
            .flatten()
        {
            // Dropping the stream stops the callbacks before the writer is
            // taken out from under them.
            drop(sidecar._stream);
            let writer = sidecar.writer.lock().ok().and_then(|mut w| w.take());
            if let Some(writer) = writer {
                if let Err(e) = writer.finalize() {
                    log::warn!("failed to finalize {:?}: {}", sidecar.path, e);
                }
            }
        }
    }
}

fn start_loopback(
    device_id: Option<&str>,
    volume: f32,
    path: PathBuf,
    clock: &RecorderClock,
) -> Result<SidecarStream, RecorderError> {
    let host = cpal::default_host();
    let device = if let Some(id) = device_id {
        host.output_devices()
            .map_err(|e| RecorderError::Audio(e.to_string()))?
            .find(|d| d.name().unwrap_or_default() == id)
            .ok_or_else(|| RecorderError::Audio(format!("loopback device '{}' not found", id)))?
    } else {
        host.default_output_device()
            .ok_or_else(|| RecorderError::Audio("no output device available".to_string()))?
    };
    log::info!(
        "Desktop audio device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    // Loopback runs at the endpoint's native mix format.
    let supported = device
        .default_output_config()
        .map_err(|e| RecorderError::Audio(e.to_string()))?;
    open_sidecar(&device, supported, volume, path, clock)
}

fn start_microphone(
    device_id: Option<&str>,
    volume: f32,
    path: PathBuf,
    clock: &RecorderClock,
) -> Result<SidecarStream, RecorderError> {
    let host = cpal::default_host();
    let device = if let Some(id) = device_id {
        host.input_devices()
            .map_err(|e| RecorderError::Audio(e.to_string()))?
            .find(|d| d.name().unwrap_or_default() == id)
            .ok_or_else(|| RecorderError::Audio(format!("microphone '{}' not found", id)))?
    } else {
        host.default_input_device()
            .ok_or_else(|| RecorderError::Audio("no input device available".to_string()))?
    };
    log::info!(
        "Microphone device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = select_mic_config(&device)?;
    open_sidecar(&device, supported, volume, path, clock)
}

/// Prefers 48 kHz / 16-bit / mono; falls back to the device default.
fn select_mic_config(device: &cpal::Device) -> Result<cpal::SupportedStreamConfig, RecorderError> {
    if let Ok(configs) = device.supported_input_configs() {
        for config in configs {
            if config.channels() == MIC_CHANNELS
                && config.sample_format() == SampleFormat::I16
                && config.min_sample_rate().0 <= MIC_SAMPLE_RATE
                && config.max_sample_rate().0 >= MIC_SAMPLE_RATE
            {
                return Ok(config.with_sample_rate(cpal::SampleRate(MIC_SAMPLE_RATE)));
            }
        }
    }
    log::warn!("microphone does not offer 48kHz/16-bit/mono; using device default");
    device
        .default_input_config()
        .map_err(|e| RecorderError::Audio(e.to_string()))
}

fn open_sidecar(
    device: &cpal::Device,
    supported: cpal::SupportedStreamConfig,
    volume: f32,
    path: PathBuf,
    clock: &RecorderClock,
) -> Result<SidecarStream, RecorderError> {
    let sample_format = supported.sample_format();
    let spec = WavSpec {
        channels: supported.channels(),
        sample_rate: supported.sample_rate().0,
        bits_per_sample: match sample_format {
            SampleFormat::F32 => 32,
            SampleFormat::I16 => 16,
            other => {
                return Err(RecorderError::Audio(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        },
        sample_format: match sample_format {
            SampleFormat::F32 => hound::SampleFormat::Float,
            _ => hound::SampleFormat::Int,
        },
    };
    log::info!(
        "Audio sidecar {:?}: {} Hz, {} ch, {:?}",
        path.file_name().unwrap_or_default(),
        spec.sample_rate,
        spec.channels,
        sample_format
    );

    let file = File::create(&path)?;
    let writer = WavWriter::new(BufWriter::with_capacity(AUDIO_FILE_BUFFER_BYTES, file), spec)
        .map_err(|e| RecorderError::Audio(e.to_string()))?;
    let writer: SharedWriter = Arc::new(Mutex::new(Some(writer)));

    let config: cpal::StreamConfig = supported.into();
    let scale = if (volume - 1.0).abs() > VOLUME_EPSILON {
        Some(volume)
    } else {
        None
    };
    let err_fn = {
        let path = path.clone();
        move |err| log::error!("audio stream error on {:?}: {}", path, err)
    };

    // The start offset is read immediately before the stream starts so the
    // sync math sees the tightest possible bound.
    let start_ticks = clock.ticks();

    let stream = match sample_format {
        SampleFormat::F32 => {
            let writer = writer.clone();
            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &_| {
                        if let Ok(mut guard) = writer.lock() {
                            if let Some(w) = guard.as_mut() {
                                let mut failed = false;
                                for &sample in data {
                                    let sample = match scale {
                                        Some(v) => (sample * v).clamp(-1.0, 1.0),
                                        None => sample,
                                    };
                                    failed |= w.write_sample(sample).is_err();
                                }
                                if failed {
                                    log::warn!("dropped audio chunk (write failed)");
                                }
                            }
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| RecorderError::Audio(e.to_string()))?
        }
        SampleFormat::I16 => {
            let writer = writer.clone();
            device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &_| {
                        if let Ok(mut guard) = writer.lock() {
                            if let Some(w) = guard.as_mut() {
                                let mut failed = false;
                                for &sample in data {
                                    let sample = match scale {
                                        Some(v) => scale_i16(sample, v),
                                        None => sample,
                                    };
                                    failed |= w.write_sample(sample).is_err();
                                }
                                if failed {
                                    log::warn!("dropped audio chunk (write failed)");
                                }
                            }
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| RecorderError::Audio(e.to_string()))?
        }
        other => {
            return Err(RecorderError::Audio(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| RecorderError::Audio(e.to_string()))?;

    Ok(SidecarStream {
        _stream: StreamHolder(stream),
        writer,
        path,
        start_ticks,
    })
}

/// Saturating 16-bit gain.
fn scale_i16(sample: i16, volume: f32) -> i16 {
    (sample as f32 * volume).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_i16_saturates() {
        assert_eq!(scale_i16(i16::MAX, 2.0), i16::MAX);
        assert_eq!(scale_i16(i16::MIN, 2.0), i16::MIN);
        assert_eq!(scale_i16(1000, 0.5), 500);
        assert_eq!(scale_i16(-1000, 1.5), -1500);
    }

    #[test]
    fn test_sidecar_state_offsets() {
        // Stream plumbing needs real devices; the offset math does not.
        let clock = Arc::new(RecorderClock::new());
        let writer = AudioSidecarWriter {
            desktop: None,
            microphone: None,
            clock,
        };
        let state = writer.state();
        assert!(state.desktop.is_none());
        assert!(state.microphone.is_none());
    }
}
