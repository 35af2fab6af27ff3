use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{SEGMENT_DURATION_SECONDS, SEGMENT_SAFETY_MARGIN};
use crate::error::RecorderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
    Av1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderVendor {
    Auto,
    Nvidia,
    Amd,
    Intel,
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoftwarePreset {
    Ultrafast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
}

impl SoftwarePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoftwarePreset::Ultrafast => "ultrafast",
            SoftwarePreset::Veryfast => "veryfast",
            SoftwarePreset::Faster => "faster",
            SoftwarePreset::Fast => "fast",
            SoftwarePreset::Medium => "medium",
            SoftwarePreset::Slow => "slow",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecorderConfig {
    pub buffer_seconds: u32,
    pub fps: u32,
    pub bitrate_bps: u32,
    pub crf: u32,
    pub preset: SoftwarePreset,
    pub use_hardware_encoding: bool,
    pub codec: VideoCodec,
    pub vendor: EncoderVendor,
    pub save_path: PathBuf,
    pub monitor_index: u32,
    pub record_audio: bool,
    pub record_desktop_audio: bool,
    pub record_microphone: bool,
    pub desktop_volume: f32,
    pub microphone_volume: f32,
    /// Opaque device id from [crate::audio::devices]; `None` picks the default endpoint.
    pub desktop_device_id: Option<String>,
    pub microphone_device_id: Option<String>,
    /// Explicit ffmpeg binary override. `None` resolves via the usual ladder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: 30,
            fps: 60,
            bitrate_bps: 8_000_000,
            crf: 23,
            preset: SoftwarePreset::Faster,
            use_hardware_encoding: true,
            codec: VideoCodec::H264,
            vendor: EncoderVendor::Auto,
            save_path: std::env::temp_dir(),
            monitor_index: 0,
            record_audio: false,
            record_desktop_audio: true,
            record_microphone: false,
            desktop_volume: 1.0,
            microphone_volume: 1.0,
            desktop_device_id: None,
            microphone_device_id: None,
            ffmpeg_path: None,
        }
    }
}

impl RecorderConfig {
    /// Validates ranges and normalizes soft violations. Hard violations are
    /// fatal; the buffer length is clamped with a warning, and an
    /// out-of-range monitor index is handled at capture start (fall back to
    /// primary).
    pub fn validate(&mut self) -> Result<(), RecorderError> {
        if self.buffer_seconds < 5 {
            log::warn!(
                "buffer_seconds {} below minimum; clamping to 5",
                self.buffer_seconds
            );
            self.buffer_seconds = 5;
        }
        if self.buffer_seconds > 300 {
            log::warn!(
                "buffer_seconds {} above maximum; clamping to 300",
                self.buffer_seconds
            );
            self.buffer_seconds = 300;
        }
        if !(15..=144).contains(&self.fps) {
            return Err(RecorderError::Config(format!(
                "fps must be within 15..=144, got {}",
                self.fps
            )));
        }
        if !(500_000..=50_000_000).contains(&self.bitrate_bps) {
            return Err(RecorderError::Config(format!(
                "bitrate_bps must be within 500000..=50000000, got {}",
                self.bitrate_bps
            )));
        }
        if self.crf > 51 {
            return Err(RecorderError::Config(format!(
                "crf must be within 0..=51, got {}",
                self.crf
            )));
        }
        for (name, volume) in [
            ("desktop_volume", self.desktop_volume),
            ("microphone_volume", self.microphone_volume),
        ] {
            if !(0.0..=2.0).contains(&volume) || !volume.is_finite() {
                return Err(RecorderError::Config(format!(
                    "{} must be within 0.0..=2.0, got {}",
                    name, volume
                )));
            }
        }
        if !self.save_path.as_os_str().is_empty() && self.save_path.is_file() {
            return Err(RecorderError::Config(format!(
                "save_path {:?} is a file, expected a directory",
                self.save_path
            )));
        }
        Ok(())
    }

    /// Number of tail segments a snapshot pulls to cover the buffer window.
    pub fn segments_to_keep(&self) -> usize {
        self.buffer_seconds.div_ceil(SEGMENT_DURATION_SECONDS) as usize
    }

    /// Retention keeps this many segments on disk. The margin keeps the
    /// snapshot path clear of the segment currently being written.
    pub fn max_segments_to_keep(&self) -> usize {
        self.segments_to_keep() + SEGMENT_SAFETY_MARGIN as usize
    }

    pub fn desktop_audio_enabled(&self) -> bool {
        self.record_audio && self.record_desktop_audio
    }

    pub fn microphone_enabled(&self) -> bool {
        self.record_audio && self.record_microphone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RecorderConfig::default();
        assert_eq!(config.buffer_seconds, 30);
        assert_eq!(config.fps, 60);
        assert_eq!(config.bitrate_bps, 8_000_000);
        assert_eq!(config.crf, 23);
        assert_eq!(config.codec, VideoCodec::H264);
        assert_eq!(config.vendor, EncoderVendor::Auto);
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let mut config = RecorderConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_clamps_buffer() {
        let mut config = RecorderConfig {
            buffer_seconds: 900,
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.buffer_seconds, 300);

        let mut config = RecorderConfig {
            buffer_seconds: 1,
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.buffer_seconds, 5);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let mut config = RecorderConfig {
            fps: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = RecorderConfig {
            bitrate_bps: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = RecorderConfig {
            crf: 99,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = RecorderConfig {
            microphone_volume: 2.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_segment_math() {
        let config = RecorderConfig {
            buffer_seconds: 30,
            ..Default::default()
        };
        assert_eq!(config.segments_to_keep(), 3);
        assert_eq!(config.max_segments_to_keep(), 5);

        let config = RecorderConfig {
            buffer_seconds: 5,
            ..Default::default()
        };
        assert_eq!(config.segments_to_keep(), 1);
        assert_eq!(config.max_segments_to_keep(), 3);

        let config = RecorderConfig {
            buffer_seconds: 25,
            ..Default::default()
        };
        assert_eq!(config.segments_to_keep(), 3);
    }

    #[test]
    fn test_serialization() {
        let config = RecorderConfig::default();
        let toml = toml::to_string(&config).unwrap();
        let deserialized: RecorderConfig = toml::from_str(&toml).unwrap();

        assert_eq!(config.fps, deserialized.fps);
        assert_eq!(config.codec, deserialized.codec);
        assert_eq!(config.preset, deserialized.preset);
        assert_eq!(config.buffer_seconds, deserialized.buffer_seconds);
    }
}
