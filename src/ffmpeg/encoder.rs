//! Encoder selection and per-encoder rate-control argument shapes.
//!
//! Capability probing is the host application's business; `Auto` therefore
//! resolves to the software encoder, and hardware variants are used only
//! when the caller names a vendor explicitly.

use crate::config::{EncoderVendor, RecorderConfig, VideoCodec};
use crate::ffmpeg::utils::format_bitrate;

/// Maps the configured codec and vendor onto an ffmpeg encoder name.
/// Combinations without a hardware implementation fall back to software.
pub fn encoder_name(config: &RecorderConfig) -> &'static str {
    let vendor = effective_vendor(config);
    match (config.codec, vendor) {
        (VideoCodec::H264, EncoderVendor::Nvidia) => "h264_nvenc",
        (VideoCodec::H264, EncoderVendor::Amd) => "h264_amf",
        (VideoCodec::H264, EncoderVendor::Intel) => "h264_qsv",
        (VideoCodec::H264, _) => "libx264",

        (VideoCodec::H265, EncoderVendor::Nvidia) => "hevc_nvenc",
        (VideoCodec::H265, EncoderVendor::Amd) => "hevc_amf",
        (VideoCodec::H265, EncoderVendor::Intel) => "hevc_qsv",
        (VideoCodec::H265, _) => "libx265",

        (VideoCodec::Vp9, EncoderVendor::Intel) => "vp9_qsv",
        (VideoCodec::Vp9, _) => "libvpx-vp9",

        (VideoCodec::Av1, EncoderVendor::Nvidia) => "av1_nvenc",
        (VideoCodec::Av1, EncoderVendor::Amd) => "av1_amf",
        (VideoCodec::Av1, EncoderVendor::Intel) => "av1_qsv",
        (VideoCodec::Av1, _) => "libaom-av1",
    }
}

fn effective_vendor(config: &RecorderConfig) -> EncoderVendor {
    if !config.use_hardware_encoding {
        return EncoderVendor::Software;
    }
    match config.vendor {
        EncoderVendor::Auto => {
            log::info!("encoder vendor 'auto' without probing resolves to software");
            EncoderVendor::Software
        }
        // VP9 has no NVIDIA/AMD encoder in ffmpeg.
        EncoderVendor::Nvidia | EncoderVendor::Amd if config.codec == VideoCodec::Vp9 => {
            log::warn!(
                "{:?} has no VP9 hardware encoder; falling back to libvpx-vp9",
                config.vendor
            );
            EncoderVendor::Software
        }
        vendor => vendor,
    }
}

/// Rate-control and quality arguments for the chosen encoder.
/// All variants share the `bitrate / 2x / 2x` VBR bounds.
pub fn encoder_args(config: &RecorderConfig) -> Vec<String> {
    let bitrate = format_bitrate(config.bitrate_bps);
    let maxrate = format_bitrate(config.bitrate_bps.saturating_mul(2));
    let rate_bounds = |args: &mut Vec<String>| {
        args.extend([
            "-b:v".into(),
            bitrate.clone(),
            "-maxrate".into(),
            maxrate.clone(),
            "-bufsize".into(),
            maxrate.clone(),
        ]);
    };

    let mut args: Vec<String> = Vec::new();
    match encoder_name(config) {
        "h264_nvenc" | "hevc_nvenc" | "av1_nvenc" => {
            args.extend(["-preset".into(), "p4".into(), "-rc".into(), "vbr".into()]);
            rate_bounds(&mut args);
        }
        "h264_amf" | "hevc_amf" | "av1_amf" => {
            args.extend(["-quality".into(), "balanced".into()]);
            rate_bounds(&mut args);
        }
        "h264_qsv" | "hevc_qsv" | "vp9_qsv" | "av1_qsv" => {
            args.extend(["-preset".into(), "faster".into()]);
            rate_bounds(&mut args);
        }
        "libvpx-vp9" => {
            args.extend([
                "-crf".into(),
                config.crf.to_string(),
                "-deadline".into(),
                "realtime".into(),
                "-cpu-used".into(),
                "8".into(),
                "-row-mt".into(),
                "1".into(),
            ]);
            rate_bounds(&mut args);
        }
        "libaom-av1" => {
            args.extend([
                "-crf".into(),
                config.crf.to_string(),
                "-cpu-used".into(),
                "8".into(),
            ]);
            rate_bounds(&mut args);
        }
        // libx264 / libx265
        _ => {
            args.extend([
                "-preset".into(),
                config.preset.as_str().into(),
                "-crf".into(),
                config.crf.to_string(),
            ]);
            rate_bounds(&mut args);
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoftwarePreset;

    fn config(codec: VideoCodec, vendor: EncoderVendor) -> RecorderConfig {
        RecorderConfig {
            codec,
            vendor,
            use_hardware_encoding: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_encoder_names() {
        assert_eq!(
            encoder_name(&config(VideoCodec::H264, EncoderVendor::Nvidia)),
            "h264_nvenc"
        );
        assert_eq!(
            encoder_name(&config(VideoCodec::H265, EncoderVendor::Intel)),
            "hevc_qsv"
        );
        assert_eq!(
            encoder_name(&config(VideoCodec::Av1, EncoderVendor::Amd)),
            "av1_amf"
        );
        assert_eq!(
            encoder_name(&config(VideoCodec::H264, EncoderVendor::Software)),
            "libx264"
        );
    }

    #[test]
    fn test_auto_resolves_to_software() {
        assert_eq!(
            encoder_name(&config(VideoCodec::H264, EncoderVendor::Auto)),
            "libx264"
        );
    }

    #[test]
    fn test_hardware_disabled_overrides_vendor() {
        let mut cfg = config(VideoCodec::H265, EncoderVendor::Nvidia);
        cfg.use_hardware_encoding = false;
        assert_eq!(encoder_name(&cfg), "libx265");
    }

    #[test]
    fn test_vp9_hardware_fallback() {
        assert_eq!(
            encoder_name(&config(VideoCodec::Vp9, EncoderVendor::Nvidia)),
            "libvpx-vp9"
        );
        assert_eq!(
            encoder_name(&config(VideoCodec::Vp9, EncoderVendor::Intel)),
            "vp9_qsv"
        );
    }

    #[test]
    fn test_nvenc_args_shape() {
        let args = encoder_args(&config(VideoCodec::H264, EncoderVendor::Nvidia));
        assert_eq!(args[0], "-preset");
        assert_eq!(args[1], "p4");
        assert_eq!(args[2], "-rc");
        assert_eq!(args[3], "vbr");
        assert!(args.contains(&"-maxrate".to_string()));
        assert!(args.contains(&"16M".to_string()));
    }

    #[test]
    fn test_software_args_use_preset_and_crf() {
        let mut cfg = config(VideoCodec::H264, EncoderVendor::Software);
        cfg.preset = SoftwarePreset::Medium;
        cfg.crf = 18;
        let args = encoder_args(&cfg);
        assert_eq!(args[0], "-preset");
        assert_eq!(args[1], "medium");
        assert_eq!(args[2], "-crf");
        assert_eq!(args[3], "18");
    }

    #[test]
    fn test_vp9_realtime_flags() {
        let args = encoder_args(&config(VideoCodec::Vp9, EncoderVendor::Software));
        assert!(args.contains(&"-deadline".to_string()));
        assert!(args.contains(&"realtime".to_string()));
        assert!(args.contains(&"-row-mt".to_string()));
    }
}
