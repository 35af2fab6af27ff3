use crate::config::RecorderConfig;
use crate::constants::{
    INPUT_PIXEL_FORMAT, OUTPUT_PIXEL_FORMAT, SEGMENT_DURATION_SECONDS, SEGMENT_FORMAT_MKV,
    SEGMENT_MUXER,
};
use crate::ffmpeg::encoder;

/// Builds the argument list for the continuous capture-encode invocation:
/// raw BGRA frames on stdin, monotonic segments on disk.
#[derive(Debug, Clone)]
pub struct CaptureCommandBuilder {
    width: u32,
    height: u32,
    framerate: u32,
    video_codec: String,
    encoder_args: Vec<String>,
    segment_time: u32,
    output_template: String,
}

impl CaptureCommandBuilder {
    pub fn new(config: &RecorderConfig, width: u32, height: u32, output_template: String) -> Self {
        Self {
            width,
            height,
            framerate: config.fps,
            video_codec: encoder::encoder_name(config).to_string(),
            encoder_args: encoder::encoder_args(config),
            segment_time: SEGMENT_DURATION_SECONDS,
            output_template,
        }
    }

    pub fn with_segment_time(mut self, seconds: u32) -> Self {
        self.segment_time = seconds;
        self
    }

    pub fn build(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "warning".to_string(),
            "-stats".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            INPUT_PIXEL_FORMAT.to_string(),
            "-video_size".to_string(),
            format!("{}x{}", self.width, self.height),
            "-framerate".to_string(),
            self.framerate.to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-c:v".to_string(),
            self.video_codec.clone(),
        ];

        args.extend(self.encoder_args.iter().cloned());

        args.extend(vec![
            "-pix_fmt".to_string(),
            OUTPUT_PIXEL_FORMAT.to_string(),
            "-f".to_string(),
            SEGMENT_MUXER.to_string(),
            "-segment_time".to_string(),
            self.segment_time.to_string(),
            "-segment_format".to_string(),
            SEGMENT_FORMAT_MKV.to_string(),
            "-reset_timestamps".to_string(),
            "1".to_string(),
            self.output_template.clone(),
        ]);

        args
    }
}
