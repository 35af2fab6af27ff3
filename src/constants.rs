// Frame pipeline
pub const BYTES_PER_PIXEL: usize = 4; // BGRA
pub const FRAME_CHANNEL_CAPACITY: usize = 3;
pub const MAX_POOL_SIZE: usize = 8;
pub const POOL_WARMUP_BUFFERS: usize = 4;

// Capture pacing
pub const TICKS_PER_SECOND: u64 = 1_000_000;
pub const PACING_SLEEP_SLACK_MS: u64 = 2;
pub const PACING_REBASE_INTERVALS: u64 = 5;
pub const REPUBLISH_MISS_LIMIT: u32 = 2;
pub const MAX_CONSECUTIVE_DROPS_BEFORE_RECOVERY: u32 = 10;
pub const MAX_RECOVERY_ATTEMPTS: u32 = 3;
pub const CAPTURE_RECOVERY_DELAY_MS: u64 = 100;
pub const CAPTURE_ERROR_BACKOFF_MS: u64 = 100;
pub const STATS_INTERVAL_FRAMES_PER_FPS: u64 = 10;

// Segments
pub const SEGMENT_DURATION_SECONDS: u32 = 10;
pub const SEGMENT_SAFETY_MARGIN: u32 = 2;
pub const SEGMENT_EXTENSION: &str = "mkv";
pub const RETENTION_INTERVAL_MS: u64 = 2_000;

// Audio
pub const MIC_SAMPLE_RATE: u32 = 48_000;
pub const MIC_CHANNELS: u16 = 1;
pub const AUDIO_FILE_BUFFER_BYTES: usize = 64 * 1024;
pub const AUDIO_CODEC: &str = "aac";
pub const AUDIO_BITRATE: &str = "192k";
pub const VOLUME_EPSILON: f32 = 0.01;

// Shutdown / snapshot timing
pub const SNAPSHOT_TIMEOUT_SECS: u64 = 60;
pub const WRITER_DRAIN_TIMEOUT_SECS: u64 = 2;
pub const ENCODER_EXIT_TIMEOUT_SECS: u64 = 5;

// FFmpeg
pub const INPUT_PIXEL_FORMAT: &str = "bgra";
pub const OUTPUT_PIXEL_FORMAT: &str = "yuv420p";
pub const SEGMENT_MUXER: &str = "segment";
pub const SEGMENT_FORMAT_MKV: &str = "matroska";
pub const MOV_FLAGS: &str = "+faststart";
pub const FFMPEG_PROGRESS_LOG_INTERVAL_SECS: u64 = 5;

#[cfg(windows)]
pub const CREATE_NO_WINDOW: u32 = 0x08000000;
