//! Utility functions for FFmpeg operations.
use std::path::{Path, PathBuf};

use crate::error::RecorderError;

/// Resolves the ffmpeg binary: explicit override, the executable's own
/// directory, a `bin/` folder next to it or under the working directory,
/// then the system PATH.
pub fn locate_ffmpeg(override_path: Option<&Path>) -> Result<PathBuf, RecorderError> {
    let binary_name = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };

    if let Some(path) = override_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(RecorderError::Encoder(format!(
            "configured ffmpeg path {:?} does not exist",
            path
        )));
    }

    let mut checked_paths = Vec::new();

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidates = [
                exe_dir.join(binary_name),
                exe_dir.join("bin").join(binary_name),
            ];
            for path in candidates {
                if path.exists() {
                    log::info!("Found ffmpeg next to executable: {:?}", path);
                    return Ok(path);
                }
                checked_paths.push(path);
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let path = cwd.join("bin").join(binary_name);
        if path.exists() {
            log::info!("Found ffmpeg under working directory: {:?}", path);
            return Ok(path);
        }
        checked_paths.push(path);
    }

    if let Ok(path) = which::which("ffmpeg") {
        log::info!("Using ffmpeg from PATH: {:?}", path);
        return Ok(path);
    }

    Err(RecorderError::Encoder(format!(
        "Failed to find ffmpeg. Checked: {:?}",
        checked_paths
    )))
}

/// Formats bits per second the way ffmpeg rate options expect it.
pub fn format_bitrate(bps: u32) -> String {
    if bps % 1_000_000 == 0 {
        format!("{}M", bps / 1_000_000)
    } else if bps % 1_000 == 0 {
        format!("{}k", bps / 1_000)
    } else {
        bps.to_string()
    }
}

/// Pulls the value following `key` out of an ffmpeg progress line, e.g.
/// `fps=` from `frame=  120 fps= 60 ...`.
pub fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)?;
    let after_key = &line[start + key.len()..];
    let value_start = after_key.find(|c: char| !c.is_whitespace()).unwrap_or(0);
    let value_part = &after_key[value_start..];
    let end = value_part
        .find(|c: char| c.is_whitespace())
        .unwrap_or(value_part.len());
    Some(value_part[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bitrate() {
        assert_eq!(format_bitrate(8_000_000), "8M");
        assert_eq!(format_bitrate(2_500_000), "2500k");
        assert_eq!(format_bitrate(192_000), "192k");
        assert_eq!(format_bitrate(1_234), "1234");
    }

    #[test]
    fn test_extract_value() {
        let line = "frame=  123 fps= 60 q=23.0 size=    1024kB time=00:00:02.05 bitrate=4089.5kbits/s speed=1.01x";
        assert_eq!(extract_value(line, "frame=").as_deref(), Some("123"));
        assert_eq!(extract_value(line, "fps=").as_deref(), Some("60"));
        assert_eq!(extract_value(line, "speed=").as_deref(), Some("1.01x"));
        assert_eq!(extract_value(line, "dup="), None);
    }

    #[test]
    fn test_locate_rejects_missing_override() {
        let missing = Path::new("/definitely/not/here/ffmpeg");
        assert!(locate_ffmpeg(Some(missing)).is_err());
    }
}
