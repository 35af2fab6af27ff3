//! Snapshot: turns the rolling buffer's tail into one finished MP4.
//!
//! The selected segments are concatenated by a short-lived ffmpeg
//! invocation in stream-copy mode; audio sidecars are seeked to align
//! their tails with the video window, mixed when both exist, and encoded
//! to AAC. Segments themselves are never re-encoded and never deleted
//! here, so a snapshot cannot disturb the buffer it reads.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::SidecarState;
use crate::config::RecorderConfig;
use crate::constants::{
    AUDIO_BITRATE, AUDIO_CODEC, MOV_FLAGS, SEGMENT_DURATION_SECONDS, SNAPSHOT_TIMEOUT_SECS,
};
use crate::error::RecorderError;
use crate::segments::store::{SegmentFile, SegmentStore};

#[derive(Debug, Clone)]
pub struct SavedClip {
    pub file_name: String,
    pub full_path: PathBuf,
    pub size_bytes: u64,
    pub save_duration_ms: u64,
}

pub(crate) struct SnapshotInputs<'a> {
    pub store: &'a SegmentStore,
    pub config: &'a RecorderConfig,
    pub audio: SidecarState,
    pub ffmpeg: &'a Path,
}

struct AudioInput {
    path: PathBuf,
    seek_secs: f64,
}

/// Deletes the concat manifest on every exit path.
struct ManifestGuard(PathBuf);

impl Drop for ManifestGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

pub(crate) async fn save_snapshot(
    inputs: SnapshotInputs<'_>,
    cancel: CancellationToken,
) -> Result<SavedClip, RecorderError> {
    let started = Instant::now();
    let tag = short_tag();
    let file_name = clip_file_name(&tag);
    std::fs::create_dir_all(&inputs.config.save_path)?;
    let output_path = inputs.config.save_path.join(&file_name);

    let segments = inputs.store.list()?;
    if segments.is_empty() {
        return Err(RecorderError::Snapshot("no segments".to_string()));
    }
    let tail = select_tail(&segments, inputs.config.segments_to_keep());
    let video_duration = tail.len() as f64 * SEGMENT_DURATION_SECONDS as f64;
    log::info!(
        "snapshot: {} segments ({}s of video) -> {}",
        tail.len(),
        video_duration,
        file_name
    );

    let manifest_path = inputs.store.manifest_path(&tag);
    tokio::fs::write(&manifest_path, concat_manifest(tail)).await?;
    let _manifest = ManifestGuard(manifest_path.clone());
    let manifest_name = manifest_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let audio_inputs = select_audio_inputs(&inputs.audio, video_duration);
    let args = build_mux_args(&manifest_name, &audio_inputs, &output_path);
    log::info!("snapshot mux args: {:?}", args);

    // The manifest names segments by basename, so the mux runs with its
    // working directory pinned to the segment directory.
    let mut command = Command::new(inputs.ffmpeg);
    command
        .args(&args)
        .current_dir(inputs.store.dir())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(windows)]
    command.creation_flags(crate::constants::CREATE_NO_WINDOW);

    let mut child = command
        .spawn()
        .map_err(|e| RecorderError::Snapshot(format!("failed to spawn mux: {}", e)))?;
    #[cfg(windows)]
    let _job = crate::job_object::guard_process_tree(&child);

    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(collect_stderr(stderr)));

    enum MuxOutcome {
        Exited(std::io::Result<std::process::ExitStatus>),
        Cancelled,
        TimedOut,
    }
    let outcome = tokio::select! {
        status = child.wait() => MuxOutcome::Exited(status),
        _ = cancel.cancelled() => MuxOutcome::Cancelled,
        _ = tokio::time::sleep(Duration::from_secs(SNAPSHOT_TIMEOUT_SECS)) => MuxOutcome::TimedOut,
    };
    let status = match outcome {
        MuxOutcome::Exited(status) => status?,
        MuxOutcome::Cancelled => {
            kill_mux(child).await;
            return Err(RecorderError::Snapshot("cancelled".to_string()));
        }
        MuxOutcome::TimedOut => {
            kill_mux(child).await;
            return Err(RecorderError::Snapshot(format!(
                "mux timed out after {}s",
                SNAPSHOT_TIMEOUT_SECS
            )));
        }
    };

    if !status.success() {
        let detail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        return Err(RecorderError::Snapshot(format!(
            "mux failed with {}: {}",
            status,
            detail.trim()
        )));
    }

    let size_bytes = std::fs::metadata(&output_path)?.len();
    Ok(SavedClip {
        file_name,
        full_path: output_path,
        size_bytes,
        save_duration_ms: started.elapsed().as_millis() as u64,
    })
}

fn short_tag() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// `clip_YYYYMMDD_HHMMSS_fff_<8-hex>.mp4`; the suffix disambiguates rapid
/// repeat presses within the same millisecond.
fn clip_file_name(tag: &str) -> String {
    format!("clip_{}_{}.mp4", Local::now().format("%Y%m%d_%H%M%S_%3f"), tag)
}

fn select_tail(segments: &[SegmentFile], keep: usize) -> &[SegmentFile] {
    let start = segments.len().saturating_sub(keep);
    &segments[start..]
}

fn concat_manifest(tail: &[SegmentFile]) -> String {
    let mut manifest = String::new();
    for segment in tail {
        manifest.push_str(&format!("file '{}'\n", segment.name));
    }
    manifest
}

/// Seeking from the start by `elapsed - video_duration` aligns the audio
/// tail with the video tail. Computing it per sidecar from that sidecar's
/// own elapsed time keeps a late-started stream (device failure at
/// session start) from seeking past its own origin.
fn audio_seek_offset(elapsed_secs: f64, video_duration: f64) -> f64 {
    (elapsed_secs - video_duration).max(0.0)
}

fn select_audio_inputs(state: &SidecarState, video_duration: f64) -> Vec<AudioInput> {
    let mut inputs = Vec::new();
    for info in [&state.desktop, &state.microphone].into_iter().flatten() {
        if info.path.exists() {
            inputs.push(AudioInput {
                path: info.path.clone(),
                seek_secs: audio_seek_offset(info.elapsed_secs, video_duration),
            });
        }
    }
    inputs
}

fn build_mux_args(manifest_name: &str, audio: &[AudioInput], output: &Path) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        manifest_name.to_string(),
    ];

    for input in audio {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", input.seek_secs));
        args.push("-i".to_string());
        args.push(input.path.to_string_lossy().to_string());
    }

    args.push("-map".to_string());
    args.push("0:v:0".to_string());

    match audio.len() {
        2 => {
            args.extend([
                "-filter_complex".to_string(),
                "[1:a][2:a]amix=inputs=2:duration=first[aout]".to_string(),
                "-map".to_string(),
                "[aout]".to_string(),
                "-c:a".to_string(),
                AUDIO_CODEC.to_string(),
                "-b:a".to_string(),
                AUDIO_BITRATE.to_string(),
            ]);
        }
        1 => {
            args.extend([
                "-map".to_string(),
                "1:a:0".to_string(),
                "-c:a".to_string(),
                AUDIO_CODEC.to_string(),
                "-b:a".to_string(),
                AUDIO_BITRATE.to_string(),
                "-shortest".to_string(),
            ]);
        }
        _ => {}
    }

    args.extend([
        "-c:v".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        MOV_FLAGS.to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

async fn kill_mux(mut child: tokio::process::Child) {
    if let Err(e) = child.start_kill() {
        log::warn!("failed to kill mux process: {}", e);
    }
    let _ = child.wait().await;
}

async fn collect_stderr(stderr: tokio::process::ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut collected = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if collected.len() < 4096 {
            collected.push_str(&line);
            collected.push('\n');
        }
    }
    collected
}
