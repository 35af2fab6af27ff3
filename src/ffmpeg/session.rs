//! The live encoder child process.
//!
//! One `EncoderSession` exists per Running recorder. It owns the ffmpeg
//! child fed with raw frames on stdin, bridges stderr into the log at a
//! throttled cadence, and knows how to shut the process down gracefully
//! with a force-kill fallback.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};

use crate::channel::FrameReceiver;
use crate::constants::FFMPEG_PROGRESS_LOG_INTERVAL_SECS;
use crate::error::RecorderError;
use crate::events::{ErrorSource, EventBus};
use crate::ffmpeg::utils::extract_value;
use crate::pool::FramePool;

pub(crate) struct EncoderSession {
    child: Child,
    stdin: Option<ChildStdin>,
    alive: Arc<AtomicBool>,
    #[cfg(windows)]
    _job: Option<crate::job_object::JobObject>,
}

impl EncoderSession {
    pub fn spawn(ffmpeg: &Path, args: &[String]) -> Result<Self, RecorderError> {
        log::info!("Spawning encoder with args: {:?}", args);

        let mut command = Command::new(ffmpeg);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        command.creation_flags(crate::constants::CREATE_NO_WINDOW);

        let mut child = command
            .spawn()
            .map_err(|e| RecorderError::Encoder(format!("failed to spawn ffmpeg: {}", e)))?;

        #[cfg(windows)]
        let job = crate::job_object::guard_process_tree(&child);

        let stdin = child.stdin.take();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(monitor_stderr(stderr, "encoder"));
        }

        Ok(Self {
            child,
            stdin,
            alive: Arc::new(AtomicBool::new(true)),
            #[cfg(windows)]
            _job: job,
        })
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Cleared by the frame writer when the stdin pipe breaks.
    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Waits for a graceful exit after stdin has been closed; force-kills
    /// once the timeout elapses.
    pub async fn wait_or_kill(&mut self, timeout: Duration) {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                log::info!("encoder exited with {}", status);
            }
            Ok(Err(e)) => {
                log::warn!("failed to collect encoder exit status: {}", e);
            }
            Err(_) => {
                log::warn!("encoder did not exit within {:?}; killing", timeout);
                if let Err(e) = self.child.start_kill() {
                    log::warn!("failed to kill encoder: {}", e);
                }
                let _ = self.child.wait().await;
            }
        }
        self.alive.store(false, Ordering::Relaxed);
    }
}

/// Drains the frame channel into the encoder stdin. Every dequeued buffer
/// goes back to the pool exactly once, including on the error path. A
/// broken pipe means the encoder died: the writer reports it as non-fatal
/// and exits, leaving capture untouched.
pub(crate) async fn run_frame_writer(
    rx: FrameReceiver,
    mut stdin: ChildStdin,
    pool: Arc<FramePool>,
    alive: Arc<AtomicBool>,
    frames_written: Arc<AtomicU64>,
    events: EventBus,
) {
    while let Some(frame) = rx.recv().await {
        let result = stdin.write_all(&frame.buffer[..frame.valid_len]).await;
        pool.release(frame.buffer);
        if let Err(e) = result {
            alive.store(false, Ordering::Relaxed);
            events.error(
                ErrorSource::Encoder,
                format!("encoder pipe closed: {}", e),
                false,
            );
            return;
        }
        frames_written.fetch_add(1, Ordering::Relaxed);
    }
    // Writer side closed: flush and drop stdin so the encoder sees EOF and
    // finalizes the current segment.
    if let Err(e) = stdin.flush().await {
        log::debug!("encoder stdin flush on close: {}", e);
    }
    if let Err(e) = stdin.shutdown().await {
        log::debug!("encoder stdin shutdown: {}", e);
    }
    alive.store(false, Ordering::Relaxed);
}

/// Bridges ffmpeg stderr into the log. Progress lines are collapsed to one
/// entry every few seconds; everything else passes through.
async fn monitor_stderr(stderr: ChildStderr, label: &'static str) {
    let mut lines = BufReader::new(stderr).lines();
    let mut last_progress_log = std::time::Instant::now();
    let mut first_progress = true;

    while let Ok(Some(line)) = lines.next_line().await {
        let is_progress = line.contains("frame=") && line.contains("fps=");
        if is_progress {
            if first_progress
                || last_progress_log.elapsed()
                    >= Duration::from_secs(FFMPEG_PROGRESS_LOG_INTERVAL_SECS)
            {
                log::info!(
                    "{} | frame: {} | fps: {} | size: {} | speed: {}",
                    label,
                    extract_value(&line, "frame=").unwrap_or_else(|| "??".into()),
                    extract_value(&line, "fps=").unwrap_or_else(|| "??".into()),
                    extract_value(&line, "size=").unwrap_or_else(|| "??".into()),
                    extract_value(&line, "speed=").unwrap_or_else(|| "??".into()),
                );
                last_progress_log = std::time::Instant::now();
                first_progress = false;
            }
        } else if !line.trim().is_empty() {
            log::info!("{}: {}", label, line.trim());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{frame_channel, Frame};
    use crate::constants::FRAME_CHANNEL_CAPACITY;

    // The writer contract (buffer returned exactly once, alive cleared on
    // close) is exercised against a duplex pipe instead of a real encoder.
    #[tokio::test]
    async fn test_writer_returns_buffers_and_exits_on_close() {
        let pool = Arc::new(FramePool::new(8));
        let (tx, rx) = frame_channel(
            FRAME_CHANNEL_CAPACITY,
            pool.clone(),
            Arc::new(AtomicU64::new(0)),
        );
        let alive = Arc::new(AtomicBool::new(true));
        let written = Arc::new(AtomicU64::new(0));

        // A child that swallows stdin: `cat > /dev/null` equivalent via
        // tokio duplex is not a ChildStdin, so use a real no-op process.
        let mut command = Command::new(if cfg!(windows) { "cmd" } else { "sh" });
        if cfg!(windows) {
            command.args(["/C", "more > NUL"]);
        } else {
            command.args(["-c", "cat > /dev/null"]);
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();

        let writer = tokio::spawn(run_frame_writer(
            rx,
            stdin,
            pool.clone(),
            alive.clone(),
            written.clone(),
            EventBus::default(),
        ));

        for _ in 0..3 {
            let buffer = pool.rent();
            tx.try_send(Frame {
                valid_len: buffer.len(),
                buffer,
            });
        }
        tx.close();
        writer.await.unwrap();
        let _ = child.wait().await;

        assert_eq!(written.load(Ordering::Relaxed), 3);
        assert_eq!(pool.outstanding(), 0);
        assert!(!alive.load(Ordering::Relaxed));
    }
}
