//! Recorder facade: lifecycle state machine, event surface, external API.
//!
//! The recording is always on once started; callers harvest history with
//! [`Recorder::save_clip`]. `pause` is a partial teardown that keeps the
//! on-disk segments and can be re-entered into `start`; `dispose` erases
//! the session's files. Everything the recorder owns (subprocesses, pooled
//! buffers, temp files, the 1 ms timer request) is scoped to its lifetime.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::audio::AudioSidecarWriter;
use crate::capture::{run_capture_loop, CaptureContext, CaptureCounters, FrameSource};
use crate::channel::frame_channel;
use crate::clock::{RecorderClock, TimerResolution};
use crate::config::RecorderConfig;
use crate::constants::{
    ENCODER_EXIT_TIMEOUT_SECS, FRAME_CHANNEL_CAPACITY, POOL_WARMUP_BUFFERS,
    WRITER_DRAIN_TIMEOUT_SECS,
};
use crate::error::RecorderError;
use crate::events::{ErrorSource, EventBus, EventSink, RecorderEvent};
use crate::ffmpeg::commands::CaptureCommandBuilder;
use crate::ffmpeg::session::{run_frame_writer, EncoderSession};
use crate::ffmpeg::utils::locate_ffmpeg;
use crate::pool::FramePool;
use crate::segments::retention::run_retention;
use crate::segments::store::SegmentStore;
use crate::snapshot::{save_snapshot, SavedClip, SnapshotInputs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    Idle,
    Starting,
    Running,
    Paused,
    Disposed,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RecorderStats {
    pub total_frames: u64,
    pub dropped_frames: u64,
    pub queue_drops: u64,
    pub frames_encoded: u64,
}

struct ActiveSession {
    pool: Arc<FramePool>,
    capture_thread: std::thread::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
    retention_shutdown: watch::Sender<bool>,
    retention_task: tokio::task::JoinHandle<()>,
    encoder: EncoderSession,
    audio: Option<AudioSidecarWriter>,
    _timer: TimerResolution,
}

pub struct Recorder {
    config: RecorderConfig,
    events: EventBus,
    runtime: Runtime,
    clock: Arc<RecorderClock>,
    store: Arc<SegmentStore>,
    state: Mutex<RecorderState>,
    session: Mutex<Option<ActiveSession>>,
    recording: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    queue_drops: Arc<AtomicU64>,
    frames_encoded: Arc<AtomicU64>,
}

impl Recorder {
    /// Validates the configuration and prepares the session's segment
    /// store. Nothing touches the GPU, audio devices, or ffmpeg until
    /// [`Recorder::start`].
    pub fn new(mut config: RecorderConfig) -> Result<Self, RecorderError> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("shadowclip-worker")
            .enable_all()
            .build()?;
        let store = SegmentStore::new(std::env::temp_dir().join("shadowclip-buffer"))?;

        Ok(Self {
            config,
            events: EventBus::default(),
            runtime,
            clock: Arc::new(RecorderClock::new()),
            store: Arc::new(store),
            state: Mutex::new(RecorderState::Idle),
            session: Mutex::new(None),
            recording: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(CaptureCounters::default()),
            queue_drops: Arc::new(AtomicU64::new(0)),
            frames_encoded: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.events = EventBus::new(Some(sink));
        self
    }

    pub fn state(&self) -> RecorderState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(RecorderState::Disposed)
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            total_frames: self.counters.total_frames.load(Ordering::Relaxed),
            dropped_frames: self.counters.dropped_frames.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
        }
    }

    /// Idle/Paused -> Running: acquires the 1 ms timer, opens the capture
    /// surface, spawns the encoder, and starts the capture, writer, and
    /// retention workers. An encoder or capture failure here is fatal.
    pub fn start(&mut self) -> Result<(), RecorderError> {
        let previous = self.transition(
            &[RecorderState::Idle, RecorderState::Paused],
            RecorderState::Starting,
        )?;
        self.events.emit(RecorderEvent::RecordingStateChanged {
            state: RecorderState::Starting,
        });

        match self.start_session() {
            Ok(session) => {
                *self.session.lock().map_err(poisoned)? = Some(session);
                self.set_state(RecorderState::Running);
                Ok(())
            }
            Err(e) => {
                self.recording.store(false, Ordering::Relaxed);
                self.events.error(error_source_for(&e), e.to_string(), true);
                self.set_state(previous);
                Err(e)
            }
        }
    }

    fn start_session(&self) -> Result<ActiveSession, RecorderError> {
        let timer = TimerResolution::acquire();
        let source = create_frame_source(self.config.monitor_index)?;
        let (width, height) = source.dimensions();

        let frame_size = width as usize * height as usize * crate::constants::BYTES_PER_PIXEL;
        let pool = Arc::new(FramePool::new(frame_size));
        pool.warmup(POOL_WARMUP_BUFFERS);

        self.store.ensure_dir()?;

        let (tx, rx) = frame_channel(
            FRAME_CHANNEL_CAPACITY,
            pool.clone(),
            self.queue_drops.clone(),
        );

        let audio = if self.config.record_audio {
            AudioSidecarWriter::start(
                &self.config,
                self.clock.clone(),
                self.store.sidecar_path("desktop"),
                self.store.sidecar_path("microphone"),
                &self.events,
            )
        } else {
            None
        };

        let ffmpeg = locate_ffmpeg(self.config.ffmpeg_path.as_deref())?;
        let args =
            CaptureCommandBuilder::new(&self.config, width, height, self.store.output_template())
                .build();

        // tokio subprocess plumbing needs the runtime context.
        let _guard = self.runtime.enter();
        let mut encoder = EncoderSession::spawn(&ffmpeg, &args)?;
        let stdin = encoder
            .take_stdin()
            .ok_or_else(|| RecorderError::Encoder("encoder stdin unavailable".to_string()))?;

        let writer_task = self.runtime.spawn(run_frame_writer(
            rx,
            stdin,
            pool.clone(),
            encoder.alive_flag(),
            self.frames_encoded.clone(),
            self.events.clone(),
        ));

        let (retention_shutdown, retention_rx) = watch::channel(false);
        let retention_task = self.runtime.spawn(run_retention(
            self.store.clone(),
            self.config.max_segments_to_keep(),
            retention_rx,
            self.events.clone(),
        ));

        self.recording.store(true, Ordering::Relaxed);
        let ctx = CaptureContext {
            fps: self.config.fps,
            clock: self.clock.clone(),
            pool: pool.clone(),
            tx,
            recording: self.recording.clone(),
            counters: self.counters.clone(),
            events: self.events.clone(),
        };
        let capture_thread = std::thread::Builder::new()
            .name("shadowclip-capture".to_string())
            .spawn(move || run_capture_loop(source, ctx))?;

        Ok(ActiveSession {
            pool,
            capture_thread,
            writer_task,
            retention_shutdown,
            retention_task,
            encoder,
            audio,
            _timer: timer,
        })
    }

    /// Running -> Paused: stops capture, drains the writer (soft 2 s),
    /// lets the encoder finalize its last segment (soft 5 s, then kill),
    /// flushes the audio sidecars, and releases the timer request.
    /// Segments stay on disk.
    pub fn pause(&mut self) -> Result<(), RecorderError> {
        self.transition(&[RecorderState::Running], RecorderState::Paused)?;
        let session = self
            .session
            .lock()
            .map_err(poisoned)?
            .take()
            .ok_or_else(|| RecorderError::State("no active session".to_string()))?;
        self.shutdown_session(session);
        self.set_state(RecorderState::Paused);
        Ok(())
    }

    fn shutdown_session(&self, mut session: ActiveSession) {
        // Capture exits at its next loop head, dropping the channel writer
        // side, which ends the frame writer's stream.
        self.recording.store(false, Ordering::Relaxed);
        if session.capture_thread.join().is_err() {
            log::error!("capture thread panicked");
        }

        self.runtime.block_on(async {
            let drain = Duration::from_secs(WRITER_DRAIN_TIMEOUT_SECS);
            if tokio::time::timeout(drain, &mut session.writer_task)
                .await
                .is_err()
            {
                log::warn!("frame writer did not drain within {:?}; aborting", drain);
                session.writer_task.abort();
            }

            session
                .encoder
                .wait_or_kill(Duration::from_secs(ENCODER_EXIT_TIMEOUT_SECS))
                .await;

            let _ = session.retention_shutdown.send(true);
            if tokio::time::timeout(Duration::from_secs(1), &mut session.retention_task)
                .await
                .is_err()
            {
                session.retention_task.abort();
            }
        });

        if let Some(audio) = session.audio.take() {
            audio.stop();
        }

        let outstanding = session.pool.outstanding();
        if outstanding != 0 {
            log::warn!("{} frame buffers unaccounted for at pause", outstanding);
        }
    }

    /// Only valid while Running. Blocks until the clip is finished (60 s
    /// ceiling) or the supplied token cancels, in which case the mux
    /// process tree is killed. Capture is unaffected either way.
    pub fn save_clip(&self) -> Result<SavedClip, RecorderError> {
        self.save_clip_with(CancellationToken::new())
    }

    pub fn save_clip_with(&self, cancel: CancellationToken) -> Result<SavedClip, RecorderError> {
        let audio_state = {
            let state = self.state.lock().map_err(poisoned)?;
            if *state != RecorderState::Running {
                return Err(RecorderError::State(format!(
                    "save_clip requires a running recorder (state: {:?})",
                    *state
                )));
            }
            let session = self.session.lock().map_err(poisoned)?;
            let session = session
                .as_ref()
                .ok_or_else(|| RecorderError::State("no active session".to_string()))?;
            if !session.encoder.is_alive() {
                return Err(RecorderError::Snapshot("no encoding active".to_string()));
            }
            session
                .audio
                .as_ref()
                .map(|a| a.state())
                .unwrap_or_default()
        };

        let ffmpeg = locate_ffmpeg(self.config.ffmpeg_path.as_deref())?;
        let result = self.runtime.block_on(save_snapshot(
            SnapshotInputs {
                store: &self.store,
                config: &self.config,
                audio: audio_state,
                ffmpeg: &ffmpeg,
            },
            cancel,
        ));

        match &result {
            Ok(clip) => self.events.emit(RecorderEvent::ClipSaved {
                file_name: clip.file_name.clone(),
                full_path: clip.full_path.to_string_lossy().to_string(),
                size_bytes: clip.size_bytes,
                save_duration_ms: clip.save_duration_ms,
            }),
            Err(e) => self
                .events
                .error(ErrorSource::Snapshot, e.to_string(), false),
        }
        result
    }

    /// Full teardown including erasure of the session's on-disk files.
    pub fn dispose(&mut self) -> Result<(), RecorderError> {
        if self.state() == RecorderState::Disposed {
            return Ok(());
        }
        if self.state() == RecorderState::Running {
            self.pause()?;
        }
        self.store.erase()?;
        self.set_state(RecorderState::Disposed);
        Ok(())
    }

    fn transition(
        &self,
        from: &[RecorderState],
        to: RecorderState,
    ) -> Result<RecorderState, RecorderError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if !from.contains(&*state) {
            return Err(RecorderError::State(format!(
                "invalid transition from {:?}",
                *state
            )));
        }
        let previous = *state;
        *state = to;
        Ok(previous)
    }

    fn set_state(&self, to: RecorderState) {
        if let Ok(mut state) = self.state.lock() {
            *state = to;
        }
        self.events
            .emit(RecorderEvent::RecordingStateChanged { state: to });
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.state() != RecorderState::Disposed {
            if let Err(e) = self.dispose() {
                log::warn!("recorder teardown failed: {}", e);
            }
        }
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> RecorderError {
    RecorderError::State("recorder state poisoned".to_string())
}

fn error_source_for(error: &RecorderError) -> ErrorSource {
    match error {
        RecorderError::Capture(_) => ErrorSource::Capture,
        RecorderError::Audio(_) => ErrorSource::Audio,
        RecorderError::Snapshot(_) => ErrorSource::Snapshot,
        _ => ErrorSource::Encoder,
    }
}

#[cfg(windows)]
fn create_frame_source(
    monitor_index: u32,
) -> Result<crate::capture::duplication::DesktopDuplicator, RecorderError> {
    crate::capture::duplication::DesktopDuplicator::new(monitor_index)
}

#[cfg(not(windows))]
fn create_frame_source(_monitor_index: u32) -> Result<UnsupportedSource, RecorderError> {
    Err(RecorderError::Capture(
        "desktop duplication is only available on Windows".to_string(),
    ))
}

/// Placeholder so the non-Windows build has a `FrameSource` type to name;
/// construction always fails before one exists.
#[cfg(not(windows))]
struct UnsupportedSource;

#[cfg(not(windows))]
impl FrameSource for UnsupportedSource {
    fn dimensions(&self) -> (u32, u32) {
        (0, 0)
    }
    fn try_next_frame(&mut self, _dest: &mut [u8]) -> Result<bool, String> {
        Err("unsupported platform".to_string())
    }
    fn recover(&mut self) -> Result<(), String> {
        Err("unsupported platform".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_recorder() -> Recorder {
        let config = RecorderConfig {
            save_path: std::env::temp_dir().join("shadowclip_recorder_test"),
            ..Default::default()
        };
        Recorder::new(config).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = RecorderConfig {
            fps: 500,
            ..Default::default()
        };
        assert!(matches!(
            Recorder::new(config),
            Err(RecorderError::Config(_))
        ));
    }

    #[test]
    fn test_initial_state_is_idle() {
        let recorder = test_recorder();
        assert_eq!(recorder.state(), RecorderState::Idle);
        let stats = recorder.stats();
        assert_eq!(stats.total_frames, 0);
        assert_eq!(stats.frames_encoded, 0);
    }

    #[test]
    fn test_save_clip_requires_running() {
        let recorder = test_recorder();
        assert!(matches!(
            recorder.save_clip(),
            Err(RecorderError::State(_))
        ));
    }

    #[test]
    fn test_pause_requires_running() {
        let mut recorder = test_recorder();
        assert!(matches!(recorder.pause(), Err(RecorderError::State(_))));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut recorder = test_recorder();
        recorder.dispose().unwrap();
        assert_eq!(recorder.state(), RecorderState::Disposed);
        recorder.dispose().unwrap();
        assert_eq!(recorder.state(), RecorderState::Disposed);
    }

    #[test]
    fn test_start_after_dispose_fails() {
        let mut recorder = test_recorder();
        recorder.dispose().unwrap();
        assert!(matches!(recorder.start(), Err(RecorderError::State(_))));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_start_without_capture_backend_reverts_state() {
        let mut recorder = test_recorder();
        assert!(matches!(
            recorder.start(),
            Err(RecorderError::Capture(_))
        ));
        assert_eq!(recorder.state(), RecorderState::Idle);
    }
}
