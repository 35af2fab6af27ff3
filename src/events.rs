//! Event surface consumed by the UI layer and mirrored into the log.

use serde::Serialize;
use std::sync::Arc;

use crate::recorder::RecorderState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Capture,
    Encoder,
    Audio,
    Snapshot,
    Retention,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub total_frames: u64,
    pub effective_fps: f64,
    pub capture_success_rate: f64,
    pub dropped_frames: u64,
    pub queue_drops: u64,
    pub pool_hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecorderEvent {
    RecordingStateChanged {
        state: RecorderState,
    },
    ClipSaved {
        file_name: String,
        full_path: String,
        size_bytes: u64,
        save_duration_ms: u64,
    },
    Error {
        source: ErrorSource,
        message: String,
        detail: Option<String>,
        is_fatal: bool,
    },
    PerformanceStats(PerformanceStats),
}

pub type EventSink = Arc<dyn Fn(RecorderEvent) + Send + Sync>;

/// Fan-out point for recorder events. Every event is logged; a sink, when
/// installed, receives it as well.
#[derive(Clone, Default)]
pub(crate) struct EventBus {
    sink: Option<EventSink>,
}

impl EventBus {
    pub fn new(sink: Option<EventSink>) -> Self {
        Self { sink }
    }

    pub fn emit(&self, event: RecorderEvent) {
        match &event {
            RecorderEvent::RecordingStateChanged { state } => {
                log::info!("recording state changed: {:?}", state)
            }
            RecorderEvent::ClipSaved {
                file_name,
                size_bytes,
                save_duration_ms,
                ..
            } => log::info!(
                "clip saved: {} ({} bytes in {} ms)",
                file_name,
                size_bytes,
                save_duration_ms
            ),
            RecorderEvent::Error {
                source,
                message,
                is_fatal,
                ..
            } => {
                if *is_fatal {
                    log::error!("{:?}: {}", source, message)
                } else {
                    log::warn!("{:?}: {}", source, message)
                }
            }
            RecorderEvent::PerformanceStats(stats) => log::debug!(
                "perf: {} frames, {:.1} fps, {:.1}% success, {} dropped, {} queue drops",
                stats.total_frames,
                stats.effective_fps,
                stats.capture_success_rate * 100.0,
                stats.dropped_frames,
                stats.queue_drops
            ),
        }
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }

    pub fn error(&self, source: ErrorSource, message: impl Into<String>, is_fatal: bool) {
        self.emit(RecorderEvent::Error {
            source,
            message: message.into(),
            detail: None,
            is_fatal,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_sink_receives_events() {
        let seen: Arc<Mutex<Vec<RecorderEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let bus = EventBus::new(Some(Arc::new(move |event| {
            seen_clone.lock().unwrap().push(event);
        })));

        bus.error(ErrorSource::Encoder, "pipe closed", false);
        bus.emit(RecorderEvent::ClipSaved {
            file_name: "clip.mp4".into(),
            full_path: "/tmp/clip.mp4".into(),
            size_bytes: 1024,
            save_duration_ms: 12,
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(
            seen[0],
            RecorderEvent::Error {
                source: ErrorSource::Encoder,
                is_fatal: false,
                ..
            }
        ));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = RecorderEvent::PerformanceStats(PerformanceStats {
            total_frames: 600,
            effective_fps: 59.8,
            capture_success_rate: 0.99,
            dropped_frames: 6,
            queue_drops: 0,
            pool_hit_rate: 0.9,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"performance_stats\""));
        assert!(json.contains("\"total_frames\":600"));
    }
}
