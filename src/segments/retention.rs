use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::constants::RETENTION_INTERVAL_MS;
use crate::events::{ErrorSource, EventBus};
use crate::segments::store::{SegmentFile, SegmentStore};

/// Ordered view of segments awaiting expiry.
///
/// New segments are appended as they are observed; pruning deletes from the
/// front until at most `max_keep` remain. A delete that fails (typically a
/// snapshot still reading the file) puts the segment back at the head and
/// ends the pass, so the next cycle retries it.
#[derive(Default)]
pub struct RetentionQueue {
    known: HashSet<String>,
    queue: VecDeque<SegmentFile>,
}

impl RetentionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, segments: Vec<SegmentFile>) {
        for segment in segments {
            if self.known.insert(segment.name.clone()) {
                self.queue.push_back(segment);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Deletes expired segments; returns how many were removed.
    pub fn prune(&mut self, max_keep: usize) -> usize {
        let mut deleted = 0;
        while self.queue.len() > max_keep {
            let Some(segment) = self.queue.pop_front() else {
                break;
            };
            match fs::remove_file(&segment.path) {
                Ok(()) => {
                    log::debug!("retention deleted {}", segment.name);
                    deleted += 1;
                }
                // Already gone (e.g. a prior half-finished pass): expired.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    deleted += 1;
                }
                Err(e) => {
                    log::debug!("retention retry for {} ({})", segment.name, e);
                    self.queue.push_front(segment);
                    break;
                }
            }
        }
        deleted
    }
}

/// Periodic pruning task. Runs until the shutdown flag flips.
pub(crate) async fn run_retention(
    store: Arc<SegmentStore>,
    max_keep: usize,
    mut shutdown: watch::Receiver<bool>,
    events: EventBus,
) {
    let mut queue = RetentionQueue::new();
    let interval = Duration::from_millis(RETENTION_INTERVAL_MS);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match store.list() {
            Ok(segments) => {
                queue.observe(segments);
                queue.prune(max_keep);
            }
            Err(e) => {
                events.error(
                    ErrorSource::Retention,
                    format!("failed to list segments: {}", e),
                    false,
                );
            }
        }
    }
    log::debug!("retention task exiting");
}
