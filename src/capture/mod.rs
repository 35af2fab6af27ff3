//! Paced desktop capture.
//!
//! The loop runs on a dedicated thread: it ticks at the target frame rate
//! (sleep to within a couple of milliseconds, then short-spin), acquires
//! frames non-blockingly, and publishes them to the frame channel without
//! ever waiting on the encoder side. The platform backend sits behind
//! [`FrameSource`] so the pacing, drop, and recovery logic is testable
//! without a GPU.

pub mod monitors;

#[cfg(windows)]
pub mod duplication;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::channel::{Frame, FrameSender};
use crate::clock::RecorderClock;
use crate::constants::{
    BYTES_PER_PIXEL, CAPTURE_ERROR_BACKOFF_MS, MAX_CONSECUTIVE_DROPS_BEFORE_RECOVERY,
    MAX_RECOVERY_ATTEMPTS, PACING_REBASE_INTERVALS, PACING_SLEEP_SLACK_MS, REPUBLISH_MISS_LIMIT,
    STATS_INTERVAL_FRAMES_PER_FPS,
};
use crate::events::{ErrorSource, EventBus, PerformanceStats, RecorderEvent};
use crate::pool::FramePool;

/// Seam between the capture loop and the OS capture primitive.
pub trait FrameSource: Send {
    fn dimensions(&self) -> (u32, u32);

    /// Non-blocking acquire. `Ok(false)` (no new frame yet) is the common
    /// case and not an error. On `Ok(true)`, `dest` holds a full BGRA frame.
    fn try_next_frame(&mut self, dest: &mut [u8]) -> Result<bool, String>;

    /// Tears down and reacquires the capture surface after sustained misses.
    fn recover(&mut self) -> Result<(), String>;
}

#[derive(Default)]
pub struct CaptureCounters {
    pub total_frames: AtomicU64,
    pub dropped_frames: AtomicU64,
}

pub(crate) struct CaptureContext {
    pub fps: u32,
    pub clock: Arc<RecorderClock>,
    pub pool: Arc<FramePool>,
    pub tx: FrameSender,
    pub recording: Arc<AtomicBool>,
    pub counters: Arc<CaptureCounters>,
    pub events: EventBus,
}

/// Body of the capture thread. Exits only when the recording flag clears.
pub(crate) fn run_capture_loop(mut source: impl FrameSource, ctx: CaptureContext) {
    let (width, height) = source.dimensions();
    let frame_size = width as usize * height as usize * BYTES_PER_PIXEL;
    let ticks_per_frame = RecorderClock::ticks_per_frame(ctx.fps);
    let stats_interval = STATS_INTERVAL_FRAMES_PER_FPS * ctx.fps.max(1) as u64;

    // Two buffers alternate roles: one receives the next capture, the
    // other retains the most recent successful frame. A frame is published
    // one tick after it was captured, which keeps it resident for
    // republishing on a missed tick without any per-frame copy.
    let mut slots = [ctx.pool.rent(), ctx.pool.rent()];
    let mut capture_idx = 0usize;
    let mut has_valid = false;

    let mut consecutive_misses = 0u32;
    let mut recovery_attempts = 0u32;
    let loop_start_ticks = ctx.clock.ticks();
    let mut next_frame_ticks = loop_start_ticks + ticks_per_frame;

    log::info!("capture loop started ({}x{} @ {} fps)", width, height, ctx.fps);

    loop {
        if !ctx.recording.load(Ordering::Relaxed) {
            break;
        }

        let now = ctx.clock.ticks();
        if now > next_frame_ticks + PACING_REBASE_INTERVALS * ticks_per_frame {
            // Slipped too far behind; catch up instead of bursting.
            next_frame_ticks = now + ticks_per_frame;
        }
        wait_until(&ctx.clock, next_frame_ticks);

        match source.try_next_frame(&mut slots[capture_idx]) {
            Ok(true) => {
                consecutive_misses = 0;
                recovery_attempts = 0;
                let total = ctx.counters.total_frames.fetch_add(1, Ordering::Relaxed) + 1;

                let last_idx = capture_idx ^ 1;
                if has_valid {
                    let previous = std::mem::replace(&mut slots[last_idx], ctx.pool.rent());
                    ctx.tx.try_send(Frame {
                        buffer: previous,
                        valid_len: frame_size,
                    });
                } else {
                    has_valid = true;
                }
                capture_idx = last_idx;

                if total % stats_interval == 0 {
                    emit_stats(&ctx, loop_start_ticks);
                }
            }
            Ok(false) => {
                consecutive_misses += 1;
                ctx.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);

                if consecutive_misses <= REPUBLISH_MISS_LIMIT {
                    // Keep the encoded stream ticking with the last frame.
                    if has_valid {
                        let mut copy = ctx.pool.rent();
                        copy.copy_from_slice(&slots[capture_idx ^ 1]);
                        ctx.tx.try_send(Frame {
                            buffer: copy,
                            valid_len: frame_size,
                        });
                    }
                } else if consecutive_misses >= MAX_CONSECUTIVE_DROPS_BEFORE_RECOVERY
                    && recovery_attempts < MAX_RECOVERY_ATTEMPTS
                {
                    match source.recover() {
                        Ok(()) => {
                            log::info!(
                                "capture recovered after {} consecutive misses",
                                consecutive_misses
                            );
                            consecutive_misses = 0;
                        }
                        Err(e) => {
                            recovery_attempts += 1;
                            ctx.events.error(
                                ErrorSource::Capture,
                                format!(
                                    "capture recovery failed (attempt {}/{}): {}",
                                    recovery_attempts, MAX_RECOVERY_ATTEMPTS, e
                                ),
                                false,
                            );
                        }
                    }
                }
                // Misses between the republish limit and the recovery
                // threshold skip publication so overall timing holds.
            }
            Err(e) => {
                consecutive_misses += 1;
                ctx.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
                ctx.events
                    .error(ErrorSource::Capture, format!("capture failed: {}", e), false);
                std::thread::sleep(Duration::from_millis(CAPTURE_ERROR_BACKOFF_MS));
            }
        }

        next_frame_ticks += ticks_per_frame;
    }

    let [a, b] = slots;
    ctx.pool.release(a);
    ctx.pool.release(b);
    log::info!("capture loop exiting");
}

/// Sleep to just short of the deadline, then spin the rest. Relies on the
/// recorder's 1 ms timer resolution request for the sleep accuracy.
fn wait_until(clock: &RecorderClock, deadline_ticks: u64) {
    loop {
        let now = clock.ticks();
        if now >= deadline_ticks {
            return;
        }
        let remaining_ms = (deadline_ticks - now) / 1_000;
        if remaining_ms > PACING_SLEEP_SLACK_MS {
            std::thread::sleep(Duration::from_millis(remaining_ms - 1));
        } else {
            while clock.ticks() < deadline_ticks {
                std::hint::spin_loop();
            }
            return;
        }
    }
}

fn emit_stats(ctx: &CaptureContext, loop_start_ticks: u64) {
    let total = ctx.counters.total_frames.load(Ordering::Relaxed);
    let dropped = ctx.counters.dropped_frames.load(Ordering::Relaxed);
    let elapsed =
        RecorderClock::ticks_to_secs(ctx.clock.ticks().saturating_sub(loop_start_ticks));
    let attempts = total + dropped;
    ctx.events.emit(RecorderEvent::PerformanceStats(PerformanceStats {
        total_frames: total,
        effective_fps: if elapsed > 0.0 {
            total as f64 / elapsed
        } else {
            0.0
        },
        capture_success_rate: if attempts > 0 {
            total as f64 / attempts as f64
        } else {
            0.0
        },
        dropped_frames: dropped,
        queue_drops: ctx.tx.dropped_count(),
        pool_hit_rate: ctx.pool.stats().hit_rate(),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{frame_channel, FrameReceiver};
    use crate::constants::FRAME_CHANNEL_CAPACITY;
    use std::collections::VecDeque;

    /// Scripted frame source. Flips the recording flag off as it hands out
    /// its final step so the loop exits deterministically.
    struct MockSource {
        steps: VecDeque<Result<bool, String>>,
        recover_results: VecDeque<Result<(), String>>,
        recover_calls: Arc<AtomicU64>,
        frame_counter: u8,
        recording: Arc<AtomicBool>,
    }

    impl FrameSource for MockSource {
        fn dimensions(&self) -> (u32, u32) {
            (4, 1)
        }

        fn try_next_frame(&mut self, dest: &mut [u8]) -> Result<bool, String> {
            let step = self.steps.pop_front().unwrap_or(Ok(false));
            if self.steps.is_empty() {
                self.recording.store(false, Ordering::Relaxed);
            }
            if let Ok(true) = step {
                self.frame_counter += 1;
                dest.fill(self.frame_counter);
            }
            step
        }

        fn recover(&mut self) -> Result<(), String> {
            self.recover_calls.fetch_add(1, Ordering::Relaxed);
            self.recover_results
                .pop_front()
                .unwrap_or(Err("no recovery scripted".to_string()))
        }
    }

    struct Harness {
        pool: Arc<FramePool>,
        rx: FrameReceiver,
        recording: Arc<AtomicBool>,
        counters: Arc<CaptureCounters>,
    }

    fn run_scripted(
        steps: Vec<Result<bool, String>>,
        recoveries: Vec<Result<(), String>>,
    ) -> (Harness, u64) {
        let pool = Arc::new(FramePool::new(4));
        let (tx, rx) = frame_channel(
            FRAME_CHANNEL_CAPACITY,
            pool.clone(),
            Arc::new(AtomicU64::new(0)),
        );
        let recording = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(CaptureCounters::default());
        let recover_calls = Arc::new(AtomicU64::new(0));
        let source = MockSource {
            steps: steps.into(),
            recover_results: recoveries.into(),
            recover_calls: recover_calls.clone(),
            frame_counter: 0,
            recording: recording.clone(),
        };

        // High fps keeps the paced test fast.
        let ctx = CaptureContext {
            fps: 144,
            clock: Arc::new(RecorderClock::new()),
            pool: pool.clone(),
            tx,
            recording: recording.clone(),
            counters: counters.clone(),
            events: EventBus::default(),
        };
        run_capture_loop(source, ctx);
        (
            Harness {
                pool,
                rx,
                recording,
                counters,
            },
            recover_calls.load(Ordering::Relaxed),
        )
    }

    async fn drain(h: &Harness) -> Vec<u8> {
        let mut marks = Vec::new();
        loop {
            tokio::select! {
                biased;
                frame = h.rx.recv() => {
                    match frame {
                        Some(frame) => {
                            marks.push(frame.buffer[0]);
                            h.pool.release(frame.buffer);
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(50)) => break,
            }
        }
        marks
    }

    #[tokio::test]
    async fn test_publishes_one_frame_behind() {
        let (h, _) = run_scripted(vec![Ok(true); 4], vec![]);
        // Four captures publish frames 1..=3; frame 4 stays resident.
        assert_eq!(drain(&h).await, vec![1, 2, 3]);
        assert_eq!(h.counters.total_frames.load(Ordering::Relaxed), 4);
        assert_eq!(h.counters.dropped_frames.load(Ordering::Relaxed), 0);
        assert_eq!(h.pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_republish_last_valid_on_short_miss() {
        let (h, _) = run_scripted(
            vec![Ok(true), Ok(true), Ok(false), Ok(false)],
            vec![],
        );
        // Second capture publishes frame 1; each of the two misses
        // republishes the resident frame 2.
        assert_eq!(drain(&h).await, vec![1, 2, 2]);
        assert_eq!(h.counters.dropped_frames.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_three_or_more_misses_skip_publication() {
        let mut steps = vec![Ok(true), Ok(true)];
        steps.extend(vec![Ok(false); 5]);
        let (h, recover_calls) = run_scripted(steps, vec![]);
        // Misses 3..5 publish nothing and do not reach the recovery limit.
        assert_eq!(drain(&h).await, vec![1, 2, 2]);
        assert_eq!(h.counters.dropped_frames.load(Ordering::Relaxed), 5);
        assert_eq!(recover_calls, 0);
    }

    #[tokio::test]
    async fn test_recovery_after_sustained_misses() {
        let steps = vec![Ok(false); 12];
        let (h, recover_calls) = run_scripted(steps, vec![Ok(())]);
        assert_eq!(recover_calls, 1);
        assert!(drain(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_recovery_attempts_bounded() {
        let steps = vec![Ok(false); 30];
        let recoveries = vec![Err("still gone".to_string()); 10];
        let (_, recover_calls) = run_scripted(steps, recoveries);
        assert_eq!(recover_calls, MAX_RECOVERY_ATTEMPTS as u64);
    }

    #[tokio::test]
    async fn test_capture_never_blocks_without_reader() {
        // Nothing drains the channel; the loop must still complete its
        // scripted successes, shedding oldest frames into the pool.
        let (h, _) = run_scripted(vec![Ok(true); 40], vec![]);
        assert_eq!(h.counters.total_frames.load(Ordering::Relaxed), 40);
        // 39 publishes into a 3-deep channel.
        assert_eq!(h.rx.dropped_count(), 36);
        assert!(!h.recording.load(Ordering::Relaxed));
        // Only the three queued frames remain rented; dropping the channel
        // recycles them too.
        assert_eq!(h.pool.outstanding(), 3);
        drop(h.rx);
        assert_eq!(h.pool.outstanding(), 0);
    }
}
