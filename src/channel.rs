//! Bounded capture → encoder frame hand-off with a drop-oldest overflow
//! policy. The capture side never blocks; when the writer stalls, the
//! oldest queued frame is recycled into the pool and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::pool::FramePool;

/// A captured frame in transit. The buffer is owned by whoever currently
/// holds the frame and must go back to the pool exactly once.
#[derive(Debug)]
pub struct Frame {
    pub buffer: Vec<u8>,
    pub valid_len: usize,
}

struct Inner {
    queue: VecDeque<Frame>,
    closed: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
    dropped: Arc<AtomicU64>,
    pool: Arc<FramePool>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Frames still queued at teardown go back to the pool.
        if let Ok(mut inner) = self.inner.lock() {
            while let Some(frame) = inner.queue.pop_front() {
                self.pool.release(frame.buffer);
            }
        }
    }
}

pub struct FrameSender {
    shared: Arc<Shared>,
}

pub struct FrameReceiver {
    shared: Arc<Shared>,
}

/// `dropped` is supplied by the caller so the count stays observable (and
/// cumulative) after the endpoints move into the pipeline tasks.
pub fn frame_channel(
    capacity: usize,
    pool: Arc<FramePool>,
    dropped: Arc<AtomicU64>,
) -> (FrameSender, FrameReceiver) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            queue: VecDeque::with_capacity(capacity),
            closed: false,
        }),
        notify: Notify::new(),
        capacity,
        dropped,
        pool,
    });
    (
        FrameSender {
            shared: shared.clone(),
        },
        FrameReceiver { shared },
    )
}

impl FrameSender {
    /// Publishes a frame without ever blocking. On overflow the oldest
    /// queued frame is dropped and its buffer returned to the pool.
    pub fn try_send(&self, frame: Frame) {
        let mut inner = match self.shared.inner.lock() {
            Ok(inner) => inner,
            Err(_) => {
                self.shared.pool.release(frame.buffer);
                return;
            }
        };
        if inner.closed {
            drop(inner);
            self.shared.pool.release(frame.buffer);
            return;
        }
        if inner.queue.len() >= self.shared.capacity {
            if let Some(oldest) = inner.queue.pop_front() {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                self.shared.pool.release(oldest.buffer);
            }
        }
        inner.queue.push_back(frame);
        drop(inner);
        self.shared.notify.notify_one();
    }

    /// Closes the writer side; the reader drains what is queued, then
    /// observes end-of-stream.
    pub fn close(&self) {
        if let Ok(mut inner) = self.shared.inner.lock() {
            inner.closed = true;
        }
        self.shared.notify.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for FrameSender {
    fn drop(&mut self) {
        // A producer that goes away (including a panicked capture thread)
        // must not leave the reader waiting forever.
        self.close();
    }
}

impl FrameReceiver {
    /// FIFO receive. Returns `None` once the channel is closed and empty.
    pub async fn recv(&self) -> Option<Frame> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut inner = self.shared.inner.lock().ok()?;
                if let Some(frame) = inner.queue.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(frame_size: usize) -> Arc<FramePool> {
        Arc::new(FramePool::new(frame_size))
    }

    fn frame_channel(capacity: usize, pool: Arc<FramePool>) -> (FrameSender, FrameReceiver) {
        super::frame_channel(capacity, pool, Arc::new(AtomicU64::new(0)))
    }

    fn frame_from(pool: &FramePool, fill: u8) -> Frame {
        let mut buffer = pool.rent();
        buffer.fill(fill);
        Frame {
            valid_len: buffer.len(),
            buffer,
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let pool = test_pool(4);
        let (tx, rx) = frame_channel(3, pool.clone());
        tx.try_send(frame_from(&pool, 1));
        tx.try_send(frame_from(&pool, 2));

        assert_eq!(rx.recv().await.unwrap().buffer[0], 1);
        assert_eq!(rx.recv().await.unwrap().buffer[0], 2);
    }

    #[tokio::test]
    async fn test_drop_oldest_on_overflow() {
        let pool = test_pool(4);
        let (tx, rx) = frame_channel(3, pool.clone());
        for fill in 1..=5 {
            tx.try_send(frame_from(&pool, fill));
        }

        assert_eq!(tx.dropped_count(), 2);
        // Oldest two (1 and 2) were dropped; their buffers went back to the
        // pool, so the pool balance is the three in-flight frames.
        assert_eq!(pool.outstanding(), 3);
        assert_eq!(rx.recv().await.unwrap().buffer[0], 3);
        assert_eq!(rx.recv().await.unwrap().buffer[0], 4);
        assert_eq!(rx.recv().await.unwrap().buffer[0], 5);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let pool = test_pool(4);
        let (tx, rx) = frame_channel(3, pool.clone());
        tx.try_send(frame_from(&pool, 7));
        tx.close();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.buffer[0], 7);
        pool.release(frame.buffer);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_recycles() {
        let pool = test_pool(4);
        let (tx, _rx) = frame_channel(3, pool.clone());
        tx.close();
        tx.try_send(frame_from(&pool, 9));
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_teardown_returns_queued_buffers() {
        let pool = test_pool(4);
        let (tx, rx) = frame_channel(3, pool.clone());
        tx.try_send(frame_from(&pool, 1));
        tx.try_send(frame_from(&pool, 2));
        drop(tx);
        drop(rx);
        assert_eq!(pool.outstanding(), 0);
    }
}
