//! Exact-size frame buffer pool.
//!
//! General-purpose pools round sizes up to a power of two, which wastes
//! close to half the allocation for typical video frame sizes. This pool
//! only ever hands out buffers of exactly `frame_size` bytes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::constants::MAX_POOL_SIZE;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStats {
    pub allocations: u64,
    pub pool_hits: u64,
}

impl PoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.allocations + self.pool_hits;
        if total == 0 {
            0.0
        } else {
            self.pool_hits as f64 / total as f64
        }
    }
}

pub struct FramePool {
    frame_size: usize,
    max_pool_size: usize,
    idle: Mutex<Vec<Vec<u8>>>,
    allocations: AtomicU64,
    pool_hits: AtomicU64,
    rented: AtomicU64,
    released: AtomicU64,
}

impl FramePool {
    pub fn new(frame_size: usize) -> Self {
        Self::with_capacity(frame_size, MAX_POOL_SIZE)
    }

    pub fn with_capacity(frame_size: usize, max_pool_size: usize) -> Self {
        Self {
            frame_size,
            max_pool_size,
            idle: Mutex::new(Vec::with_capacity(max_pool_size)),
            allocations: AtomicU64::new(0),
            pool_hits: AtomicU64::new(0),
            rented: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Never fails: falls back to a fresh allocation when the pool is empty.
    pub fn rent(&self) -> Vec<u8> {
        self.rented.fetch_add(1, Ordering::Relaxed);
        let pooled = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        match pooled {
            Some(buffer) => {
                self.pool_hits.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                vec![0u8; self.frame_size]
            }
        }
    }

    /// Returns a buffer to the pool. Wrong-size buffers and overflow beyond
    /// `max_pool_size` are released to the allocator instead.
    pub fn release(&self, buffer: Vec<u8>) {
        self.released.fetch_add(1, Ordering::Relaxed);
        if buffer.len() != self.frame_size {
            log::warn!(
                "released buffer of {} bytes into a pool of {}-byte frames",
                buffer.len(),
                self.frame_size
            );
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_pool_size {
                idle.push(buffer);
            }
        }
    }

    pub fn warmup(&self, count: usize) {
        if let Ok(mut idle) = self.idle.lock() {
            while idle.len() < count.min(self.max_pool_size) {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                idle.push(vec![0u8; self.frame_size]);
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
        }
    }

    /// Buffers rented but not yet released. Zero at shutdown means no frame
    /// leaked and none was returned twice.
    pub fn outstanding(&self) -> i64 {
        self.rented.load(Ordering::Relaxed) as i64 - self.released.load(Ordering::Relaxed) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rent_exact_size() {
        let pool = FramePool::new(1920 * 1080 * 4);
        let buffer = pool.rent();
        assert_eq!(buffer.len(), 1920 * 1080 * 4);
    }

    #[test]
    fn test_release_then_rent_hits_pool() {
        let pool = FramePool::new(64);
        let buffer = pool.rent();
        pool.release(buffer);
        let _ = pool.rent();

        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.pool_hits, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_capacity_cap() {
        let pool = FramePool::with_capacity(16, 2);
        let buffers: Vec<_> = (0..4).map(|_| pool.rent()).collect();
        for buffer in buffers {
            pool.release(buffer);
        }
        // Only two were retained; the next two rents hit, the third allocates.
        pool.rent();
        pool.rent();
        pool.rent();
        assert_eq!(pool.stats().pool_hits, 2);
    }

    #[test]
    fn test_wrong_size_release_discarded() {
        let pool = FramePool::new(32);
        pool.release(vec![0u8; 8]);
        let _ = pool.rent();
        assert_eq!(pool.stats().pool_hits, 0);
    }

    #[test]
    fn test_warmup() {
        let pool = FramePool::new(16);
        pool.warmup(4);
        for _ in 0..4 {
            let _ = pool.rent();
        }
        assert_eq!(pool.stats().pool_hits, 4);
        assert_eq!(pool.stats().allocations, 4);
    }

    #[test]
    fn test_outstanding_bookkeeping() {
        let pool = FramePool::new(16);
        let a = pool.rent();
        let b = pool.rent();
        assert_eq!(pool.outstanding(), 2);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.outstanding(), 0);
    }
}
