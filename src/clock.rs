//! Monotonic tick source shared by capture pacing and audio sync offsets.

use std::time::Instant;

use crate::constants::TICKS_PER_SECOND;

/// One clock per recorder instance. Ticks are microseconds since the clock
/// was created and are never affected by wall-clock adjustments.
#[derive(Debug)]
pub struct RecorderClock {
    origin: Instant,
}

impl RecorderClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    pub fn ticks_per_frame(fps: u32) -> u64 {
        TICKS_PER_SECOND / fps.max(1) as u64
    }

    pub fn ticks_to_millis(ticks: u64) -> u64 {
        ticks / (TICKS_PER_SECOND / 1_000)
    }

    pub fn ticks_to_secs(ticks: u64) -> f64 {
        ticks as f64 / TICKS_PER_SECOND as f64
    }
}

impl Default for RecorderClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped request for 1 ms OS timer resolution. Acquired when recording
/// starts, released on pause/dispose. The short sleeps in the capture
/// pacing loop rely on this being active.
#[derive(Debug)]
pub struct TimerResolution {
    active: bool,
}

impl TimerResolution {
    #[cfg(windows)]
    pub fn acquire() -> Self {
        use windows::Win32::Media::{timeBeginPeriod, TIMERR_NOERROR};

        let active = unsafe { timeBeginPeriod(1) } == TIMERR_NOERROR;
        if !active {
            log::warn!("timeBeginPeriod(1) rejected; capture pacing may jitter");
        }
        Self { active }
    }

    #[cfg(not(windows))]
    pub fn acquire() -> Self {
        Self { active: false }
    }
}

impl Drop for TimerResolution {
    fn drop(&mut self) {
        #[cfg(windows)]
        if self.active {
            use windows::Win32::Media::timeEndPeriod;
            unsafe {
                timeEndPeriod(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_monotonic() {
        let clock = RecorderClock::new();
        let a = clock.ticks();
        let b = clock.ticks();
        assert!(b >= a);
    }

    #[test]
    fn test_ticks_per_frame() {
        assert_eq!(RecorderClock::ticks_per_frame(60), 16_666);
        assert_eq!(RecorderClock::ticks_per_frame(30), 33_333);
        // Zero fps must not panic
        assert_eq!(RecorderClock::ticks_per_frame(0), TICKS_PER_SECOND);
    }

    #[test]
    fn test_tick_conversions() {
        assert_eq!(RecorderClock::ticks_to_millis(2_500_000), 2_500);
        assert!((RecorderClock::ticks_to_secs(1_500_000) - 1.5).abs() < f64::EPSILON);
    }
}
