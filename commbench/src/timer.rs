//! Wall-clock interval accumulation.

use std::time::{Duration, Instant};

/// Accumulates elapsed time across intervals.
#[derive(Debug, Clone, Default)]
pub struct ParamTimer {
    elapsed: Duration,
    intervals: u64,
}

impl ParamTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn add(&mut self, interval: Duration) {
        self.elapsed += interval;
        self.intervals += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_ns(&self) -> f64 {
        self.elapsed.as_nanos() as f64
    }

    pub fn elapsed_us(&self) -> f64 {
        self.elapsed_ns() / 1e3
    }

    pub fn intervals(&self) -> u64 {
        self.intervals
    }
}

/// Scoped interval: starts on creation, adds its duration to the timer and
/// logs it when dropped.
pub struct Profile<'a> {
    timer: &'a mut ParamTimer,
    section: &'static str,
    start: Instant,
}

impl<'a> Profile<'a> {
    pub fn start(timer: &'a mut ParamTimer, section: &'static str) -> Self {
        Self {
            timer,
            section,
            start: Instant::now(),
        }
    }
}

impl Drop for Profile<'_> {
    fn drop(&mut self) {
        let interval = self.start.elapsed();
        self.timer.add(interval);
        tracing::debug!(
            section = self.section,
            elapsed_us = interval.as_secs_f64() * 1e6,
            "profiled interval"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates() {
        let mut t = ParamTimer::new();
        t.add(Duration::from_micros(3));
        t.add(Duration::from_micros(5));
        assert_eq!(t.elapsed_ns(), 8_000.0);
        assert_eq!(t.elapsed_us(), 8.0);
        assert_eq!(t.intervals(), 2);
        t.reset();
        assert_eq!(t.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_profile_adds_on_drop() {
        let mut t = ParamTimer::new();
        {
            let _p = Profile::start(&mut t, "test");
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(t.intervals(), 1);
        assert!(t.elapsed() >= Duration::from_millis(2));
    }
}
