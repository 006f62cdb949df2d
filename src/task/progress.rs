//! Progress notification throttling
//!
//! Tight per-page loops can produce thousands of progress updates; each one
//! crosses a channel to the caller thread. The throttle bounds the event
//! volume by value delta and wall time without breaking the caller's
//! expectation of a monotone sequence that ends at 100.

use std::time::{Duration, Instant};

pub const DEFAULT_MIN_STEP: u8 = 1;
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(50);

/// Decides which progress values are worth delivering
#[derive(Debug)]
pub struct ProgressThrottle {
    min_step: u8,
    min_interval: Duration,
    last_value: Option<u8>,
    last_emit_at: Instant,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_STEP, DEFAULT_MIN_INTERVAL)
    }
}

impl ProgressThrottle {
    #[must_use]
    pub fn new(min_step: u8, min_interval: Duration) -> Self {
        Self {
            min_step: min_step.max(1),
            min_interval,
            last_value: None,
            last_emit_at: Instant::now(),
        }
    }

    /// Clamp `value` to `[0, 100]` and decide whether to emit it.
    ///
    /// Admits the first call, any 100, any step of at least `min_step`, and
    /// anything once `min_interval` wall time has passed since the last
    /// admitted value. Returns the clamped value when admitted.
    pub fn admit(&mut self, value: i64) -> Option<u8> {
        let value = value.clamp(0, 100) as u8;

        let due = match self.last_value {
            None => true,
            Some(last) => {
                value == 100
                    || value.abs_diff(last) >= self.min_step
                    || self.last_emit_at.elapsed() >= self.min_interval
            }
        };

        if due {
            self.last_value = Some(value);
            self.last_emit_at = Instant::now();
            Some(value)
        } else {
            None
        }
    }

    /// Forget emission history; called by the runner before each task
    pub fn reset(&mut self) {
        self.last_value = None;
        self.last_emit_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(min_step: u8) -> ProgressThrottle {
        // A long interval isolates the value-delta logic from timing
        ProgressThrottle::new(min_step, Duration::from_secs(3600))
    }

    #[test]
    fn first_call_is_always_admitted() {
        let mut t = throttle(10);
        assert_eq!(t.admit(0), Some(0));
    }

    #[test]
    fn hundred_is_always_admitted() {
        let mut t = throttle(10);
        assert_eq!(t.admit(95), Some(95));
        assert_eq!(t.admit(99), None);
        assert_eq!(t.admit(100), Some(100));
    }

    #[test]
    fn small_steps_are_suppressed() {
        let mut t = throttle(10);
        assert_eq!(t.admit(0), Some(0));
        assert_eq!(t.admit(3), None);
        assert_eq!(t.admit(9), None);
        assert_eq!(t.admit(10), Some(10));
    }

    #[test]
    fn values_clamp_to_percent_range() {
        let mut t = throttle(1);
        assert_eq!(t.admit(-5), Some(0));
        assert_eq!(t.admit(250), Some(100));
    }

    #[test]
    fn admitted_sequence_is_monotone_and_bounded() {
        let mut t = throttle(10);
        let mut emitted = vec![];
        for value in 0..=100 {
            if let Some(v) = t.admit(value) {
                emitted.push(v);
            }
        }
        assert!(emitted.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*emitted.first().unwrap(), 0);
        assert_eq!(*emitted.last().unwrap(), 100);
        // ceil(100/10) + 1 admissions at most
        assert!(emitted.len() <= 11, "emitted {} values", emitted.len());
    }

    #[test]
    fn elapsed_time_overrides_step_suppression() {
        let mut t = ProgressThrottle::new(50, Duration::from_millis(20));
        assert_eq!(t.admit(10), Some(10));
        assert_eq!(t.admit(11), None);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(t.admit(12), Some(12));
    }

    #[test]
    fn reset_forgets_history() {
        let mut t = throttle(10);
        assert_eq!(t.admit(40), Some(40));
        t.reset();
        assert_eq!(t.admit(41), Some(41));
    }
}
