/// Consecutive failed polls tolerated before a device is reported unavailable.
pub const FAILURE_THRESHOLD: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    BecameAvailable,
    BecameUnavailable,
    Unchanged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailureTracker {
    consecutive_failures: u32,
    available: bool,
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            available: true,
        }
    }
}

impl FailureTracker {
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn record_success(&mut self) -> Transition {
        self.consecutive_failures = 0;
        if self.available {
            Transition::Unchanged
        } else {
            self.available = true;
            Transition::BecameAvailable
        }
    }

    pub fn record_failure(&mut self) -> Transition {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.available && self.consecutive_failures > FAILURE_THRESHOLD {
            self.available = false;
            Transition::BecameUnavailable
        } else {
            Transition::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourth_failure_flips_availability() {
        let mut tracker = FailureTracker::default();
        for _ in 0..3 {
            assert_eq!(tracker.record_failure(), Transition::Unchanged);
            assert!(tracker.available());
        }
        assert_eq!(tracker.record_failure(), Transition::BecameUnavailable);
        assert!(!tracker.available());
        assert_eq!(tracker.consecutive_failures(), 4);

        assert_eq!(tracker.record_failure(), Transition::Unchanged);
        assert!(!tracker.available());
    }

    #[test]
    fn success_resets() {
        let mut tracker = FailureTracker::default();
        for _ in 0..5 {
            tracker.record_failure();
        }
        assert_eq!(tracker.record_success(), Transition::BecameAvailable);
        assert_eq!(tracker.consecutive_failures(), 0);
        assert!(tracker.available());
        assert_eq!(tracker.record_success(), Transition::Unchanged);
    }

    #[test]
    fn intermittent_failures_stay_available() {
        let mut tracker = FailureTracker::default();
        for _ in 0..10 {
            tracker.record_failure();
            tracker.record_failure();
            tracker.record_failure();
            tracker.record_success();
        }
        assert!(tracker.available());
        assert_eq!(tracker.consecutive_failures(), 0);
    }
}
