//! Batch debounce timer
//!
//! Invalidations arm a deadline; each new one pushes it back, so a burst of
//! edits runs as a single batch once the graph has been quiet for the window.
//! Time is always passed in, which keeps the timer deterministic under test.

use std::time::{Duration, Instant};

/// Default quiet window before a batch runs
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct PendingBatch {
    window: Duration,
    deadline: Option<Instant>,
}

impl PendingBatch {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// (Re)start the window at `now`; the latest invalidation wins
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Time left until the deadline, zero once it has passed
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}

impl Default for PendingBatch {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unarmed_timer_is_never_due() {
        let timer = PendingBatch::default();
        assert!(!timer.is_due(Instant::now() + Duration::from_secs(10)));
        assert_eq!(timer.deadline(), None);
    }

    #[test]
    fn test_rearming_pushes_deadline_back() {
        let start = Instant::now();
        let mut timer = PendingBatch::default();
        timer.arm(start);
        timer.arm(start + Duration::from_millis(60));

        assert!(!timer.is_due(start + Duration::from_millis(100)));
        assert!(timer.is_due(start + Duration::from_millis(160)));
        assert_eq!(
            timer.remaining(start + Duration::from_millis(110)),
            Some(Duration::from_millis(50))
        );
    }

    #[test]
    fn test_cancel_disarms() {
        let start = Instant::now();
        let mut timer = PendingBatch::new(Duration::from_millis(5));
        timer.arm(start);
        timer.cancel();
        assert!(!timer.is_armed());
        assert!(!timer.is_due(start + Duration::from_secs(1)));
    }
}
