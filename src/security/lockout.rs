//! Brute-force lockout: failed PIN attempts per caller in a trailing window.
//!
//! State lives in memory only and does not survive a restart.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LOCKOUT_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug)]
pub struct LockoutTracker {
    max_attempts: u32,
    window: Duration,
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Default for LockoutTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_LOCKOUT_WINDOW)
    }
}

/// Drop attempts that have left the trailing window.
fn evict(attempts: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while attempts
        .front()
        .is_some_and(|oldest| now.duration_since(*oldest) >= window)
    {
        attempts.pop_front();
    }
}

impl LockoutTracker {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            window,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a failed attempt. Returns the number of attempts now counted
    /// in the window.
    pub fn record_failure(&self, caller: &str) -> u32 {
        let now = Instant::now();
        let mut map = self.attempts.lock();
        let attempts = map.entry(caller.to_string()).or_default();
        evict(attempts, self.window, now);
        attempts.push_back(now);
        let count = attempts.len() as u32;
        debug!("Failed attempt {} for {}", count, caller);
        count
    }

    /// Reserve an attempt for `caller` before the PIN is checked. Returns
    /// `None` when the caller is locked out.
    ///
    /// The check and the reservation happen under one lock, so concurrent
    /// attempts for the same caller never exceed `max_attempts`. The slot
    /// counts as a failure unless [`AttemptGuard::succeed`] is called.
    pub fn try_begin_attempt(&self, caller: &str) -> Option<AttemptGuard<'_>> {
        let now = Instant::now();
        let mut map = self.attempts.lock();
        let attempts = map.entry(caller.to_string()).or_default();
        evict(attempts, self.window, now);
        if attempts.len() as u32 >= self.max_attempts {
            return None;
        }
        attempts.push_back(now);
        Some(AttemptGuard {
            tracker: self,
            caller: caller.to_string(),
        })
    }

    /// Attempts currently counted against `caller`.
    pub fn attempts_in_window(&self, caller: &str) -> u32 {
        let now = Instant::now();
        let mut map = self.attempts.lock();
        match map.get_mut(caller) {
            Some(attempts) => {
                evict(attempts, self.window, now);
                attempts.len() as u32
            }
            None => 0,
        }
    }

    pub fn is_locked_out(&self, caller: &str) -> bool {
        self.attempts_in_window(caller) >= self.max_attempts
    }

    pub fn remaining_attempts(&self, caller: &str) -> u32 {
        self.max_attempts
            .saturating_sub(self.attempts_in_window(caller))
    }

    /// Time until `caller` drops below the threshold, if locked.
    pub fn retry_after(&self, caller: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut map = self.attempts.lock();
        let attempts = map.get_mut(caller)?;
        evict(attempts, self.window, now);

        let count = attempts.len();
        let max = self.max_attempts as usize;
        if count < max {
            return None;
        }
        // The lock lifts once enough of the oldest attempts expire.
        let pivot = attempts[count - max];
        Some((pivot + self.window).saturating_duration_since(now))
    }

    /// Forget all attempts for `caller`.
    pub fn clear(&self, caller: &str) {
        self.attempts.lock().remove(caller);
    }

    /// Evict stale attempts for every caller and drop empty windows.
    /// Returns the number of callers removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut map = self.attempts.lock();
        let before = map.len();
        map.retain(|_, attempts| {
            evict(attempts, self.window, now);
            !attempts.is_empty()
        });
        before - map.len()
    }

    pub fn tracked_callers(&self) -> usize {
        self.attempts.lock().len()
    }
}

/// An attempt reserved by [`LockoutTracker::try_begin_attempt`].
#[must_use = "the attempt is counted as failed unless it succeeds"]
pub struct AttemptGuard<'a> {
    tracker: &'a LockoutTracker,
    caller: String,
}

impl AttemptGuard<'_> {
    /// The PIN verified; forget every attempt for this caller.
    pub fn succeed(self) {
        self.tracker.clear(&self.caller);
    }

    /// The PIN was wrong; the reservation stays counted. Returns the
    /// attempts now in the window.
    pub fn fail(self) -> u32 {
        let count = self.tracker.attempts_in_window(&self.caller);
        debug!("Failed attempt {} for {}", count, self.caller);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn locks_after_max_attempts() {
        let tracker = LockoutTracker::new(3, Duration::from_secs(60));
        assert!(!tracker.is_locked_out("cli:alice"));
        assert_eq!(tracker.remaining_attempts("cli:alice"), 3);

        tracker.record_failure("cli:alice");
        tracker.record_failure("cli:alice");
        assert!(!tracker.is_locked_out("cli:alice"));
        assert_eq!(tracker.remaining_attempts("cli:alice"), 1);
        assert!(tracker.retry_after("cli:alice").is_none());

        tracker.record_failure("cli:alice");
        assert!(tracker.is_locked_out("cli:alice"));
        assert_eq!(tracker.remaining_attempts("cli:alice"), 0);

        let retry = tracker.retry_after("cli:alice").unwrap();
        assert!(retry <= Duration::from_secs(60));
        assert!(retry > Duration::from_secs(50));
    }

    #[test]
    fn clear_unlocks_immediately() {
        let tracker = LockoutTracker::new(2, Duration::from_secs(60));
        tracker.record_failure("cli:alice");
        tracker.record_failure("cli:alice");
        assert!(tracker.is_locked_out("cli:alice"));

        tracker.clear("cli:alice");
        assert!(!tracker.is_locked_out("cli:alice"));
        assert_eq!(tracker.remaining_attempts("cli:alice"), 2);
    }

    #[test]
    fn callers_are_independent() {
        let tracker = LockoutTracker::new(1, Duration::from_secs(60));
        tracker.record_failure("cli:alice");
        assert!(tracker.is_locked_out("cli:alice"));
        assert!(!tracker.is_locked_out("cli:bob"));
    }

    #[test]
    fn old_attempts_leave_the_window() {
        let tracker = LockoutTracker::new(2, Duration::from_millis(100));
        tracker.record_failure("cli:alice");
        tracker.record_failure("cli:alice");
        assert!(tracker.is_locked_out("cli:alice"));

        thread::sleep(Duration::from_millis(150));
        assert!(!tracker.is_locked_out("cli:alice"));
        assert_eq!(tracker.attempts_in_window("cli:alice"), 0);

        // Only the fresh attempt counts.
        assert_eq!(tracker.record_failure("cli:alice"), 1);
    }

    #[test]
    fn prune_drops_stale_callers() {
        let tracker = LockoutTracker::new(3, Duration::from_millis(50));
        tracker.record_failure("cli:alice");
        tracker.record_failure("cli:bob");
        assert_eq!(tracker.tracked_callers(), 2);

        thread::sleep(Duration::from_millis(80));
        tracker.record_failure("cli:bob");

        assert_eq!(tracker.prune(), 1);
        assert_eq!(tracker.tracked_callers(), 1);
    }

    #[test]
    fn zero_max_attempts_is_clamped() {
        let tracker = LockoutTracker::new(0, Duration::from_secs(60));
        assert_eq!(tracker.max_attempts(), 1);
        assert!(!tracker.is_locked_out("cli:alice"));
    }

    #[test]
    fn concurrent_failures_are_all_counted() {
        let tracker = Arc::new(LockoutTracker::new(500, Duration::from_secs(60)));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = tracker.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let caller = if i % 2 == 0 { "cli:alice" } else { "cli:bob" };
                    barrier.wait();
                    for _ in 0..25 {
                        tracker.record_failure(caller);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(tracker.attempts_in_window("cli:alice"), 100);
        assert_eq!(tracker.attempts_in_window("cli:bob"), 100);
    }

    #[test]
    fn reservation_counts_until_success() {
        let tracker = LockoutTracker::new(2, Duration::from_secs(60));

        let first = tracker.try_begin_attempt("cli:alice").unwrap();
        assert_eq!(tracker.remaining_attempts("cli:alice"), 1);
        assert_eq!(first.fail(), 1);

        let second = tracker.try_begin_attempt("cli:alice").unwrap();
        second.succeed();
        assert_eq!(tracker.attempts_in_window("cli:alice"), 0);

        tracker.try_begin_attempt("cli:alice").unwrap().fail();
        tracker.try_begin_attempt("cli:alice").unwrap().fail();
        assert!(tracker.try_begin_attempt("cli:alice").is_none());
        assert!(tracker.is_locked_out("cli:alice"));
    }

    #[test]
    fn concurrent_reservations_respect_limit() {
        let tracker = Arc::new(LockoutTracker::new(3, Duration::from_secs(60)));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    match tracker.try_begin_attempt("cli:mallory") {
                        Some(attempt) => {
                            // Hold the slot while the PIN would be hashed.
                            thread::sleep(Duration::from_millis(20));
                            attempt.fail();
                            true
                        }
                        None => false,
                    }
                })
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 3);
        assert!(tracker.is_locked_out("cli:mallory"));
    }
}
