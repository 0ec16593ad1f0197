//! Reconnect backoff schedule.

use std::time::Duration;

/// Escalating delays between reconnect attempts, in seconds.
const SCHEDULE: [u64; 7] = [60, 120, 240, 480, 960, 1920, 3840];

/// Walks the fixed backoff schedule. Once the schedule is exhausted the
/// last delay repeats; retries continue until cancelled rather than
/// giving up.
#[derive(Debug, Clone, Default)]
pub struct ReconnectPolicy {
    attempt: usize,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// The delay to wait before the next attempt, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = Self::delay_for(self.attempt);
        self.attempt += 1;
        delay
    }

    /// The delay before attempt `attempt` (zero-based), without advancing.
    pub fn delay_for(attempt: usize) -> Duration {
        let index = attempt.min(SCHEDULE.len() - 1);
        Duration::from_secs(SCHEDULE[index])
    }

    /// Number of attempts consumed so far.
    pub fn attempts(&self) -> usize {
        self.attempt
    }

    /// Rewinds to the start of the schedule (after a successful connect).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_values() {
        let mut policy = ReconnectPolicy::new();
        let expected = [60, 120, 240, 480, 960, 1920, 3840];
        for secs in expected {
            assert_eq!(policy.next_delay(), Duration::from_secs(secs));
        }
    }

    #[test]
    fn test_last_delay_repeats() {
        let mut policy = ReconnectPolicy::new();
        for _ in 0..7 {
            policy.next_delay();
        }
        // past the end of the schedule the final delay repeats
        assert_eq!(policy.next_delay(), Duration::from_secs(3840));
        assert_eq!(policy.next_delay(), Duration::from_secs(3840));
        assert_eq!(policy.attempts(), 9);
    }

    #[test]
    fn test_reset() {
        let mut policy = ReconnectPolicy::new();
        policy.next_delay();
        policy.next_delay();
        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_delay(), Duration::from_secs(60));
    }
}
