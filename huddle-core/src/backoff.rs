// ABOUTME: Exponential backoff state for relay link reconnection.
// ABOUTME: Delay doubles per involuntary close, capped; a successful open resets the counter.

use std::time::Duration;

/// Reconnect tuning for a relay link.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling applied to the doubled delay.
    pub max_delay: Duration,
    /// Maximum consecutive attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

/// Tracks consecutive involuntary closes for one logical stream.
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// A connection opened successfully: the next failure starts from the
    /// base delay again.
    pub fn record_open(&mut self) {
        self.attempt = 0;
    }

    /// Record an involuntary close and return the delay before the next
    /// attempt, or None once the attempt ceiling is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.policy.max_attempts > 0 && self.attempt >= self.policy.max_attempts {
            return None;
        }
        // base * 2^attempt, saturating well past any sane cap.
        let shift = self.attempt.min(20);
        let delay = self
            .policy
            .base_delay
            .saturating_mul(1u32 << shift)
            .min(self.policy.max_delay);
        self.attempt += 1;
        Some(delay)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64, attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            max_attempts: attempts,
        }
    }

    #[test]
    fn test_delays_double_up_to_cap() {
        let mut state = RetryState::new(policy(1000, 8000, 0));
        assert_eq!(state.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(state.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(state.next_delay(), Some(Duration::from_millis(4000)));
        assert_eq!(state.next_delay(), Some(Duration::from_millis(8000)));
        // Capped from here on.
        assert_eq!(state.next_delay(), Some(Duration::from_millis(8000)));
        assert_eq!(state.attempt(), 5);
    }

    #[test]
    fn test_open_resets_attempt_counter() {
        let mut state = RetryState::new(policy(1000, 8000, 0));
        state.next_delay();
        state.next_delay();
        state.next_delay();
        assert_eq!(state.attempt(), 3);

        state.record_open();
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.next_delay(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_attempt_ceiling_exhausts() {
        let mut state = RetryState::new(policy(10, 100, 3));
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_some());
        assert_eq!(state.next_delay(), None);
    }

    #[test]
    fn test_zero_ceiling_means_unlimited() {
        let mut state = RetryState::new(policy(10, 100, 0));
        for _ in 0..64 {
            assert!(state.next_delay().is_some());
        }
    }
}
