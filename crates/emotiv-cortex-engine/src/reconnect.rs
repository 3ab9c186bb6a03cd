//! Exponential backoff between connection attempts.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Delay schedule for the supervisor's reconnect loop.
///
/// Starts at `base_delay_secs`, doubles after every failure, and is capped at
/// `max_delay_secs`. A successful connection resets it.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    /// 0 means unlimited.
    max_attempts: u32,
    attempts: u32,
    next: Duration,
}

impl Backoff {
    pub(crate) fn new(config: &ReconnectConfig) -> Self {
        let base = Duration::from_secs(config.base_delay_secs);
        Self {
            base,
            max: Duration::from_secs(config.max_delay_secs).max(base),
            max_attempts: config.max_attempts,
            attempts: 0,
            next: base,
        }
    }

    /// Delay before the next attempt, or `None` once the attempts are exhausted.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts != 0 && self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        let delay = self.next;
        self.next = std::cmp::min(self.next.saturating_mul(2), self.max);
        Some(delay)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
        self.next = self.base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: u64, max: u64, attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            enabled: true,
            base_delay_secs: base,
            max_delay_secs: max,
            max_attempts: attempts,
        }
    }

    #[test]
    fn test_doubles_up_to_cap() {
        let mut backoff = Backoff::new(&config(1, 5, 0));
        let delays: Vec<u64> = (0..5)
            .map(|_| backoff.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_attempt_limit() {
        let mut backoff = Backoff::new(&config(1, 60, 2));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_max_below_base_uses_base() {
        let mut backoff = Backoff::new(&config(3, 1, 0));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(3)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(3)));
    }
}
