use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            failures: 0,
            max_attempts: self.max_attempts.max(1),
            next_delay: self.initial_delay.min(self.max_delay),
            max_delay: self.max_delay,
            multiplier: self.multiplier.max(1),
        }
    }
}

/// Retry state for one request: failures so far and the delay before the next attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    failures: u32,
    max_attempts: u32,
    next_delay: Duration,
    max_delay: Duration,
    multiplier: u32,
}

impl Backoff {
    /// Record a failed attempt and return how long to wait before the next one,
    /// or `None` once every attempt has been spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return None;
        }

        let delay = self.next_delay;
        self.next_delay = delay
            .checked_mul(self.multiplier)
            .map_or(self.max_delay, |d| d.min(self.max_delay));
        Some(delay)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_doubles() {
        let mut backoff = RetryPolicy::default().backoff();

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.failures(), 4);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            multiplier: 3,
        };
        let delays: Vec<_> = std::iter::from_fn({
            let mut backoff = policy.backoff();
            move || backoff.next_delay()
        })
        .collect();

        assert_eq!(delays.len(), 9);
        assert_eq!(delays[0], Duration::from_secs(4));
        assert_eq!(delays[1], Duration::from_secs(10));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(10)));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff().next_delay(), None);
    }

    #[test]
    fn test_delays_never_shrink() {
        let mut backoff = RetryPolicy {
            max_attempts: 40,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_secs(u64::MAX / 4),
            multiplier: 7,
        }
        .backoff();

        let mut previous = Duration::ZERO;
        while let Some(delay) = backoff.next_delay() {
            assert!(delay >= previous);
            previous = delay;
        }
    }
}
