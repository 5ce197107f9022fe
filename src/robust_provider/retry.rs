use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};

/// Default timeout for a single attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default first backoff delay.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);
/// Default cap on a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
/// Default total budget for one logical call.
pub const DEFAULT_MAX_ELAPSED_TIME: Duration = Duration::from_secs(5 * 60);

/// Backoff and timeout settings for one logical call.
///
/// Delays start at `initial_interval` and double after each failure up to `max_interval`.
/// Retrying stops once the next delay would push the total time spent past
/// `max_elapsed_time`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_MIN_DELAY,
            max_interval: DEFAULT_MAX_DELAY,
            max_elapsed_time: DEFAULT_MAX_ELAPSED_TIME,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// A policy that waits `interval` between every attempt.
    #[must_use]
    pub fn fixed_interval(interval: Duration) -> Self {
        Self { initial_interval: interval, max_interval: interval, ..Self::default() }
    }

    /// A policy that never sleeps and gives up after the first failure.
    #[must_use]
    pub fn fragile() -> Self {
        Self {
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            max_elapsed_time: Duration::ZERO,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    #[must_use]
    pub fn max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    #[must_use]
    pub fn max_elapsed_time(mut self, budget: Duration) -> Self {
        self.max_elapsed_time = budget;
        self
    }

    #[must_use]
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Infinite iterator over the delays between attempts.
    ///
    /// The total budget is enforced by the caller, not by the iterator.
    pub(crate) fn backoff(&self) -> ExponentialBackoff {
        let max = self.max_interval.max(self.initial_interval);
        ExponentialBuilder::default()
            .with_min_delay(self.initial_interval)
            .with_max_delay(max)
            .with_factor(2.0)
            .with_max_times(usize::MAX)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::default()
            .initial_interval(Duration::from_secs(1))
            .max_interval(Duration::from_secs(5));

        let delays: Vec<_> = policy.backoff().take(5).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 5, 5].map(Duration::from_secs).to_vec(),
        );
    }

    #[test]
    fn fixed_interval_never_grows() {
        let policy = RetryPolicy::fixed_interval(Duration::from_millis(250));
        assert!(policy.backoff().take(4).all(|d| d == Duration::from_millis(250)));
    }
}
