//! Configuration for node reconnection.

mod strategy;

pub use self::strategy::*;

use crate::constants::{DEFAULT_RECONNECT_DELAY, DEFAULT_RECONNECT_TRIES};

/// Configuration used when reconnecting to a node after its connection drops.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Retry {
    /// Strategy used to determine how long to wait between retry attempts.
    ///
    /// *Defaults to waiting [`DEFAULT_RECONNECT_DELAY`] between each attempt.*
    ///
    /// [`DEFAULT_RECONNECT_DELAY`]: crate::constants::DEFAULT_RECONNECT_DELAY
    pub strategy: Strategy,
    /// The maximum number of reconnection attempts in one outage.
    ///
    /// `None` will attempt an infinite number of retries,
    /// while `Some(0)` gives up as soon as the connection drops.
    ///
    /// *Defaults to `Some(5)`.*
    pub retry_limit: Option<usize>,
}

impl Retry {
    /// Whether `attempt` (counting from 1) exceeds the retry limit.
    pub(crate) fn exhausted(&self, attempt: usize) -> bool {
        self.retry_limit.map_or(false, |limit| attempt > limit)
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            strategy: Strategy::Every(DEFAULT_RECONNECT_DELAY),
            retry_limit: Some(DEFAULT_RECONNECT_TRIES),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn limit_counts_retries_not_connections() {
        let retry = Retry::default();

        assert!(!retry.exhausted(1));
        assert!(!retry.exhausted(5));
        assert!(retry.exhausted(6));

        let forever = Retry {
            retry_limit: None,
            ..retry
        };
        assert!(!forever.exhausted(usize::MAX));
    }

    #[test]
    fn backoff_stays_in_bounds() {
        let backoff = ExponentialBackoff {
            min: Duration::from_millis(100),
            max: Duration::from_secs(1),
            jitter: 0.5,
        };

        let mut last = None;
        for _ in 0..20 {
            let wait = backoff.retry_in(last);
            assert!(wait >= backoff.min && wait <= backoff.max);
            last = Some(wait);
        }

        assert_eq!(
            Strategy::Every(Duration::from_secs(15)).retry_in(last),
            Duration::from_secs(15)
        );
    }
}
