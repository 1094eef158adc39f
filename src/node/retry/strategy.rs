use rand::random;
use std::time::Duration;

/// How long a dropped node waits before each reconnection attempt.
///
/// Lavalink nodes usually drop for restarts or redeploys, which take a
/// predictable amount of time, so a fixed delay is the default. Backoff suits
/// nodes behind load balancers which may refuse connections for longer.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum Strategy {
    /// Wait the same delay before every attempt.
    Every(Duration),
    /// Double the delay after every failed attempt, with jitter.
    Backoff(ExponentialBackoff),
}

impl Strategy {
    /// Delay before the next attempt, given the delay used before the last one
    /// in this outage.
    pub(crate) fn retry_in(&self, last_wait: Option<Duration>) -> Duration {
        match self {
            Self::Every(delay) => *delay,
            Self::Backoff(backoff) => backoff.retry_in(last_wait),
        }
    }
}

/// Doubling reconnection delay, randomised so that the clients of a restarted
/// node do not all reconnect at once.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first attempt of an outage, and the shortest delay used.
    ///
    /// *Defaults to 1s.*
    pub min: Duration,
    /// Longest delay used. Values below `min` are treated as `min`.
    ///
    /// *Defaults to 60s.*
    pub max: Duration,
    /// Fraction of each delay which may be randomly added or removed,
    /// between 0 and 1.
    ///
    /// *Defaults to `0.1`.*
    pub jitter: f32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl ExponentialBackoff {
    pub(crate) fn retry_in(&self, last_wait: Option<Duration>) -> Duration {
        let base = match last_wait {
            Some(last) => last.saturating_mul(2),
            None => self.min,
        };

        self.jittered(base, random::<f32>())
            .clamp(self.min, self.ceiling())
    }

    /// Scales `base` by a factor in `[1 - jitter, 1 + jitter]`, picked by
    /// `sample` in `[0, 1)`.
    fn jittered(&self, base: Duration, sample: f32) -> Duration {
        let spread = self.jitter.clamp(0.0, 1.0);
        base.mul_f32(1.0 + spread * (2.0 * sample - 1.0))
    }

    fn ceiling(&self) -> Duration {
        self.max.max(self.min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_spreads_around_the_base_delay() {
        let backoff = ExponentialBackoff {
            jitter: 0.25,
            ..Default::default()
        };
        let base = Duration::from_secs(8);

        assert_eq!(backoff.jittered(base, 0.0), Duration::from_secs(6));
        assert_eq!(backoff.jittered(base, 0.5), base);
        assert!(backoff.jittered(base, 0.999) <= Duration::from_secs(10));
    }

    #[test]
    fn delays_double_until_the_ceiling() {
        let backoff = ExponentialBackoff {
            min: Duration::from_secs(1),
            max: Duration::from_secs(5),
            jitter: 0.0,
        };

        let first = backoff.retry_in(None);
        let second = backoff.retry_in(Some(first));
        let third = backoff.retry_in(Some(second));
        let capped = backoff.retry_in(Some(Duration::from_secs(4)));

        assert_eq!(first, Duration::from_secs(1));
        assert_eq!(second, Duration::from_secs(2));
        assert_eq!(third, Duration::from_secs(4));
        assert_eq!(capped, Duration::from_secs(5));
    }

    #[test]
    fn inverted_bounds_use_the_minimum() {
        let backoff = ExponentialBackoff {
            min: Duration::from_secs(10),
            max: Duration::from_secs(1),
            jitter: 0.0,
        };

        assert_eq!(backoff.retry_in(Some(Duration::from_secs(30))), Duration::from_secs(10));
    }
}
