//! Support for retrying connections to the broker.
//!
//! Only connection establishment is retried.  Queue operations are never retried, since a
//! repeated publish or fetch could change the outcome of the protocol.

use backoff::backoff::Backoff as BackoffTrait;
use backoff::ExponentialBackoff;
use std::time::Duration;

/// Configuration for retrying broker connections.
#[derive(Debug, Clone)]
pub struct Retry {
    /// Number of retries (not counting the first try) when the broker cannot be reached.
    /// Zero to disable retries entirely. (default 3)
    pub retries: u32,

    /// Maximum interval between retries (default 2s)
    pub max_delay: Duration,

    /// Factor for delay: 2 ^ retry * delay_factor (default 50ms)
    pub delay_factor: Duration,

    /// Randomization factor added as
    /// delay = delay * random([1 - randomizationFactor; 1 + randomizationFactor]) (default 0.25)
    pub randomization_factor: f64,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            retries: 3,
            max_delay: Duration::from_secs(2),
            delay_factor: Duration::from_millis(50),
            randomization_factor: 0.25,
        }
    }
}

impl Retry {
    /// A Retry that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            retries: 0,
            ..Default::default()
        }
    }
}

/// Backoff tracker for a single connection attempt sequence.
#[derive(Debug)]
pub(crate) struct Backoff<'a> {
    retry: &'a Retry,
    tries: u32,
    backoff: ExponentialBackoff,
}

impl<'a> Backoff<'a> {
    pub(crate) fn new(retry: &'a Retry) -> Self {
        let mut backoff = ExponentialBackoff {
            max_elapsed_time: None, // retries are counted instead
            max_interval: retry.max_delay,
            initial_interval: retry.delay_factor,
            multiplier: 2.0,
            #[cfg(not(test))]
            randomization_factor: retry.randomization_factor,
            #[cfg(test)]
            randomization_factor: 0.0,
            ..Default::default()
        };
        backoff.reset();
        Backoff {
            retry,
            tries: 0,
            backoff,
        }
    }

    /// Return the next backoff interval or, if the connection should not be retried, None.
    pub(crate) fn next_backoff(&mut self) -> Option<Duration> {
        self.tries += 1;
        if self.tries > self.retry.retries {
            None
        } else {
            self.backoff.next_backoff()
        }
    }
}
