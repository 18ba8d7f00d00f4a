/*
    backoff.rs - Exponential reconnect backoff

    Per-peer retry state: the delay grows by the configured multiplier on
    every failure, is capped at the maximum, and gets a small random
    jitter so a restarted mesh does not redial in lockstep.
*/

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Retry delay generator for one peer address
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Backoff { config, attempts: 0 }
    }

    /// Delay before the next attempt, advancing the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempts.min(24); // avoid f64 overflow
        self.attempts = self.attempts.saturating_add(1);

        let base = self.config.initial.as_millis() as f64
            * self.config.multiplier.powi(exponent as i32);
        let capped = base.min(self.config.max.as_millis() as f64);

        // Up to 10% jitter
        let jitter = rand::thread_rng().gen_range(0.0..=0.1) * capped;
        Duration::from_millis((capped + jitter) as u64)
    }

    /// Connection succeeded; start over from the initial delay
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_ms: u64, multiplier: f64, max_ms: u64) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(initial_ms),
            multiplier,
            max: Duration::from_millis(max_ms),
        }
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let mut backoff = Backoff::new(config(100, 2.0, 60_000));

        let first = backoff.next_delay();
        let second = backoff.next_delay();
        let third = backoff.next_delay();

        // Jitter adds at most 10%
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(220));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(440));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let mut backoff = Backoff::new(config(100, 10.0, 1_000));
        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_millis(1_100));
        }
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = Backoff::new(config(100, 2.0, 60_000));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(110));
    }
}
