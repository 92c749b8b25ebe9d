//! Exponential backoff with jitter for reconnect delays.
//!
//! `delay = min(max, base * 2^attempt)`, widened by a uniform draw in
//! `±jitter * delay` and floored at `base`. The attempt counter grows on
//! every call until [`ExponentialBackoff::reset`], which must run exactly once
//! per successful connect.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tickmesh_core::CoreError;

/// Exponent cap; 2^30 * base already exceeds any sane max delay.
const MAX_EXPONENT: u32 = 30;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First-retry delay and lower bound of every delay.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap applied before jitter.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay (0.3 = ±30%).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_factor() -> f64 {
    0.3
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.base_delay_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "backoff base_delay_ms must be > 0".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(CoreError::InvalidConfig(format!(
                "backoff base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if !(0.0..1.0).contains(&self.jitter_factor) {
            return Err(CoreError::InvalidConfig(format!(
                "backoff jitter_factor ({}) must be in [0, 1)",
                self.jitter_factor
            )));
        }
        Ok(())
    }

    /// Upper bound of any delay this config can produce.
    pub fn upper_bound_ms(&self) -> u64 {
        (self.max_delay_ms as f64 * (1.0 + self.jitter_factor)).ceil() as u64
    }
}

/// Stateful delay generator; one per connection.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Next delay, using the thread-local RNG.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    /// Next delay, drawing jitter from `rng`.
    pub fn next_delay_with<R: Rng>(&mut self, rng: &mut R) -> Duration {
        let base = self.config.base_delay_ms;
        let exponent = self.attempt.min(MAX_EXPONENT);
        let raw = base.saturating_mul(1u64 << exponent);
        let capped = raw.min(self.config.max_delay_ms) as f64;

        let jitter = self.config.jitter_factor.max(0.0);
        let widened = if jitter > 0.0 {
            capped + capped * jitter * rng.gen_range(-1.0..=1.0)
        } else {
            capped
        };

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis((widened.round() as u64).max(base))
    }

    /// Zero the attempt counter after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_config() {
        let config = BackoffConfig::default();
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 60000);
        assert!((config.jitter_factor - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        assert!(BackoffConfig::default().validate().is_ok());

        let inverted = BackoffConfig {
            base_delay_ms: 5_000,
            max_delay_ms: 1_000,
            jitter_factor: 0.0,
        };
        assert!(inverted.validate().is_err());

        let full_jitter = BackoffConfig {
            jitter_factor: 1.0,
            ..BackoffConfig::default()
        };
        assert!(full_jitter.validate().is_err());
    }

    #[test]
    fn test_no_jitter_doubles_until_cap() {
        let mut backoff = ExponentialBackoff::new(BackoffConfig {
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
        });

        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(backoff.attempt(), 6);
    }

    #[test]
    fn test_bounds_hold_for_many_draws() {
        let config = BackoffConfig::default();
        let upper = config.upper_bound_ms();
        let mut rng = StdRng::seed_from_u64(7);
        let mut backoff = ExponentialBackoff::new(config.clone());

        for _ in 0..500 {
            let d = backoff.next_delay_with(&mut rng).as_millis() as u64;
            assert!(d >= config.base_delay_ms, "delay {d} below base");
            assert!(d <= upper, "delay {d} above {upper}");
        }
    }

    #[test]
    fn test_increasing_before_cap() {
        // ±30% jitter never overlaps between consecutive doublings.
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let mut backoff = ExponentialBackoff::default();
            let mut prev = 0u64;
            for _ in 0..6 {
                let d = backoff.next_delay_with(&mut rng).as_millis() as u64;
                assert!(d >= prev, "{d} < {prev}");
                prev = d;
            }
        }
    }

    #[test]
    fn test_reset_returns_to_attempt_zero_distribution() {
        let config = BackoffConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut backoff = ExponentialBackoff::new(config.clone());

        for _ in 0..8 {
            backoff.next_delay_with(&mut rng);
        }
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);

        let first = backoff.next_delay_with(&mut rng).as_millis() as u64;
        let max_first = (config.base_delay_ms as f64 * (1.0 + config.jitter_factor)).ceil() as u64;
        assert!(first >= config.base_delay_ms);
        assert!(first <= max_first);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let mut backoff = ExponentialBackoff::new(BackoffConfig {
            base_delay_ms: 1000,
            max_delay_ms: 60000,
            jitter_factor: 0.0,
        });
        for _ in 0..100 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_millis(60000));
    }
}
