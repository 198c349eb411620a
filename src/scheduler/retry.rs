//! Retry policy and exponential backoff.
//!
//! Each job class supplies a `RetryConfig`: how many attempts a job gets
//! and the backoff curve applied between them. The curve is a list of
//! fixed first backoffs followed by a geometric tail, capped at a
//! maximum.

use std::time::Duration;

/// How many runner invocations a job gets before it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAttempts {
    /// Drop the job after this many attempts.
    Limited(u32),
    /// Keep retrying for as long as the job exists.
    Unlimited,
}

impl MaxAttempts {
    /// Returns whether the attempt about to run (after `attempts_so_far`
    /// completed ones) is the job's final allowed attempt.
    pub fn is_last_attempt(self, attempts_so_far: u32) -> bool {
        match self {
            MaxAttempts::Limited(max) => attempts_so_far + 1 >= max,
            MaxAttempts::Unlimited => false,
        }
    }
}

/// Shape of the backoff curve between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Explicit delays for the first attempts. Attempt `n` (1-based)
    /// uses `first_backoffs[n - 1]` while in range.
    pub first_backoffs: Vec<Duration>,
    /// Growth factor applied past the explicit delays.
    pub multiplier: u32,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for BackoffConfig {
    /// 1 minute, 5 minutes, 25 minutes, then hourly.
    fn default() -> Self {
        Self {
            first_backoffs: vec![Duration::from_secs(60)],
            multiplier: 5,
            max_backoff: Duration::from_secs(60 * 60),
        }
    }
}

/// Retry policy for one job class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempt budget.
    pub max_attempts: MaxAttempts,
    /// Delay curve between attempts.
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl RetryConfig {
    /// Policy for work that must eventually succeed: retry forever on
    /// the default curve.
    pub fn unlimited() -> Self {
        Self {
            max_attempts: MaxAttempts::Unlimited,
            backoff: BackoffConfig::default(),
        }
    }

    /// Policy for optional work: give up after `max_attempts`.
    pub fn limited(max_attempts: u32) -> Self {
        Self {
            max_attempts: MaxAttempts::Limited(max_attempts),
            backoff: BackoffConfig::default(),
        }
    }

    /// Sets the backoff curve.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Computes the delay before attempt `attempt` (1-based) becomes
/// eligible again.
///
/// Attempts covered by `first_backoffs` use the listed delay; later
/// attempts grow geometrically from the last listed delay, capped at
/// `max_backoff`.
pub fn backoff_for_attempt(attempt: u32, config: &BackoffConfig) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let listed = config.first_backoffs.len() as u32;
    if attempt <= listed {
        let delay = config.first_backoffs[(attempt - 1) as usize];
        return delay.min(config.max_backoff);
    }

    // Geometric tail, computed in float seconds so a deep retry count
    // saturates at the cap instead of overflowing.
    let base = config
        .first_backoffs
        .last()
        .copied()
        .unwrap_or(config.max_backoff);
    let exponent = attempt - listed;
    let scaled = base.as_secs_f64() * (config.multiplier as f64).powf(exponent as f64);

    if !scaled.is_finite() || scaled >= config.max_backoff.as_secs_f64() {
        config.max_backoff
    } else {
        Duration::from_secs_f64(scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_attempts_limited() {
        let max = MaxAttempts::Limited(3);

        assert!(!max.is_last_attempt(0));
        assert!(!max.is_last_attempt(1));
        assert!(max.is_last_attempt(2));
        assert!(max.is_last_attempt(3));
    }

    #[test]
    fn test_max_attempts_unlimited() {
        let max = MaxAttempts::Unlimited;

        assert!(!max.is_last_attempt(0));
        assert!(!max.is_last_attempt(1_000_000));
    }

    #[test]
    fn test_default_curve() {
        let config = BackoffConfig::default();

        // 1 min, 5 min, 25 min, then capped at the hour.
        assert_eq!(
            backoff_for_attempt(1, &config),
            Duration::from_secs(60)
        );
        assert_eq!(
            backoff_for_attempt(2, &config),
            Duration::from_secs(5 * 60)
        );
        assert_eq!(
            backoff_for_attempt(3, &config),
            Duration::from_secs(25 * 60)
        );
        assert_eq!(
            backoff_for_attempt(4, &config),
            Duration::from_secs(60 * 60)
        );
        assert_eq!(
            backoff_for_attempt(50, &config),
            Duration::from_secs(60 * 60)
        );
    }

    #[test]
    fn test_listed_backoffs_take_precedence() {
        let config = BackoffConfig {
            first_backoffs: vec![
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(30),
            ],
            multiplier: 2,
            max_backoff: Duration::from_secs(300),
        };

        assert_eq!(backoff_for_attempt(1, &config), Duration::from_secs(10));
        assert_eq!(backoff_for_attempt(2, &config), Duration::from_secs(20));
        assert_eq!(backoff_for_attempt(3, &config), Duration::from_secs(30));
        assert_eq!(backoff_for_attempt(4, &config), Duration::from_secs(60));
        assert_eq!(backoff_for_attempt(5, &config), Duration::from_secs(120));
        assert_eq!(backoff_for_attempt(6, &config), Duration::from_secs(240));
        assert_eq!(backoff_for_attempt(7, &config), Duration::from_secs(300));
    }

    #[test]
    fn test_listed_backoff_capped() {
        let config = BackoffConfig {
            first_backoffs: vec![Duration::from_secs(500)],
            multiplier: 2,
            max_backoff: Duration::from_secs(100),
        };

        assert_eq!(backoff_for_attempt(1, &config), Duration::from_secs(100));
    }

    #[test]
    fn test_zero_attempt_is_immediate() {
        let config = BackoffConfig::default();
        assert_eq!(backoff_for_attempt(0, &config), Duration::ZERO);
    }

    #[test]
    fn test_deep_attempt_saturates() {
        let config = BackoffConfig::default();
        assert_eq!(
            backoff_for_attempt(u32::MAX, &config),
            config.max_backoff
        );
    }

    #[test]
    fn test_retry_config_constructors() {
        let unlimited = RetryConfig::unlimited();
        assert_eq!(unlimited.max_attempts, MaxAttempts::Unlimited);

        let limited = RetryConfig::limited(3).with_backoff(BackoffConfig {
            first_backoffs: vec![Duration::from_secs(1)],
            multiplier: 2,
            max_backoff: Duration::from_secs(10),
        });
        assert_eq!(limited.max_attempts, MaxAttempts::Limited(3));
        assert_eq!(limited.backoff.multiplier, 2);
    }
}
