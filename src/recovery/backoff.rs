//! Exponential backoff for the `Retry` action.

use std::time::Duration;

use super::RecoveryRule;

/// Converts configured seconds into a `Duration`, treating negative or
/// non-finite values as zero.
pub(crate) fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Retry schedule: `max_attempts` rounds, no wait before the first, then
/// `base_delay * 2^(k-1)` before round `k`, capped at `max_delay`.
///
/// No jitter is applied, so the schedule is fully deterministic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryStrategy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

impl RetryStrategy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Builds the schedule from a matching rule, or from the defaults when there is none.
    ///
    /// The cap is raised to the rule's own base delay when that is larger, so
    /// the first retry always waits the configured base.
    pub fn for_rule(rule: Option<&RecoveryRule>, defaults: &RetryStrategy) -> Self {
        match rule {
            Some(rule) => {
                let base_delay = seconds(rule.retry_delay_seconds);
                Self {
                    base_delay,
                    max_delay: defaults.max_delay.max(base_delay),
                    max_attempts: rule.max_retry_attempts,
                }
            }
            None => defaults.clone(),
        }
    }

    /// Delay to wait before zero-based attempt `attempt`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 1).min(31); // Prevent overflow
        let multiplier = 1u32 << exponent;
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Every delay the schedule would wait, in order.
    pub fn delays(&self) -> Vec<Duration> {
        (0..self.max_attempts).map(|k| self.delay_before(k)).collect()
    }

    /// Upper bound on the time spent sleeping across all attempts.
    pub fn total_delay(&self) -> Duration {
        self.delays().iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Category;
    use crate::recovery::RecoveryAction;

    #[test]
    fn test_default_schedule_is_zero_one_two() {
        let strategy = RetryStrategy::default();
        assert_eq!(
            strategy.delays(),
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(2)
            ]
        );
        assert_eq!(strategy.total_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let strategy = RetryStrategy::new(
            Duration::from_millis(500),
            Duration::from_secs(5),
            6,
        );
        assert_eq!(strategy.delay_before(1), Duration::from_millis(500));
        assert_eq!(strategy.delay_before(2), Duration::from_secs(1));
        assert_eq!(strategy.delay_before(3), Duration::from_secs(2));
        assert_eq!(strategy.delay_before(4), Duration::from_secs(4));
        assert_eq!(strategy.delay_before(5), Duration::from_secs(5));
        assert_eq!(strategy.delay_before(100), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_attempts_has_empty_schedule() {
        let strategy = RetryStrategy::new(Duration::from_secs(1), Duration::from_secs(60), 0);
        assert!(strategy.delays().is_empty());
        assert_eq!(strategy.total_delay(), Duration::ZERO);
    }

    #[test]
    fn test_for_rule_uses_rule_parameters() {
        let defaults = RetryStrategy::default();
        let rule = RecoveryRule::new(Category::Infrastructure, RecoveryAction::Retry)
            .with_retry(5, 0.25);

        let strategy = RetryStrategy::for_rule(Some(&rule), &defaults);
        assert_eq!(strategy.max_attempts, 5);
        assert_eq!(strategy.base_delay, Duration::from_millis(250));
        assert_eq!(strategy.max_delay, defaults.max_delay);

        assert_eq!(RetryStrategy::for_rule(None, &defaults), defaults);
    }

    #[test]
    fn test_rule_base_above_cap_is_not_truncated() {
        let defaults = RetryStrategy::default();
        let rule = RecoveryRule::new(Category::Infrastructure, RecoveryAction::Retry)
            .with_retry(3, 90.0);

        let strategy = RetryStrategy::for_rule(Some(&rule), &defaults);
        assert_eq!(strategy.max_delay, Duration::from_secs(90));
        assert_eq!(
            strategy.delays(),
            vec![
                Duration::ZERO,
                Duration::from_secs(90),
                Duration::from_secs(90)
            ]
        );
    }

    #[test]
    fn test_invalid_seconds_become_zero() {
        assert_eq!(seconds(-1.0), Duration::ZERO);
        assert_eq!(seconds(f64::NAN), Duration::ZERO);
        assert_eq!(seconds(1.5), Duration::from_millis(1500));
    }
}
