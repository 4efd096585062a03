//! Retry scheduling: exponential backoff with per-category budgets.

use std::time::Duration;

use courier_common::RetryConfig;

/// What to do with a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue after the backoff delay.
    Retry { delay: Duration },
    /// Attempt budget exhausted; move to the dead-letter sink.
    DeadLetter,
}

/// Decides retry-or-dead-letter for a task with `attempts` completed
/// attempts against a category budget of `max_attempts`.
pub fn decide(config: &RetryConfig, attempts: u32, max_attempts: u32) -> RetryDecision {
    if attempts >= max_attempts {
        RetryDecision::DeadLetter
    } else {
        RetryDecision::Retry { delay: backoff_delay(config, attempts) }
    }
}

/// Backoff before the attempt following `attempts` completed ones:
/// `base * 2^(attempts - 1)`, capped at the configured maximum.
pub fn backoff_delay(config: &RetryConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let delay = config.base_delay.saturating_mul(2u32.saturating_pow(exponent));
    delay.min(config.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(300),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let config = config();
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(8000));
    }

    #[test]
    fn backoff_is_capped() {
        let config = config();
        assert_eq!(backoff_delay(&config, 12), Duration::from_secs(300));
        // Large attempt counts must not overflow.
        assert_eq!(backoff_delay(&config, u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn dead_letters_at_budget() {
        let config = config();
        assert!(matches!(decide(&config, 2, 3), RetryDecision::Retry { .. }));
        assert_eq!(decide(&config, 3, 3), RetryDecision::DeadLetter);
        assert_eq!(decide(&config, 4, 3), RetryDecision::DeadLetter);
    }

    #[test]
    fn retry_delay_matches_attempt_count() {
        let config = config();
        match decide(&config, 1, 3) {
            RetryDecision::Retry { delay } => assert_eq!(delay, Duration::from_millis(1000)),
            RetryDecision::DeadLetter => panic!("budget not exhausted"),
        }
        match decide(&config, 2, 3) {
            RetryDecision::Retry { delay } => assert_eq!(delay, Duration::from_millis(2000)),
            RetryDecision::DeadLetter => panic!("budget not exhausted"),
        }
    }
}
