use std::time::Duration;

use crate::config::RetryConfig;

use super::TransferError;

/// Failure message once every attempt has been used.
pub const MAX_ATTEMPTS_EXCEEDED: &str = "maximum attempts exceeded";

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff: no delay before the first attempt, then
/// `base`, `2 * base`, `4 * base`, ... capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(cfg.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
        }
    }
}

impl RetryPolicy {
    /// Sleep before `attempt` (1-based): zero for the first, `base * 2^(attempt-2)` after.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = 1u32 << (attempt - 2).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }

    /// Decide what to do after `attempt` (1-based) failed with `err`.
    pub fn decide(&self, attempt: u32, err: &TransferError) -> RetryDecision {
        if !err.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.delay_before(attempt + 1))
    }
}

/// Message recorded when attempts run out.
pub fn exhausted_message(last_error: Option<&str>) -> String {
    match last_error {
        Some(e) => format!("{}: {}", MAX_ATTEMPTS_EXCEEDED, e),
        None => MAX_ATTEMPTS_EXCEEDED.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn schedule_is_1_2_4_units() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_before(1), Duration::ZERO);
        assert_eq!(p.delay_before(2), secs(1));
        assert_eq!(p.delay_before(3), secs(2));
        assert_eq!(p.delay_before(4), secs(4));
    }

    #[test]
    fn delay_is_capped() {
        let mut p = RetryPolicy::default();
        p.max_delay = secs(3);
        assert_eq!(p.delay_before(4), secs(3));
        assert_eq!(p.delay_before(40), secs(3));
    }

    #[test]
    fn respects_max_attempts() {
        let p = RetryPolicy::default();
        let e = TransferError::Http(502);
        assert_eq!(p.decide(1, &e), RetryDecision::RetryAfter(secs(1)));
        assert_eq!(p.decide(2, &e), RetryDecision::RetryAfter(secs(2)));
        assert_eq!(p.decide(3, &e), RetryDecision::RetryAfter(secs(4)));
        assert_eq!(p.decide(4, &e), RetryDecision::NoRetry);
    }

    #[test]
    fn no_retry_for_terminal_errors() {
        let p = RetryPolicy::default();
        let e = TransferError::InsufficientSpace {
            required: 10,
            available: 1,
        };
        assert_eq!(p.decide(1, &e), RetryDecision::NoRetry);
    }

    #[test]
    fn from_config() {
        let cfg = RetryConfig {
            max_attempts: 0,
            base_delay_secs: 0.25,
            max_delay_secs: 5,
        };
        let p = RetryPolicy::from(&cfg);
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.delay_before(2), Duration::from_millis(250));
    }

    #[test]
    fn exhausted_message_variants() {
        assert_eq!(exhausted_message(None), "maximum attempts exceeded");
        assert_eq!(
            exhausted_message(Some("HTTP 500")),
            "maximum attempts exceeded: HTTP 500"
        );
    }
}
