//! Retry policy for provider requests.
//!
//! Transient failures (connection errors, timeouts, 5xx, 429) are retried with
//! exponential backoff up to `max_attempts`. Anything else fails immediately.
//! Exhausting the budget surfaces as `DataError::ProviderUnavailable`.

use super::provider::DataError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many times to try a provider request and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff factor applied to the delay after every failed attempt.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            multiplier: 1,
        }
    }

    /// Effective number of attempts.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the `failures`-th failed attempt (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(failures.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(factor)))
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run<T>(
        &self,
        mut op: impl FnMut(u32) -> Result<T, DataError>,
    ) -> Result<T, DataError> {
        let attempts = self.attempts();
        let mut last_error: Option<DataError> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                std::thread::sleep(self.delay_after(attempt - 1));
            }

            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    tracing::debug!(attempt, attempts, error = %e, "transient provider failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(DataError::ProviderUnavailable {
            attempts,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 0,
            multiplier: 2,
        }
    }

    #[test]
    fn default_budget_is_five_attempts() {
        assert_eq!(RetryPolicy::default().attempts(), 5);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(4), Duration::from_millis(4000));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = instant(5).run(|attempt| {
            calls.set(attempt);
            if attempt < 3 {
                Err(DataError::NetworkUnreachable("reset".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhaustion_reports_unavailable() {
        let calls = Cell::new(0);
        let result: Result<(), _> = instant(5).run(|_| {
            calls.set(calls.get() + 1);
            Err(DataError::ServerError { status: 503 })
        });
        assert_eq!(calls.get(), 5);
        match result {
            Err(DataError::ProviderUnavailable { attempts, reason }) => {
                assert_eq!(attempts, 5);
                assert!(reason.contains("503"));
            }
            other => panic!("expected ProviderUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = instant(5).run(|_| {
            calls.set(calls.get() + 1);
            Err(DataError::ResponseFormatChanged("html page".into()))
        });
        assert_eq!(calls.get(), 1);
        assert!(matches!(result, Err(DataError::ResponseFormatChanged(_))));
    }

    #[test]
    fn none_policy_tries_once() {
        let calls = Cell::new(0);
        let _: Result<(), _> = RetryPolicy::none().run(|_| {
            calls.set(calls.get() + 1);
            Err(DataError::NetworkUnreachable("down".into()))
        });
        assert_eq!(calls.get(), 1);
    }
}
