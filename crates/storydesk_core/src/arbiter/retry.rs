//! Bounded retry with exponential backoff around any `Arbiter`.

use crate::arbiter::{Arbiter, ArbitrationRequest, ArbitrationResult, ArbitrationVerdict};
use crate::config::RetrySettings;
use log::{info, warn};
use std::time::Duration;

/// Retries transient arbiter failures; everything else fails immediately.
pub struct RetryingArbiter<A> {
    inner: A,
    settings: RetrySettings,
    sleep: fn(Duration),
}

impl<A: Arbiter> RetryingArbiter<A> {
    pub fn new(inner: A, settings: RetrySettings) -> Self {
        Self {
            inner,
            settings,
            sleep: std::thread::sleep,
        }
    }

    /// Replaces the sleep function. Tests pass a no-op.
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Delay before attempt `attempt + 1`, for `attempt >= 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let millis = self
            .settings
            .initial_backoff_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.settings.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

impl<A: Arbiter> Arbiter for RetryingArbiter<A> {
    fn arbitrate(&self, request: &ArbitrationRequest) -> ArbitrationResult<ArbitrationVerdict> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.arbitrate(request) {
                Ok(verdict) => {
                    info!(
                        "event=arbitrate module=arbiter status=ok candidate_id={} attempt={attempt} decision={}",
                        request.candidate_id,
                        verdict.label()
                    );
                    return Ok(verdict);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "event=arbitrate module=arbiter status=retry candidate_id={} attempt={attempt} error_code={} backoff_ms={}",
                        request.candidate_id,
                        err.code(),
                        delay.as_millis()
                    );
                    (self.sleep)(delay);
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        "event=arbitrate module=arbiter status=error candidate_id={} attempt={attempt} error_code={} error={err}",
                        request.candidate_id,
                        err.code()
                    );
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RetryingArbiter;
    use crate::arbiter::{
        Arbiter, ArbitrationError, ArbitrationRequest, ArbitrationResult, ArbitrationVerdict,
    };
    use crate::config::RetrySettings;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct Scripted {
        replies: RefCell<VecDeque<ArbitrationResult<ArbitrationVerdict>>>,
        calls: RefCell<u32>,
    }

    impl Scripted {
        fn new(replies: Vec<ArbitrationResult<ArbitrationVerdict>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                calls: RefCell::new(0),
            }
        }
    }

    impl Arbiter for Scripted {
        fn arbitrate(&self, _: &ArbitrationRequest) -> ArbitrationResult<ArbitrationVerdict> {
            *self.calls.borrow_mut() += 1;
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or(Err(ArbitrationError::Timeout))
        }
    }

    fn request() -> ArbitrationRequest {
        ArbitrationRequest {
            candidate_id: "c-1".to_string(),
            headline: "h".to_string(),
            summary: "s".to_string(),
            body: String::new(),
            matches: Vec::new(),
        }
    }

    fn settings() -> RetrySettings {
        RetrySettings {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 250,
        }
    }

    fn no_sleep(_: Duration) {}

    #[test]
    fn transient_errors_retry_until_success() {
        let arbiter = RetryingArbiter::new(
            Scripted::new(vec![
                Err(ArbitrationError::RateLimited),
                Err(ArbitrationError::Timeout),
                Ok(ArbitrationVerdict::New {
                    reasoning: "distinct".to_string(),
                }),
            ]),
            settings(),
        )
        .with_sleep(no_sleep);

        assert!(arbiter.arbitrate(&request()).is_ok());
        assert_eq!(*arbiter.inner().calls.borrow(), 3);
    }

    #[test]
    fn malformed_reply_is_not_retried() {
        let arbiter = RetryingArbiter::new(
            Scripted::new(vec![Err(ArbitrationError::Malformed("bad".to_string()))]),
            settings(),
        )
        .with_sleep(no_sleep);

        let err = arbiter.arbitrate(&request()).unwrap_err();
        assert!(matches!(err, ArbitrationError::Malformed(_)));
        assert_eq!(*arbiter.inner().calls.borrow(), 1);
    }

    #[test]
    fn attempts_are_bounded() {
        let arbiter = RetryingArbiter::new(Scripted::new(Vec::new()), settings()).with_sleep(no_sleep);
        assert_eq!(arbiter.arbitrate(&request()).unwrap_err(), ArbitrationError::Timeout);
        assert_eq!(*arbiter.inner().calls.borrow(), 3);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let arbiter = RetryingArbiter::new(Scripted::new(Vec::new()), settings());
        assert_eq!(arbiter.backoff(1), Duration::from_millis(100));
        assert_eq!(arbiter.backoff(2), Duration::from_millis(200));
        assert_eq!(arbiter.backoff(3), Duration::from_millis(250));
    }
}
