//! Retry/backoff for streaming requests.
//!
//! Streaming requests cannot go through the HTTP retry middleware: a failure
//! can happen long after the response headers arrived, and cancellation must
//! interrupt both the attempt and the delay. Each [`RetryController::run`]
//! call owns its own attempt counter.

use std::future::Future;
use std::time::Duration;

use chat_core::RetrySettings;
use tokio_util::sync::CancellationToken;

use crate::error::{ChatClientError, Result};

/// Deterministic exponential backoff without jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `retry` (1-indexed): `base_delay * 2^(retry-1)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Whether a failed attempt number `attempt` (1-indexed) gets another try.
    pub fn should_retry(&self, error: &ChatClientError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}

/// Details handed to the observer before a backoff delay starts.
#[derive(Debug)]
pub struct RetryNotice<'a> {
    /// 1-indexed retry number.
    pub retry: u32,
    pub next_attempt: u32,
    pub delay: Duration,
    pub error: &'a ChatClientError,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `attempt_fn` until it succeeds, fails terminally, or `cancel` fires.
    ///
    /// `attempt_fn` receives the 1-indexed attempt number. `on_retry` is called
    /// once per scheduled retry, before the delay. Cancellation drops the
    /// in-flight attempt future and any pending delay and yields
    /// [`ChatClientError::Cancelled`].
    pub async fn run<T, F, Fut, N>(
        &self,
        cancel: &CancellationToken,
        mut attempt_fn: F,
        mut on_retry: N,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        N: FnMut(&RetryNotice<'_>),
    {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(ChatClientError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ChatClientError::Cancelled),
                result = attempt_fn(attempt) => result,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("Request succeeded after {} attempts", attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !self.policy.should_retry(&error, attempt) {
                if error.is_retryable() {
                    log::error!("Giving up after {} attempts: {}", attempt, error);
                }
                return Err(error);
            }

            let delay = self.policy.delay_for_retry(attempt);
            log::warn!(
                "Recoverable error on attempt {}/{}: {}. Retrying in {:?}...",
                attempt,
                self.policy.max_attempts,
                error,
                delay
            );
            on_retry(&RetryNotice {
                retry: attempt,
                next_attempt: attempt + 1,
                delay,
                error: &error,
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChatClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
