//! Retry policy with exponential backoff for token acquisition.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{AuthError, AuthErrorKind};

/// Fraction of the computed delay used as the jitter band (±10%).
const JITTER_FRACTION: f64 = 0.1;

/// Exponential backoff policy keyed on [`AuthErrorKind`].
///
/// ```ignore
/// let policy = RetryPolicy::default();
/// let token = policy.retry(|| client.get_token()).await?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap for the exponential delay.
    pub max_delay: Duration,
    /// Growth factor per attempt (>= 1.0).
    pub multiplier: f64,
    /// Apply ±10% random jitter to computed delays.
    pub jitter: bool,
    /// Which error kinds may be retried at all.
    pub retryable_kinds: HashMap<AuthErrorKind, bool>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            retryable_kinds: default_retryable_kinds(),
        }
    }
}

fn default_retryable_kinds() -> HashMap<AuthErrorKind, bool> {
    [
        AuthErrorKind::Network,
        AuthErrorKind::ServerError,
        AuthErrorKind::RateLimit,
        AuthErrorKind::TokenExpired,
        AuthErrorKind::Credentials,
        AuthErrorKind::Configuration,
        AuthErrorKind::Discovery,
        AuthErrorKind::Unknown,
    ]
    .into_iter()
    .map(|kind| (kind, kind.is_transient()))
    .collect()
}

impl RetryPolicy {
    /// Override the retryability of one error kind.
    #[must_use]
    pub fn with_retryable(mut self, kind: AuthErrorKind, retryable: bool) -> Self {
        self.retryable_kinds.insert(kind, retryable);
        self
    }

    /// Check that the policy parameters are usable.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if `max_attempts` is zero, the
    /// multiplier is below 1.0 or not finite, or `max_delay < base_delay`.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.max_attempts == 0 {
            return Err(AuthError::configuration(
                "retry max_attempts must be at least 1",
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(AuthError::configuration(format!(
                "retry multiplier must be a finite value >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay < self.base_delay {
            return Err(AuthError::configuration(format!(
                "retry max_delay ({}ms) must not be below base_delay ({}ms)",
                self.max_delay.as_millis(),
                self.base_delay.as_millis()
            )));
        }
        Ok(())
    }

    /// Whether another attempt should follow a failure.
    ///
    /// `attempt` is the number of attempts already made. Returns false once it
    /// reaches `max_attempts`; otherwise true only when the error's kind is
    /// retryable in this policy and the error itself is marked retryable.
    #[must_use]
    pub fn should_retry(&self, err: &AuthError, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        let kind_retryable = self
            .retryable_kinds
            .get(&err.kind())
            .copied()
            .unwrap_or(false);
        kind_retryable && err.is_retryable()
    }

    /// Delay before the next attempt.
    ///
    /// A server-specified `retry_after` on the error is returned exactly.
    /// Otherwise `min(base_delay * multiplier^attempt, max_delay)`, with ±10%
    /// jitter when enabled.
    #[must_use]
    pub fn get_delay(&self, attempt: u32, err: Option<&AuthError>) -> Duration {
        if let Some(retry_after) = err.and_then(AuthError::retry_after) {
            return retry_after;
        }

        let delay = self.backoff(attempt);
        if self.jitter {
            apply_jitter(delay)
        } else {
            delay
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    /// Run `op` until it succeeds or the policy gives up.
    ///
    /// Sleeps [`get_delay`](Self::get_delay) between attempts and returns the
    /// last error once [`should_retry`](Self::should_retry) says stop.
    ///
    /// # Errors
    ///
    /// Returns the last error produced by `op`.
    pub async fn retry<T, F, Fut>(&self, mut op: F) -> Result<T, AuthError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let made = attempt.saturating_add(1);
                    if !self.should_retry(&err, made) {
                        if made > 1 {
                            tracing::warn!(
                                kind = %err.kind(),
                                attempts = made,
                                "giving up after retries"
                            );
                        }
                        return Err(err);
                    }
                    let delay = self.get_delay(attempt, Some(&err));
                    tracing::warn!(
                        kind = %err.kind(),
                        attempt = made,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = made;
                }
            }
        }
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let factor = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
    let secs = delay.as_secs_f64() * (1.0 + factor);
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(delay)
}
