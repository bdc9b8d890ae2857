//! Retry classification and the time-bounded retry loop.
//!
//! [`RetryPolicy`] owns the default predicate set and a [`Backoff`]. Each call
//! composes the defaults with its own extras, walks every link of the error's
//! cause chain, and retries only what some predicate recognizes. The loop is
//! bounded by wall-clock time, not by an attempt count.
//!
//! # Examples
//!
//! ```
//! use provider_transport::retry::{Backoff, RetryPolicy};
//! use provider_transport::{ApiError, Error};
//! use http::StatusCode;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Error> {
//! let policy = RetryPolicy::default().with_backoff(Backoff::fixed(Duration::from_millis(10)));
//! let mut failures = 2;
//!
//! let value = policy
//!     .retry(Duration::from_secs(10), &[], || {
//!         let fail = failures > 0;
//!         failures -= 1;
//!         async move {
//!             if fail {
//!                 Err(Error::from(ApiError::new(StatusCode::TOO_MANY_REQUESTS, "slow down")))
//!             } else {
//!                 Ok("ok")
//!             }
//!         }
//!     })
//!     .await?;
//!
//! assert_eq!(value, "ok");
//! # Ok(())
//! # }
//! ```

use crate::predicates::{default_predicates, Cause, SharedPredicate, Verdict};
use rand::Rng;
use std::error::Error as StdError;
use std::future::Future;
use std::time::{Duration, Instant};

/// Exponential backoff with optional jitter.
///
/// The delay before retry `n` (1-indexed) is `initial_delay * 2^(n-1)`, capped at
/// `max_delay`. With jitter enabled the delay is scaled by a random factor in
/// `[0.5, 1.0]`. Delays never drop below [`Backoff::MIN_DELAY`], so an
/// always-failing call cannot spin.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// The delay before the first retry.
    pub initial_delay: Duration,
    /// The maximum delay between retries.
    pub max_delay: Duration,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Backoff {
    /// The smallest delay ever slept between attempts.
    pub const MIN_DELAY: Duration = Duration::from_millis(1);

    /// A backoff that always waits `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            jitter: false,
        }
    }

    /// Returns the delay before the given retry attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1).min(31) as u32);
        let delay = self.initial_delay.saturating_mul(multiplier).min(self.max_delay);

        let delay = if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
            delay.mul_f64(jitter_factor)
        } else {
            delay
        };

        delay.max(Self::MIN_DELAY)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

/// Iterates over an error and every error it wraps, outermost first.
pub fn chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |e| (*e).source())
}

/// Decides whether `err`, or anything in its cause chain, is retryable.
///
/// Links are visited outermost first, and for each link the predicates are
/// tried in order. The first match wins and is logged at debug level.
pub fn is_retryable_error<'p>(
    err: &(dyn StdError + 'static),
    predicates: impl IntoIterator<Item = &'p SharedPredicate> + Clone,
) -> Verdict {
    for link in chain(err) {
        let cause = Cause::of(link);
        for predicate in predicates.clone() {
            let verdict = predicate.check(&cause);
            if verdict.is_retryable() {
                tracing::debug!(
                    reason = verdict.reason(),
                    error = %err,
                    "Dismissed an error as retryable"
                );
                return verdict;
            }
        }
    }

    Verdict::NotRetryable
}

/// The retry engine: an immutable default predicate set plus a backoff.
///
/// Construct it once and share it (it is `Send + Sync`); every call supplies its
/// own extra predicates instead of mutating the defaults.
#[derive(Clone)]
pub struct RetryPolicy {
    defaults: Vec<SharedPredicate>,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Creates a policy with the given default predicates.
    pub fn new(defaults: Vec<SharedPredicate>, backoff: Backoff) -> Self {
        Self { defaults, backoff }
    }

    /// Replaces the backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// The predicates applied to every call.
    pub fn defaults(&self) -> &[SharedPredicate] {
        &self.defaults
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Classifies an error against `defaults ++ extras`.
    pub fn classify(&self, err: &(dyn StdError + 'static), extras: &[SharedPredicate]) -> Verdict {
        is_retryable_error(err, self.defaults.iter().chain(extras))
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error, or
    /// `budget` elapses.
    ///
    /// Only the error that ends the loop is returned; retried errors are logged.
    /// Sleeps are clamped to the remaining budget, so the loop overruns `budget`
    /// by at most one in-flight attempt.
    pub async fn retry<T, E, F, Fut>(
        &self,
        budget: Duration,
        extras: &[SharedPredicate],
        mut operation: F,
    ) -> Result<T, E>
    where
        E: StdError + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let verdict = self.classify(&error, extras);
            if !verdict.is_retryable() {
                tracing::debug!(error = %error, attempt = attempt, "Error is not retryable");
                return Err(error);
            }

            let remaining = budget.saturating_sub(start_time.elapsed());
            if remaining.is_zero() {
                tracing::warn!(
                    error = %error,
                    attempts = attempt,
                    budget_ms = budget.as_millis(),
                    "Retry budget exhausted"
                );
                return Err(error);
            }

            let delay = self.backoff.delay_for_attempt(attempt).min(remaining);
            tracing::info!(
                delay_ms = delay.as_millis(),
                attempt = attempt,
                reason = verdict.reason(),
                "Retrying request after delay"
            );
            tokio::time::sleep(delay).await;

            if start_time.elapsed() >= budget {
                tracing::warn!(
                    error = %error,
                    attempts = attempt,
                    budget_ms = budget.as_millis(),
                    "Retry budget exhausted"
                );
                return Err(error);
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(default_predicates(), Backoff::default())
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("defaults", &self.defaults.len())
            .field("backoff", &self.backoff)
            .finish()
    }
}
