use std::fmt;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Socket timeout applied to the first attempt, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 2500;

/// Retries allowed after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// With a multiplier of 1.0 the timeout doubles on every retry.
pub const DEFAULT_BACKOFF_MULTIPLIER: f32 = 1.0;

/// Per-request retry state.
///
/// A policy only computes the next timeout; it never sleeps. The transport is
/// expected to use [`current_timeout`](RetryPolicy::current_timeout) as its I/O
/// deadline for the next attempt.
pub trait RetryPolicy: fmt::Debug + Send + Sync {
    /// Timeout for the next attempt, in milliseconds.
    fn current_timeout(&self) -> u64;

    /// Retries performed so far.
    fn current_retry_count(&self) -> u32;

    /// Record a transient failure.
    ///
    /// Returns `Ok(())` when another attempt should be made, or hands `error`
    /// back when the policy is exhausted.
    fn retry(&mut self, error: Error) -> Result<()>;

    /// Current timeout as a [`Duration`].
    fn timeout(&self) -> Duration { Duration::from_millis(self.current_timeout()) }
}

/// Geometric backoff: `timeout += timeout * multiplier` on every retry.
///
/// # Examples
///
/// ```
/// use ricochet::{DefaultRetryPolicy, Error, RetryPolicy};
///
/// let mut policy = DefaultRetryPolicy::new(1000, 2, 0.5);
/// policy.retry(Error::Timeout).unwrap();
/// assert_eq!(policy.current_timeout(), 1500);
/// policy.retry(Error::Timeout).unwrap();
/// assert_eq!(policy.current_timeout(), 2250);
/// assert!(policy.retry(Error::Timeout).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultRetryPolicy {
    current_timeout_ms:  u64,
    current_retry_count: u32,
    max_retries:         u32,
    backoff_multiplier:  f32,
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_MS, DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF_MULTIPLIER)
    }
}

impl DefaultRetryPolicy {
    /// A negative or non-finite multiplier is treated as zero so the timeout
    /// never shrinks.
    pub fn new(initial_timeout_ms: u64, max_retries: u32, backoff_multiplier: f32) -> Self {
        let backoff_multiplier = if backoff_multiplier.is_finite() && backoff_multiplier > 0.0 {
            backoff_multiplier
        } else {
            0.0
        };

        Self {
            current_timeout_ms: initial_timeout_ms,
            current_retry_count: 0,
            max_retries,
            backoff_multiplier,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.initial_timeout_ms, config.max_retries, config.backoff_multiplier)
    }

    pub fn max_retries(&self) -> u32 { self.max_retries }

    pub fn backoff_multiplier(&self) -> f32 { self.backoff_multiplier }

    pub fn has_attempt_remaining(&self) -> bool { self.current_retry_count <= self.max_retries }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn current_timeout(&self) -> u64 { self.current_timeout_ms }

    fn current_retry_count(&self) -> u32 { self.current_retry_count }

    fn retry(&mut self, error: Error) -> Result<()> {
        self.current_retry_count = self.current_retry_count.saturating_add(1);
        // 0.7f32 is 0.699999988, so truncating would give 699 instead of 700
        let growth =
            (self.current_timeout_ms as f64 * f64::from(self.backoff_multiplier)).round() as u64;
        self.current_timeout_ms = self.current_timeout_ms.saturating_add(growth);

        if !self.has_attempt_remaining() {
            return Err(error);
        }
        Ok(())
    }
}
