use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::{DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS};

/// Byte limit of the buffer pool an executor creates for itself.
pub const DEFAULT_POOL_SIZE_LIMIT: usize = 4096;

/// Requests slower than this are always reported to diagnostics.
pub const DEFAULT_SLOW_REQUEST_THRESHOLD_MS: u64 = 3000;

/// Settings for a [`DefaultRetryPolicy`](crate::DefaultRetryPolicy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Socket timeout of the first attempt.
    ///
    /// Default: 2500
    pub initial_timeout_ms: u64,

    /// Retries allowed after the first attempt.
    ///
    /// Default: 1
    pub max_retries: u32,

    /// Growth factor applied to the timeout on each retry.
    ///
    /// Default: 1.0
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries:        DEFAULT_MAX_RETRIES,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn initial_timeout_ms(mut self, initial_timeout_ms: u64) -> Self {
        self.initial_timeout_ms = initial_timeout_ms;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn backoff_multiplier(mut self, backoff_multiplier: f32) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }
}

/// Configuration for a [`NetworkExecutor`](crate::NetworkExecutor).
///
/// Every field has a default, so partial documents deserialize.
///
/// # Examples
///
/// ```
/// use ricochet::ExecutorConfig;
///
/// let config = ExecutorConfig::default()
///     .pool_size_limit(64 * 1024)
///     .slow_request_threshold_ms(1500)
///     .verbose(true);
/// assert_eq!(config.retry.max_retries, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on bytes retained by the buffer pool.
    ///
    /// Default: 4096
    pub pool_size_limit: usize,

    /// Threshold above which a completed request is reported as slow.
    ///
    /// Default: 3000
    pub slow_request_threshold_ms: u64,

    /// Report every completed request, not just slow ones.
    ///
    /// Default: false
    pub verbose: bool,

    /// Retry settings for requests built with
    /// [`NetworkExecutor::request`](crate::NetworkExecutor::request).
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size_limit:           DEFAULT_POOL_SIZE_LIMIT,
            slow_request_threshold_ms: DEFAULT_SLOW_REQUEST_THRESHOLD_MS,
            verbose:                   false,
            retry:                     RetryConfig::default(),
        }
    }
}

impl ExecutorConfig {
    #[must_use]
    pub fn pool_size_limit(mut self, pool_size_limit: usize) -> Self {
        self.pool_size_limit = pool_size_limit;
        self
    }

    #[must_use]
    pub fn slow_request_threshold_ms(mut self, slow_request_threshold_ms: u64) -> Self {
        self.slow_request_threshold_ms = slow_request_threshold_ms;
        self
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_request_threshold_ms)
    }
}
