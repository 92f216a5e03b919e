//! Request execution with conditional caching, retry backoff and pooled body buffers.
//!
//! # Architecture
//!
//! - [`Request`] - One logical request: ordering, cancellation, markers
//! - [`RetryPolicy`] - Per-request timeout and backoff state
//! - [`NetworkExecutor`] - Drives a [`Transport`] until a response or a fatal error
//! - [`BufferPool`] / [`PooledOutputStream`] - Recycled byte buffers for body reads
//! - [`cache`] - Cache entries, conditional headers and an in-memory store
//!
//! # Key Features
//!
//! - **Conditional Requests**: `If-None-Match` / `If-Modified-Since` from the cache entry,
//!   a 304 returns the cached body without a body transfer
//! - **Bounded Retries**: timeouts, body read failures and 5xx go through the request's policy
//! - **Mechanism-Only**: no queue, no disk cache, no wire protocol; the caller owns those

pub mod cache;
mod config;
mod diagnostics;
mod error;
mod executor;
mod pool;
mod request;
mod response;
mod retry;
mod transport;

pub use config::{
    DEFAULT_POOL_SIZE_LIMIT, DEFAULT_SLOW_REQUEST_THRESHOLD_MS, ExecutorConfig, RetryConfig,
};
pub use diagnostics::{Diagnostics, NoDiagnostics, RequestSummary, TracingDiagnostics};
pub use error::{AuthFailure, Error, Result, TransportError};
pub use executor::NetworkExecutor;
pub use pool::{BufferPool, DEFAULT_STREAM_SIZE, PooledOutputStream};
pub use request::{CancelHandle, Marker, Method, Priority, Request};
pub use response::{NetworkResponse, STATUS_NOT_MODIFIED};
pub use retry::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS, DefaultRetryPolicy,
    RetryPolicy,
};
pub use transport::{Body, BoxStream, Transport, TransportResponse};

#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;

pub use cache::{Cache, CacheEntry};
