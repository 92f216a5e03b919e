use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;

use crate::cache::CacheEntry;
use crate::config::{ExecutorConfig, RetryConfig};
use crate::diagnostics::{Diagnostics, RequestSummary, TracingDiagnostics};
use crate::error::{AuthFailure, Error, Result, TransportError};
use crate::pool::{BufferPool, DEFAULT_STREAM_SIZE, PooledOutputStream};
use crate::request::{Method, Request};
use crate::response::{NetworkResponse, STATUS_NOT_MODIFIED};
use crate::transport::{Body, Transport, TransportResponse};

/// Upper bound on the initial buffer requested from a declared `Content-Length`.
const MAX_CAPACITY_HINT: usize = 1 << 20;

/// Runs one request against a [`Transport`] until it yields a response or a
/// fatal error.
///
/// The executor holds no per-request state and can be shared between worker
/// tasks behind an `Arc`. Retries are driven by the request's own
/// [`RetryPolicy`](crate::RetryPolicy); nothing here sleeps.
pub struct NetworkExecutor<T> {
    transport:      T,
    pool:           Arc<BufferPool>,
    diagnostics:    Arc<dyn Diagnostics>,
    slow_threshold: Duration,
    verbose:        bool,
    retry:          RetryConfig,
}

impl<T: Transport> NetworkExecutor<T> {
    pub fn new(transport: T) -> Self { Self::from_config(transport, &ExecutorConfig::default()) }

    pub fn from_config(transport: T, config: &ExecutorConfig) -> Self {
        Self {
            transport,
            pool: Arc::new(BufferPool::new(config.pool_size_limit)),
            diagnostics: Arc::new(TracingDiagnostics),
            slow_threshold: config.slow_request_threshold(),
            verbose: config.verbose,
            retry: config.retry.clone(),
        }
    }

    /// Share a buffer pool with other executors.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: impl Diagnostics + 'static) -> Self {
        self.diagnostics = Arc::new(diagnostics);
        self
    }

    pub fn transport(&self) -> &T { &self.transport }

    pub fn pool(&self) -> &Arc<BufferPool> { &self.pool }

    pub fn retry_config(&self) -> &RetryConfig { &self.retry }

    /// A request whose retry policy follows this executor's [`RetryConfig`].
    pub fn request(&self, method: Method, url: impl Into<String>) -> Request {
        Request::new(method, url).with_retry_config(&self.retry)
    }

    /// Perform `request`, retrying transient failures while its policy allows.
    ///
    /// A 304 answer to a conditional request returns the cached body with
    /// `not_modified` set and never reads the response body.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] when timeouts exhaust the retry policy
    /// - [`Error::MalformedUrl`] immediately, without consulting the policy
    /// - [`Error::NoConnection`] when no response could be obtained
    /// - [`Error::Network`] when body reads exhaust the retry policy
    /// - [`Error::AuthFailure`] for 401/403 or a transport auth failure
    /// - [`Error::Client`] for any other 4xx
    /// - [`Error::Server`] for 5xx once the policy is exhausted, or any other
    ///   unexpected status
    pub async fn execute(&self, request: &mut Request) -> Result<NetworkResponse> {
        let started = Instant::now();

        loop {
            let extra_headers = request
                .cache_entry()
                .map(CacheEntry::conditional_headers)
                .unwrap_or_default();

            let response = match self.transport.perform(request, &extra_headers).await {
                Ok(response) => response,
                Err(TransportError::SocketTimeout) => {
                    self.attempt_retry(request, "socket-timeout", Error::Timeout)?;
                    continue;
                }
                Err(TransportError::ConnectTimeout) => {
                    self.attempt_retry(request, "connection-timeout", Error::Timeout)?;
                    continue;
                }
                Err(TransportError::MalformedUrl(reason)) => {
                    return Err(Error::MalformedUrl {
                        url: request.url().to_string(),
                        reason,
                    });
                }
                Err(TransportError::Io(err)) => return Err(Error::NoConnection(err)),
                Err(TransportError::AuthFailure(auth)) => return Err(Error::AuthFailure(auth)),
            };

            let TransportResponse {
                status,
                headers,
                content_length,
                body,
            } = response;

            if status == STATUS_NOT_MODIFIED {
                return Ok(not_modified(request.cache_entry(), headers)
                    .with_network_time(started.elapsed()));
            }

            let body = match body {
                Some(body) => match self.read_body(body, content_length).await {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        self.diagnostics.body_read_failed(request, &err);
                        self.attempt_retry(request, "network", Error::Network(err))?;
                        continue;
                    }
                },
                None => None,
            };

            let elapsed = started.elapsed();
            if self.verbose || elapsed > self.slow_threshold {
                self.diagnostics.request_completed(&RequestSummary {
                    description: request.to_string(),
                    elapsed,
                    body_len: body.as_ref().map(Bytes::len),
                    status,
                    retry_count: request.retry_policy().current_retry_count(),
                });
            }

            let response = NetworkResponse::new(status, body.unwrap_or_default(), headers, false)
                .with_network_time(elapsed);
            if response.is_success() {
                return Ok(response);
            }

            self.diagnostics.unexpected_status(request, status);
            match status {
                401 | 403 => return Err(AuthFailure::from_response(response).into()),
                400..=499 => return Err(Error::Client(Box::new(response))),
                500..=599 => {
                    self.attempt_retry(request, "server-error", Error::Server(Box::new(response)))?
                }
                _ => return Err(Error::Server(Box::new(response))),
            }
        }
    }

    /// Hand `error` to the request's retry policy and record the outcome.
    fn attempt_retry(&self, request: &mut Request, reason: &str, error: Error) -> Result<()> {
        let previous_timeout = request.retry_policy().current_timeout();

        match request.retry_policy_mut().retry(error) {
            Ok(()) => {
                request.add_marker(format!("{reason}-retry [timeout={previous_timeout}]"));
                self.diagnostics.retrying(request, reason, previous_timeout);
                Ok(())
            }
            Err(err) => {
                request.add_marker(format!("{reason}-giveup [timeout={previous_timeout}]"));
                self.diagnostics.gave_up(request, reason);
                Err(err)
            }
        }
    }

    async fn read_body(&self, mut body: Body, content_length: Option<u64>) -> io::Result<Bytes> {
        let capacity = content_length
            .and_then(|len| usize::try_from(len).ok())
            .map_or(DEFAULT_STREAM_SIZE, |len| len.min(MAX_CAPACITY_HINT));

        let mut out = PooledOutputStream::with_capacity(&self.pool, capacity);
        while let Some(chunk) = body.next().await {
            out.write(&chunk?);
        }

        Ok(out.to_bytes())
    }
}

/// Cached body with the stored headers, overridden by the 304's own headers.
fn not_modified(entry: Option<&CacheEntry>, headers: HashMap<String, String>) -> NetworkResponse {
    let Some(entry) = entry else {
        return NetworkResponse::new(STATUS_NOT_MODIFIED, Bytes::new(), headers, true);
    };

    let mut combined = entry.headers.clone();
    combined.extend(headers);
    NetworkResponse::new(STATUS_NOT_MODIFIED, entry.data.clone(), combined, true)
}
