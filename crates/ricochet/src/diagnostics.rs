use std::io;
use std::time::Duration;

use crate::request::Request;

/// What the executor reports about a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    /// `Display` form of the request.
    pub description: String,

    /// Time since the first attempt.
    pub elapsed: Duration,

    /// `None` when the response carried no entity.
    pub body_len: Option<usize>,

    pub status: u16,

    pub retry_count: u32,
}

/// Observer for executor events.
///
/// Every method is best-effort and defaults to doing nothing.
pub trait Diagnostics: Send + Sync {
    /// A response was read and the request was slow, or verbose reporting is on.
    fn request_completed(&self, _summary: &RequestSummary) {}

    /// The server answered with a status outside `200..=299` other than 304.
    fn unexpected_status(&self, _request: &Request, _status: u16) {}

    /// The response body could not be read to the end.
    fn body_read_failed(&self, _request: &Request, _error: &io::Error) {}

    /// The retry policy granted another attempt.
    fn retrying(&self, _request: &Request, _reason: &str, _previous_timeout_ms: u64) {}

    /// The retry policy is exhausted.
    fn gave_up(&self, _request: &Request, _reason: &str) {}
}

/// Reports through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn request_completed(&self, summary: &RequestSummary) {
        tracing::debug!(
            request = %summary.description,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            body_len = ?summary.body_len,
            status = summary.status,
            retry_count = summary.retry_count,
            "http response"
        );
    }

    fn unexpected_status(&self, request: &Request, status: u16) {
        tracing::error!(status, url = request.url(), "unexpected response code");
    }

    fn body_read_failed(&self, request: &Request, error: &io::Error) {
        tracing::warn!(url = request.url(), %error, "failed to read response body");
    }

    fn retrying(&self, request: &Request, reason: &str, previous_timeout_ms: u64) {
        tracing::debug!(
            url = request.url(),
            reason,
            previous_timeout_ms,
            timeout_ms = request.retry_policy().current_timeout(),
            retry_count = request.retry_policy().current_retry_count(),
            "retrying request"
        );
    }

    fn gave_up(&self, request: &Request, reason: &str) {
        tracing::warn!(url = request.url(), reason, "giving up on request");
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiagnostics;

impl Diagnostics for NoDiagnostics {}
