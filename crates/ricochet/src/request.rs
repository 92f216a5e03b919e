use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::retry::{DefaultRetryPolicy, RetryPolicy};

const DEFAULT_BODY_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Scheduling class of a request. Declared from lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Immediate,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "LOW"),
            Priority::Normal => write!(f, "NORMAL"),
            Priority::High => write!(f, "HIGH"),
            Priority::Immediate => write!(f, "IMMEDIATE"),
        }
    }
}

/// Cancels a request from outside the worker that owns it.
///
/// Cancellation is advisory: whoever dispatches the request checks
/// [`Request::is_canceled`] before executing it and before delivering a result.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) { self.0.store(true, AtomicOrdering::Release); }

    pub fn is_canceled(&self) -> bool { self.0.load(AtomicOrdering::Acquire) }
}

/// A lifecycle event recorded on a request.
#[derive(Debug, Clone)]
pub struct Marker {
    pub name:   String,
    pub thread: ThreadId,
    pub at:     Instant,
}

/// One unit of work for a [`NetworkExecutor`](crate::NetworkExecutor).
///
/// Requests order by priority (highest first) and then by ascending sequence
/// number, which gives FIFO order within a priority class. In that order a
/// request that should run earlier compares as *less*, so a max-heap queue
/// stores them wrapped in [`std::cmp::Reverse`].
///
/// Ties left after priority and sequence, which only happen between requests
/// without a sequence, are broken by creation order. Two requests therefore
/// compare equal only when they are the same request.
pub struct Request {
    id:                u64,
    method:            Method,
    url:               String,
    priority:          Priority,
    sequence:          Option<u64>,
    retry_policy:      Box<dyn RetryPolicy>,
    cache_entry:       Option<Arc<CacheEntry>>,
    canceled:          CancelHandle,
    delivered:         bool,
    tag:               Option<String>,
    headers:           HashMap<String, String>,
    body:              Option<Bytes>,
    body_content_type: String,
    should_cache:      bool,
    markers:           Vec<Marker>,
    created_at:        Instant,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);

        Self {
            id: NEXT_ID.fetch_add(1, AtomicOrdering::Relaxed),
            method,
            url: url.into(),
            priority: Priority::default(),
            sequence: None,
            retry_policy: Box::new(DefaultRetryPolicy::default()),
            cache_entry: None,
            canceled: CancelHandle::default(),
            delivered: false,
            tag: None,
            headers: HashMap::new(),
            body: None,
            body_content_type: DEFAULT_BODY_CONTENT_TYPE.to_string(),
            should_cache: true,
            markers: Vec::new(),
            created_at: Instant::now(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self { Self::new(Method::Get, url) }

    pub fn post(url: impl Into<String>) -> Self { Self::new(Method::Post, url) }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.body_content_type = content_type.into();
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.set_retry_policy(policy);
        self
    }

    #[must_use]
    pub fn with_retry_config(self, config: &RetryConfig) -> Self {
        self.with_retry_policy(DefaultRetryPolicy::from_config(config))
    }

    #[must_use]
    pub fn with_cache_entry(mut self, entry: Arc<CacheEntry>) -> Self {
        self.cache_entry = Some(entry);
        self
    }

    #[must_use]
    pub fn with_should_cache(mut self, should_cache: bool) -> Self {
        self.should_cache = should_cache;
        self
    }

    pub fn method(&self) -> Method { self.method }

    pub fn url(&self) -> &str { &self.url }

    pub fn priority(&self) -> Priority { self.priority }

    pub fn tag(&self) -> Option<&str> { self.tag.as_deref() }

    pub fn set_tag(&mut self, tag: impl Into<String>) { self.tag = Some(tag.into()); }

    pub fn headers(&self) -> &HashMap<String, String> { &self.headers }

    pub fn body(&self) -> Option<&Bytes> { self.body.as_ref() }

    pub fn body_content_type(&self) -> &str { &self.body_content_type }

    pub fn should_cache(&self) -> bool { self.should_cache }

    /// Key under which responses to this request are cached.
    pub fn cache_key(&self) -> &str { &self.url }

    /// Assign the queue sequence number. Only the first call takes effect;
    /// later calls are rejected.
    pub fn set_sequence(&mut self, sequence: u64) -> Result<()> {
        if self.sequence.is_some() {
            return Err(Error::IllegalState("sequence already assigned"));
        }
        self.sequence = Some(sequence);
        Ok(())
    }

    pub fn sequence(&self) -> Result<u64> {
        self.sequence
            .ok_or(Error::IllegalState("sequence read before it was assigned"))
    }

    pub fn set_retry_policy(&mut self, policy: impl RetryPolicy + 'static) {
        self.retry_policy = Box::new(policy);
    }

    pub fn retry_policy(&self) -> &dyn RetryPolicy { self.retry_policy.as_ref() }

    pub fn retry_policy_mut(&mut self) -> &mut dyn RetryPolicy { self.retry_policy.as_mut() }

    /// I/O deadline for the next attempt, as set by the retry policy.
    pub fn timeout(&self) -> Duration { self.retry_policy.timeout() }

    pub fn set_cache_entry(&mut self, entry: Option<Arc<CacheEntry>>) { self.cache_entry = entry; }

    pub fn cache_entry(&self) -> Option<&CacheEntry> { self.cache_entry.as_deref() }

    pub fn cancel(&self) { self.canceled.cancel(); }

    pub fn is_canceled(&self) -> bool { self.canceled.is_canceled() }

    pub fn cancel_handle(&self) -> CancelHandle { self.canceled.clone() }

    pub fn mark_delivered(&mut self) { self.delivered = true; }

    pub fn has_had_response_delivered(&self) -> bool { self.delivered }

    pub fn add_marker(&mut self, name: impl Into<String>) {
        self.markers.push(Marker {
            name:   name.into(),
            thread: thread::current().id(),
            at:     Instant::now(),
        });
    }

    pub fn markers(&self) -> &[Marker] { &self.markers }

    /// Time since the request was created.
    pub fn age(&self) -> Duration { self.created_at.elapsed() }

    /// Record the final marker and dump the marker log when the request was slow.
    pub fn finish(&mut self, name: &str, slow_threshold: Duration) {
        self.add_marker(name);

        let age = self.age();
        if age < slow_threshold {
            return;
        }

        tracing::debug!(request = %self, age_ms = age.as_millis() as u64, "slow request");
        let mut previous = self.created_at;
        for marker in &self.markers {
            tracing::debug!(
                delta_ms = marker.at.duration_since(previous).as_millis() as u64,
                thread = ?marker.thread,
                marker = %marker.name,
                "marker"
            );
            previous = marker.at;
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .field("retry_policy", &self.retry_policy)
            .field("has_cache_entry", &self.cache_entry.is_some())
            .field("canceled", &self.is_canceled())
            .field("delivered", &self.delivered)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_canceled() { "[X]" } else { "[ ]" };
        write!(f, "{state} {} {} {}", self.url, self.priority, self.method)?;
        match self.sequence {
            Some(sequence) => write!(f, " {sequence}"),
            None => write!(f, " -"),
        }
    }
}

impl Ord for Request {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.sequence.cmp(&other.sequence))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Request {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for Request {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    fn request(priority: Priority, sequence: u64) -> Request {
        let mut request =
            Request::get(format!("https://example.com/{sequence}")).with_priority(priority);
        request.set_sequence(sequence).unwrap();
        request
    }

    #[test]
    fn test_higher_priority_sorts_first() {
        let high = request(Priority::High, 10);
        let low = request(Priority::Low, 1);
        assert!(high < low);

        let immediate = request(Priority::Immediate, 99);
        let normal = request(Priority::Normal, 0);
        assert!(immediate < normal);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let first = request(Priority::Normal, 1);
        let second = request(Priority::Normal, 2);
        assert!(first < second);
        assert_eq!(first.cmp(&first), Ordering::Equal);
    }

    #[test]
    fn test_unsequenced_requests_are_distinct() {
        let first = Request::get("http://a");
        let second = Request::post("http://b");

        assert_ne!(first, second);
        assert!(first < second);
        assert_eq!(first, first);

        let urgent = Request::get("http://c").with_priority(Priority::High);
        assert!(urgent < first);
    }

    #[test]
    fn test_queue_order() {
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(request(Priority::Low, 0)));
        heap.push(Reverse(request(Priority::Normal, 1)));
        heap.push(Reverse(request(Priority::High, 2)));
        heap.push(Reverse(request(Priority::Normal, 3)));
        heap.push(Reverse(request(Priority::Immediate, 4)));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop())
            .map(|Reverse(r)| r.sequence().unwrap())
            .collect();
        assert_eq!(order, vec![4, 2, 1, 3, 0]);
    }

    #[test]
    fn test_sequence_assigned_once() {
        let mut request = Request::get("https://example.com");
        assert!(matches!(request.sequence(), Err(Error::IllegalState(_))));

        request.set_sequence(7).unwrap();
        assert_eq!(request.sequence().unwrap(), 7);

        assert!(matches!(request.set_sequence(8), Err(Error::IllegalState(_))));
        assert_eq!(request.sequence().unwrap(), 7);
    }

    #[test]
    fn test_lifecycle_flags_are_one_way() {
        let mut request = Request::get("https://example.com");
        assert!(!request.is_canceled());
        assert!(!request.has_had_response_delivered());

        request.cancel();
        request.cancel();
        assert!(request.is_canceled());

        request.mark_delivered();
        assert!(request.has_had_response_delivered());
    }

    #[test]
    fn test_cancel_handle_from_another_thread() {
        let request = Request::get("https://example.com").with_tag("images");
        let handle = request.cancel_handle();

        std::thread::spawn(move || handle.cancel()).join().unwrap();

        assert!(request.is_canceled());
        assert_eq!(request.tag(), Some("images"));
    }

    #[test]
    fn test_defaults() {
        let request = Request::get("https://example.com/a");
        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.priority(), Priority::Normal);
        assert_eq!(request.timeout(), Duration::from_millis(2500));
        assert_eq!(request.retry_policy().current_retry_count(), 0);
        assert!(request.cache_entry().is_none());
        assert!(request.should_cache());
        assert_eq!(request.cache_key(), "https://example.com/a");
        assert!(request.body().is_none());
    }

    #[test]
    fn test_replace_retry_policy() {
        let mut request = Request::get("https://example.com");
        request.set_retry_policy(DefaultRetryPolicy::new(100, 3, 0.5));
        assert_eq!(request.timeout(), Duration::from_millis(100));

        let config = RetryConfig::default().initial_timeout_ms(900);
        let request = request.with_retry_config(&config);
        assert_eq!(request.retry_policy().current_timeout(), 900);
    }

    #[test]
    fn test_body_and_headers() {
        let request = Request::post("https://example.com/upload")
            .with_header("X-Trace", "1")
            .with_body(&b"{}"[..], "application/json");

        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.headers().get("X-Trace").map(String::as_str), Some("1"));
        assert_eq!(request.body().map(|b| b.as_ref()), Some(&b"{}"[..]));
        assert_eq!(request.body_content_type(), "application/json");
    }

    #[test]
    fn test_markers() {
        let mut request = Request::get("https://example.com");
        request.add_marker("network-queue-take");
        request.finish("done", Duration::ZERO);

        let names: Vec<&str> = request.markers().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["network-queue-take", "done"]);
        assert!(request.markers()[0].at <= request.markers()[1].at);
    }

    #[test]
    fn test_display() {
        let mut request = Request::get("https://example.com/x").with_priority(Priority::High);
        assert_eq!(request.to_string(), "[ ] https://example.com/x HIGH GET -");

        request.set_sequence(3).unwrap();
        request.cancel();
        assert_eq!(request.to_string(), "[X] https://example.com/x HIGH GET 3");
    }

    #[test]
    fn test_method_serde() {
        assert_eq!(serde_json::to_string(&Method::Delete).unwrap(), "\"DELETE\"");
        let priority: Priority = serde_json::from_str("\"immediate\"").unwrap();
        assert_eq!(priority, Priority::Immediate);
    }
}
