//! End-to-end tests for the network executor.
//!
//! A scripted transport plays back a fixed sequence of outcomes and records
//! what the executor sent on every attempt.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use ricochet::{
    AuthFailure, BufferPool, CacheEntry, DefaultRetryPolicy, Error, ExecutorConfig, Method,
    NetworkExecutor, NoDiagnostics, Request, Transport, TransportError, TransportResponse,
};

/// Headers and timeout seen by the transport on one attempt.
#[derive(Debug, Clone)]
struct Attempt {
    headers:    HashMap<String, String>,
    timeout_ms: u64,
}

struct ScriptedTransport {
    script:   Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    attempts: Mutex<Vec<Attempt>>,
}

impl ScriptedTransport {
    fn new(script: impl IntoIterator<Item = Result<TransportResponse, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    fn attempts(&self) -> Vec<Attempt> { self.attempts.lock().unwrap().clone() }
}

impl Transport for ScriptedTransport {
    async fn perform(
        &self,
        request: &Request,
        extra_headers: &HashMap<String, String>,
    ) -> Result<TransportResponse, TransportError> {
        self.attempts.lock().unwrap().push(Attempt {
            headers:    extra_headers.clone(),
            timeout_ms: request.retry_policy().current_timeout(),
        });
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .expect("transport called more often than scripted")
    }
}

fn executor(
    script: impl IntoIterator<Item = Result<TransportResponse, TransportError>>,
) -> NetworkExecutor<ScriptedTransport> {
    NetworkExecutor::new(ScriptedTransport::new(script)).with_diagnostics(NoDiagnostics)
}

fn ok(body: &'static str) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse::new(200).body(body))
}

fn status(code: u16) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse::new(code).body(format!("status {code}")))
}

fn marker_names(request: &Request) -> Vec<String> {
    request.markers().iter().map(|marker| marker.name.clone()).collect()
}

#[tokio::test]
async fn test_success_path() {
    let executor = executor([Ok(TransportResponse::new(200)
        .header("Content-Type", "text/plain")
        .body("hello"))]);
    let mut request = Request::get("http://example.com/hello");

    let response = executor.execute(&mut request).await.unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, Bytes::from_static(b"hello"));
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert!(!response.not_modified);

    let attempts = executor.transport().attempts();
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].headers.is_empty());
    assert_eq!(attempts[0].timeout_ms, 2500);
}

#[tokio::test]
async fn test_absent_body_is_empty() {
    let executor = executor([Ok(TransportResponse::new(204))]);
    let mut request = Request::get("http://example.com/empty");

    let response = executor.execute(&mut request).await.unwrap();
    assert_eq!(response.status_code, 204);
    assert!(response.body.is_empty());
    assert!(executor.pool().is_empty());
}

#[tokio::test]
async fn test_not_modified_returns_cached_body() {
    let server_date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let entry = CacheEntry::new("cached body")
        .etag("abc123")
        .server_date(server_date);

    // the body must never be read on a 304
    let body = futures_util::stream::iter([Err::<Bytes, _>(io::Error::other("must not be read"))]);
    let executor = executor([Ok(TransportResponse::new(304).body_stream(Box::pin(body)))]);
    let mut request = Request::get("http://example.com/cached").with_cache_entry(Arc::new(entry));

    let response = executor.execute(&mut request).await.unwrap();
    assert_eq!(response.status_code, 304);
    assert!(response.not_modified);
    assert_eq!(response.body, Bytes::from_static(b"cached body"));

    let attempts = executor.transport().attempts();
    assert_eq!(attempts[0].headers.get("If-None-Match").map(String::as_str), Some("abc123"));
    assert_eq!(
        attempts[0].headers.get("If-Modified-Since").map(String::as_str),
        Some("Fri, 01 Mar 2024 12:00:00 GMT")
    );
    assert_eq!(request.retry_policy().current_retry_count(), 0);
}

#[tokio::test]
async fn test_not_modified_without_entry() {
    let executor = executor([Ok(TransportResponse::new(304))]);
    let mut request = Request::get("http://example.com/cached");

    let response = executor.execute(&mut request).await.unwrap();
    assert!(response.not_modified);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_epoch_server_date_is_not_sent() {
    let entry = CacheEntry::new("x").server_date(chrono::DateTime::<Utc>::UNIX_EPOCH);
    let executor = executor([ok("fresh")]);
    let mut request = Request::get("http://example.com/").with_cache_entry(Arc::new(entry));

    executor.execute(&mut request).await.unwrap();
    assert!(executor.transport().attempts()[0].headers.is_empty());
}

#[tokio::test]
async fn test_timeouts_back_off_then_succeed() {
    let executor = executor([
        Err(TransportError::SocketTimeout),
        Err(TransportError::ConnectTimeout),
        ok("finally"),
    ]);
    let mut request = Request::get("http://example.com/slow")
        .with_retry_policy(DefaultRetryPolicy::new(1000, 2, 1.0));

    let response = executor.execute(&mut request).await.unwrap();
    assert_eq!(response.body, Bytes::from_static(b"finally"));

    let timeouts: Vec<u64> = executor
        .transport()
        .attempts()
        .iter()
        .map(|attempt| attempt.timeout_ms)
        .collect();
    assert_eq!(timeouts, vec![1000, 2000, 4000]);
    assert_eq!(request.retry_policy().current_retry_count(), 2);
    assert_eq!(
        marker_names(&request),
        vec![
            "socket-timeout-retry [timeout=1000]".to_string(),
            "connection-timeout-retry [timeout=2000]".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_timeouts_exhaust_policy() {
    let executor = executor([
        Err(TransportError::SocketTimeout),
        Err(TransportError::SocketTimeout),
    ]);
    let mut request = Request::get("http://example.com/slow")
        .with_retry_policy(DefaultRetryPolicy::new(1000, 1, 0.5));

    let err = executor.execute(&mut request).await.unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert_eq!(request.retry_policy().current_retry_count(), 2);
    assert_eq!(
        marker_names(&request).last().map(String::as_str),
        Some("socket-timeout-giveup [timeout=1500]")
    );
}

#[tokio::test]
async fn test_malformed_url_does_not_touch_policy() {
    let executor = executor([Err(TransportError::MalformedUrl("relative URL".into()))]);
    let mut request = Request::get("not a url");

    let err = executor.execute(&mut request).await.unwrap_err();
    match err {
        Error::MalformedUrl { url, reason } => {
            assert_eq!(url, "not a url");
            assert_eq!(reason, "relative URL");
        }
        other => panic!("expected MalformedUrl, got {other:?}"),
    }
    assert_eq!(request.retry_policy().current_retry_count(), 0);
    assert_eq!(request.retry_policy().current_timeout(), 2500);
    assert!(request.markers().is_empty());
}

#[tokio::test]
async fn test_io_failure_is_no_connection() {
    let executor = executor([Err(TransportError::Io(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        "refused",
    )))]);
    let mut request = Request::get("http://example.com/");

    let err = executor.execute(&mut request).await.unwrap_err();
    assert!(matches!(
        err,
        Error::NoConnection(ref e) if e.kind() == io::ErrorKind::ConnectionRefused
    ));
    assert!(err.network_response().is_none());
    assert_eq!(executor.transport().attempts().len(), 1);
}

#[tokio::test]
async fn test_body_read_failure_is_retried() {
    let broken = futures_util::stream::iter([
        Ok(Bytes::from_static(b"partial")),
        Err(io::Error::new(io::ErrorKind::UnexpectedEof, "reset")),
    ]);
    let executor = executor([
        Ok(TransportResponse::new(200).body_stream(Box::pin(broken))),
        ok("complete"),
    ]);
    let mut request = Request::get("http://example.com/");

    let response = executor.execute(&mut request).await.unwrap();
    assert_eq!(response.body, Bytes::from_static(b"complete"));
    assert_eq!(request.retry_policy().current_retry_count(), 1);
    assert_eq!(marker_names(&request), vec!["network-retry [timeout=2500]".to_string()]);
    // the buffer of the failed read went back to the pool
    assert_eq!(executor.pool().len(), 1);
}

#[tokio::test]
async fn test_body_read_failure_exhausts_policy() {
    let broken = || {
        let stream = futures_util::stream::iter([Err::<Bytes, _>(io::Error::other("reset"))]);
        Ok(TransportResponse::new(200).body_stream(Box::pin(stream)))
    };
    let executor = executor([broken(), broken()]);
    let mut request = Request::get("http://example.com/");

    let err = executor.execute(&mut request).await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
}

#[tokio::test]
async fn test_server_error_retried_then_succeeds() {
    let executor = executor([status(503), ok("recovered")]);
    let mut request = Request::get("http://example.com/");

    let response = executor.execute(&mut request).await.unwrap();
    assert_eq!(response.body, Bytes::from_static(b"recovered"));
    assert_eq!(marker_names(&request), vec!["server-error-retry [timeout=2500]".to_string()]);
}

#[tokio::test]
async fn test_server_error_surfaces_response() {
    let executor = executor([status(500), status(502)]);
    let mut request = Request::get("http://example.com/");

    let err = executor.execute(&mut request).await.unwrap_err();
    let response = err.network_response().unwrap();
    assert_eq!(response.status_code, 502);
    assert_eq!(response.body, Bytes::from_static(b"status 502"));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let executor = executor([status(404)]);
    let mut request = Request::get("http://example.com/missing");

    let err = executor.execute(&mut request).await.unwrap_err();
    assert!(matches!(err, Error::Client(ref response) if response.status_code == 404));
    assert_eq!(request.retry_policy().current_retry_count(), 0);
}

#[tokio::test]
async fn test_unauthorized_is_auth_failure() {
    for code in [401, 403] {
        let executor = executor([status(code)]);
        let mut request = Request::get("http://example.com/private");

        let err = executor.execute(&mut request).await.unwrap_err();
        assert!(matches!(err, Error::AuthFailure(_)));
        assert_eq!(err.network_response().unwrap().status_code, code);
    }
}

#[tokio::test]
async fn test_transport_auth_failure_keeps_resolution() {
    let executor = executor([Err(TransportError::AuthFailure(AuthFailure::with_resolution(
        "sign in again",
    )))]);
    let mut request = Request::get("http://example.com/private");

    match executor.execute(&mut request).await.unwrap_err() {
        Error::AuthFailure(auth) => assert_eq!(auth.resolution(), Some("sign in again")),
        other => panic!("expected AuthFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_large_body_grows_through_pool() {
    let chunks: Vec<io::Result<Bytes>> =
        (0..10).map(|i| Ok(Bytes::from(vec![i as u8; 100]))).collect();
    let body = futures_util::stream::iter(chunks);
    let executor = NetworkExecutor::from_config(
        ScriptedTransport::new([Ok(TransportResponse::new(200).body_stream(Box::pin(body)))]),
        &ExecutorConfig::default().pool_size_limit(8192),
    )
    .with_diagnostics(NoDiagnostics);
    let mut request = Request::get("http://example.com/big");

    let response = executor.execute(&mut request).await.unwrap();
    assert_eq!(response.body.len(), 1000);
    assert_eq!(response.body[950], 9);
    assert!(executor.pool().current_size() <= 8192);
}

#[tokio::test]
async fn test_shared_pool_across_workers() {
    /// Echoes the URL back as the body.
    struct Echo;

    impl Transport for Echo {
        async fn perform(
            &self,
            request: &Request,
            _extra_headers: &HashMap<String, String>,
        ) -> Result<TransportResponse, TransportError> {
            tokio::task::yield_now().await;
            Ok(TransportResponse::new(200).body(request.url().to_string()))
        }
    }

    let pool = Arc::new(BufferPool::new(4096));
    let executor = Arc::new(
        NetworkExecutor::new(Echo)
            .with_pool(Arc::clone(&pool))
            .with_diagnostics(NoDiagnostics),
    );

    let mut handles = Vec::new();
    for i in 0..16 {
        let executor = Arc::clone(&executor);
        handles.push(tokio::spawn(async move {
            let url = format!("http://example.com/{i}");
            let mut request = Request::get(url.clone());
            let response = executor.execute(&mut request).await.unwrap();
            assert_eq!(response.body, Bytes::from(url));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(!pool.is_empty());
    assert!(pool.current_size() <= pool.size_limit());
}

#[tokio::test]
async fn test_verbose_tracing_diagnostics() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ricochet=debug")
        .with_test_writer()
        .try_init();

    let executor = NetworkExecutor::from_config(
        ScriptedTransport::new([status(503), ok("traced")]),
        &ExecutorConfig::default().verbose(true),
    );
    let mut request = Request::get("http://example.com/traced");

    let response = executor.execute(&mut request).await.unwrap();
    assert_eq!(response.body, Bytes::from_static(b"traced"));
    request.finish("done", std::time::Duration::ZERO);
    assert_eq!(request.markers().len(), 2);
}

#[tokio::test]
async fn test_configured_retries_change_attempt_count() {
    let config: ExecutorConfig = toml::from_str(
        r#"
        [retry]
        initial_timeout_ms = 100
        max_retries = 3
        "#,
    )
    .unwrap();
    let timeouts = || (0..3).map(|_| Err(TransportError::SocketTimeout));

    let configured = NetworkExecutor::from_config(
        ScriptedTransport::new(timeouts().chain([ok("third retry")])),
        &config,
    )
    .with_diagnostics(NoDiagnostics);
    let mut request = configured.request(Method::Get, "http://example.com/flaky");

    let response = configured.execute(&mut request).await.unwrap();
    assert_eq!(response.body, Bytes::from_static(b"third retry"));
    let sent: Vec<u64> = configured
        .transport()
        .attempts()
        .iter()
        .map(|attempt| attempt.timeout_ms)
        .collect();
    assert_eq!(sent, vec![100, 200, 400, 800]);

    // the same script exhausts a request built with the default policy
    let defaults = executor(timeouts().chain([ok("unreachable")]));
    let mut request = Request::get("http://example.com/flaky");

    let err = defaults.execute(&mut request).await.unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert_eq!(defaults.transport().attempts().len(), 2);
}
