use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

use crate::error::TransportError;
use crate::request::Request;

/// A boxed stream type for response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Response body as a stream of chunks.
pub type Body = BoxStream<'static, io::Result<Bytes>>;

/// What a transport returns once it has a status line.
pub struct TransportResponse {
    pub status: u16,

    pub headers: HashMap<String, String>,

    /// `Content-Length`, when the server declared one. Used as a capacity hint.
    pub content_length: Option<u64>,

    /// `None` when the response has no entity at all.
    pub body: Option<Body>,
}

impl TransportResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            content_length: None,
            body: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// A body delivered as a single chunk, with a matching content length.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        self.content_length = Some(body.len() as u64);
        self.body = Some(Box::pin(futures_util::stream::iter([Ok(body)])));
        self
    }

    #[must_use]
    pub fn body_stream(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn content_length(mut self, content_length: Option<u64>) -> Self {
        self.content_length = content_length;
        self
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .field("body", &self.body.as_ref().map(|_| "{ ... }"))
            .finish()
    }
}

/// Performs a single HTTP exchange.
///
/// The transport owns the wire protocol. It sends the request's own headers
/// plus `extra_headers`, and must use [`Request::timeout`] as its I/O deadline
/// so retries see the backed-off value.
///
/// # Implementations
///
/// - [`ReqwestTransport`]: `reqwest`-backed implementation (feature `reqwest`)
/// - Scripted implementations for testing
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// - [`TransportError::SocketTimeout`] / [`TransportError::ConnectTimeout`]
    ///   when the deadline passes
    /// - [`TransportError::MalformedUrl`] when the URL cannot be used at all
    /// - [`TransportError::Io`] when no response could be obtained
    /// - [`TransportError::AuthFailure`] when credentials could not be supplied
    fn perform(
        &self,
        request: &Request,
        extra_headers: &HashMap<String, String>,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use super::*;
    use futures_util::StreamExt;

    use crate::request::Method;

    /// Transport backed by a `reqwest::Client`.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Self { Self::default() }

        pub fn with_client(client: reqwest::Client) -> Self { Self { client } }
    }

    impl Transport for ReqwestTransport {
        async fn perform(
            &self,
            request: &Request,
            extra_headers: &HashMap<String, String>,
        ) -> Result<TransportResponse, TransportError> {
            let url = reqwest::Url::parse(request.url())
                .map_err(|e| TransportError::MalformedUrl(e.to_string()))?;

            let method = match request.method() {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Delete => reqwest::Method::DELETE,
            };

            let mut builder = self.client.request(method, url).timeout(request.timeout());
            for (name, value) in request.headers().iter().chain(extra_headers) {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body() {
                builder = builder
                    .header(reqwest::header::CONTENT_TYPE, request.body_content_type())
                    .body(body.clone());
            }

            let response = builder.send().await.map_err(map_error)?;

            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_string(), value.to_string()))
                })
                .collect();

            Ok(TransportResponse {
                status: response.status().as_u16(),
                headers,
                content_length: response.content_length(),
                body: Some(Box::pin(
                    response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(io::Error::other)),
                )),
            })
        }
    }

    fn map_error(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            if err.is_connect() {
                TransportError::ConnectTimeout
            } else {
                TransportError::SocketTimeout
            }
        } else if err.is_builder() {
            TransportError::MalformedUrl(err.to_string())
        } else {
            TransportError::Io(io::Error::other(err))
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestTransport;
