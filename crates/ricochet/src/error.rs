//! Error types for ricochet.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::response::NetworkResponse;

#[derive(Debug, Error)]
pub enum Error {
    #[error("request timed out")]
    Timeout,

    #[error("bad URL {url}: {reason}")]
    MalformedUrl { url: String, reason: String },

    #[error("no connection: {0}")]
    NoConnection(#[source] io::Error),

    #[error("network error: {0}")]
    Network(#[source] io::Error),

    #[error("server error (status {})", .0.status_code)]
    Server(Box<NetworkResponse>),

    #[error("client error (status {})", .0.status_code)]
    Client(Box<NetworkResponse>),

    #[error(transparent)]
    AuthFailure(#[from] AuthFailure),

    #[error("illegal state: {0}")]
    IllegalState(&'static str),
}

impl Error {
    /// The response of the failing attempt, when the server sent one.
    pub fn network_response(&self) -> Option<&NetworkResponse> {
        match self {
            Error::Server(response) | Error::Client(response) => Some(response),
            Error::AuthFailure(auth) => auth.response(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Authentication was rejected.
///
/// The optional resolution is a hint the caller can act on, such as prompting
/// for credentials again. It is never acted on here.
#[derive(Debug, Default)]
pub struct AuthFailure {
    message:    Option<String>,
    resolution: Option<String>,
    response:   Option<Box<NetworkResponse>>,
}

impl AuthFailure {
    pub fn new() -> Self { Self::default() }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_resolution(resolution: impl Into<String>) -> Self {
        Self {
            resolution: Some(resolution.into()),
            ..Self::default()
        }
    }

    pub fn from_response(response: NetworkResponse) -> Self {
        Self {
            response: Some(Box::new(response)),
            ..Self::default()
        }
    }

    pub fn resolution(&self) -> Option<&str> { self.resolution.as_deref() }

    pub fn response(&self) -> Option<&NetworkResponse> { self.response.as_deref() }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.resolution.is_some() {
            return write!(f, "user needs to (re)enter credentials");
        }
        match (&self.message, &self.response) {
            (Some(message), _) => write!(f, "authentication failed: {message}"),
            (None, Some(response)) => {
                write!(f, "authentication failed (status {})", response.status_code)
            }
            (None, None) => write!(f, "authentication failed"),
        }
    }
}

impl std::error::Error for AuthFailure {}

/// Failures a [`Transport`](crate::Transport) reports for a single attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket timeout")]
    SocketTimeout,

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    AuthFailure(#[from] AuthFailure),
}
