use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

/// Status code of a successful conditional request whose cached body is still valid.
pub const STATUS_NOT_MODIFIED: u16 = 304;

/// Status, body and headers returned by one network execution.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkResponse {
    /// HTTP status code.
    pub status_code: u16,

    /// Raw response body. For a 304 this is the cached body.
    pub body: Bytes,

    /// Response headers, one value per name.
    pub headers: HashMap<String, String>,

    /// True when the server answered 304 and the body came from the cache entry.
    pub not_modified: bool,

    /// Time from the first attempt until this response was produced.
    pub network_time: Duration,
}

impl NetworkResponse {
    pub fn new(
        status_code: u16,
        body: Bytes,
        headers: HashMap<String, String>,
        not_modified: bool,
    ) -> Self {
        Self {
            status_code,
            body,
            headers,
            not_modified,
            network_time: Duration::ZERO,
        }
    }

    /// A 200 response with no headers.
    pub fn ok(body: impl Into<Bytes>) -> Self { Self::new(200, body.into(), HashMap::new(), false) }

    #[must_use]
    pub fn with_network_time(mut self, network_time: Duration) -> Self {
        self.network_time = network_time;
        self
    }

    pub fn is_success(&self) -> bool { (200..=299).contains(&self.status_code) }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
