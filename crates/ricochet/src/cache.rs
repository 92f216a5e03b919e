//! Cache entries and conditional-request support.
//!
//! The executor only reads [`CacheEntry`] values; storing responses is the job
//! of whoever drives it, through the [`Cache`] trait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};

use crate::response::NetworkResponse;

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format a timestamp the way HTTP date headers expect it.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use ricochet::cache::format_http_date;
///
/// let date = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
/// assert_eq!(format_http_date(date), "Sun, 06 Nov 1994 08:49:37 GMT");
/// ```
pub fn format_http_date(date: DateTime<Utc>) -> String { date.format(IMF_FIXDATE).to_string() }

/// Parse an HTTP date header. Returns `None` for anything unparseable.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// A previously stored response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Cached body.
    pub data: Bytes,

    /// ETag validator, if the server sent one.
    pub etag: Option<String>,

    /// `Date` of the original response.
    pub server_date: Option<DateTime<Utc>>,

    /// Hard expiry: the entry must not be used after this.
    pub ttl: DateTime<Utc>,

    /// Soft expiry: the entry should be refreshed after this.
    pub soft_ttl: DateTime<Utc>,

    /// Headers of the original response.
    pub headers: HashMap<String, String>,
}

impl CacheEntry {
    /// An entry that is already expired until TTLs are set.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data:        data.into(),
            etag:        None,
            server_date: None,
            ttl:         DateTime::<Utc>::UNIX_EPOCH,
            soft_ttl:    DateTime::<Utc>::UNIX_EPOCH,
            headers:     HashMap::new(),
        }
    }

    #[must_use]
    pub fn etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    #[must_use]
    pub fn server_date(mut self, server_date: DateTime<Utc>) -> Self {
        self.server_date = Some(server_date);
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: DateTime<Utc>) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn soft_ttl(mut self, soft_ttl: DateTime<Utc>) -> Self {
        self.soft_ttl = soft_ttl;
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn is_expired(&self) -> bool { self.is_expired_at(Utc::now()) }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool { now > self.ttl }

    pub fn refresh_needed(&self) -> bool { self.refresh_needed_at(Utc::now()) }

    pub fn refresh_needed_at(&self, now: DateTime<Utc>) -> bool { now > self.soft_ttl }

    /// Validator headers for a conditional request against this entry.
    ///
    /// `If-Modified-Since` is only sent for a server date after the epoch.
    pub fn conditional_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();

        if let Some(etag) = &self.etag {
            headers.insert("If-None-Match".to_string(), etag.clone());
        }

        if let Some(date) = self.server_date.filter(|date| date.timestamp_millis() > 0) {
            headers.insert("If-Modified-Since".to_string(), format_http_date(date));
        }

        headers
    }
}

/// The subset of `Cache-Control` that decides cacheability and freshness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub max_age:                Option<u64>,
    pub stale_while_revalidate: Option<u64>,
    pub no_cache:               bool,
    pub no_store:               bool,
    pub must_revalidate:        bool,
    pub proxy_revalidate:       bool,
}

impl CacheControl {
    pub fn parse(header: &str) -> Self {
        let mut control = Self::default();

        for directive in header.split(',') {
            let directive = directive.trim();

            match directive {
                "no-cache" => control.no_cache = true,
                "no-store" => control.no_store = true,
                "must-revalidate" => control.must_revalidate = true,
                "proxy-revalidate" => control.proxy_revalidate = true,
                _ => {
                    if let Some(max_age) = directive.strip_prefix("max-age=") {
                        control.max_age = max_age.parse().ok();
                    } else if let Some(swr) = directive.strip_prefix("stale-while-revalidate=") {
                        control.stale_while_revalidate = swr.parse().ok();
                    }
                }
            }
        }

        control
    }

    pub fn is_cacheable(&self) -> bool { !self.no_store && !self.no_cache }

    fn requires_revalidation(&self) -> bool { self.must_revalidate || self.proxy_revalidate }
}

/// Build a cache entry from a response's caching headers.
///
/// Returns `None` when `Cache-Control` forbids caching. Freshness comes from
/// `max-age` when present, otherwise from `Expires - Date`. Without either the
/// entry is stored already stale, so the next use revalidates.
pub fn parse_cache_headers(response: &NetworkResponse, now: DateTime<Utc>) -> Option<CacheEntry> {
    let server_date = response.header("Date").and_then(parse_http_date);
    let expires = response.header("Expires").and_then(parse_http_date);
    let control = response.header("Cache-Control").map(CacheControl::parse);

    let (soft_ttl, ttl) = match &control {
        Some(control) => {
            if !control.is_cacheable() {
                return None;
            }
            let soft_ttl = offset(now, seconds(control.max_age.unwrap_or(0)));
            let ttl = if control.requires_revalidation() {
                soft_ttl
            } else {
                offset(soft_ttl, seconds(control.stale_while_revalidate.unwrap_or(0)))
            };
            (soft_ttl, ttl)
        }
        None => match (server_date, expires) {
            (Some(date), Some(expires)) if expires >= date => {
                let soft_ttl = offset(now, expires - date);
                (soft_ttl, soft_ttl)
            }
            _ => (now, now),
        },
    };

    Some(CacheEntry {
        data: response.body.clone(),
        etag: response.header("ETag").map(str::to_string),
        server_date,
        ttl,
        soft_ttl,
        headers: response.headers.clone(),
    })
}

fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

fn offset(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A keyed store of cache entries, shared between workers.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<CacheEntry>>;

    fn put(&self, key: &str, entry: CacheEntry);

    /// Perform any slow setup. Called once from a worker before first use.
    fn initialize(&self);

    /// Mark an entry as needing refresh; with `full_expire` it also becomes unusable.
    fn invalidate(&self, key: &str, full_expire: bool);

    fn remove(&self, key: &str);

    fn clear(&self);
}

/// Bounded in-memory [`Cache`]. The oldest insertion is evicted first.
#[derive(Debug)]
pub struct MemoryCache {
    inner:       Mutex<MemoryCacheInner>,
    max_entries: usize,
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries:   HashMap<String, (u64, Arc<CacheEntry>)>,
    next_slot: u64,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryCacheInner::default()),
            max_entries,
        }
    }

    pub fn len(&self) -> usize { self.lock().entries.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn lock(&self) -> MutexGuard<'_, MemoryCacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryCacheInner {
    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, (slot, _))| *slot)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.lock().entries.get(key).map(|(_, entry)| Arc::clone(entry))
    }

    fn put(&self, key: &str, entry: CacheEntry) {
        if self.max_entries == 0 {
            return;
        }

        let mut inner = self.lock();
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_entries {
            inner.evict_oldest();
        }

        let slot = inner.next_slot;
        inner.next_slot += 1;
        inner.entries.insert(key.to_string(), (slot, Arc::new(entry)));
    }

    fn initialize(&self) {}

    fn invalidate(&self, key: &str, full_expire: bool) {
        let mut inner = self.lock();
        if let Some((_, entry)) = inner.entries.get_mut(key) {
            let mut updated = CacheEntry::clone(entry);
            updated.soft_ttl = DateTime::<Utc>::UNIX_EPOCH;
            if full_expire {
                updated.ttl = DateTime::<Utc>::UNIX_EPOCH;
            }
            *entry = Arc::new(updated);
        }
    }

    fn remove(&self, key: &str) { self.lock().entries.remove(key); }

    fn clear(&self) { self.lock().entries.clear(); }
}
