//! Conditional-request bookkeeping for asset checks.
//!
//! The store remembers, per request path, the validators a cacheable asset
//! response carried so that later requests for the same path can be sent as
//! conditional requests. A `304 Not Modified` answer to such a request is a
//! correct answer.
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tracing::trace;

pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";
pub const IF_NONE_MATCH: &str = "If-None-Match";

/// Hex encoded SHA-256 digest of a response or fixture body.
pub fn content_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// The subset of `Cache-Control` the checker cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub max_age: Option<Duration>,
}

impl CacheControl {
    pub fn parse(directive: &str) -> Self {
        let mut cc = CacheControl::default();

        for token in directive.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (token, None),
            };

            match name.to_ascii_lowercase().as_str() {
                "no-store" => cc.no_store = true,
                // `no-cache="field"` still forbids reuse without revalidation.
                "no-cache" => cc.no_cache = true,
                "max-age" => {
                    cc.max_age = value
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs);
                }
                _ => {}
            }
        }

        cc
    }

    /// Zero when the directive carries no usable `max-age`.
    pub fn max_age_or_zero(&self) -> Duration {
        self.max_age.unwrap_or(Duration::ZERO)
    }
}

/// Raw validator headers of one response.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseValidators<'a> {
    pub cache_control: Option<&'a str>,
    pub last_modified: Option<&'a str>,
    pub etag: Option<&'a str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlCacheEntry {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub expires_at: SystemTime,
    pub content_hash: String,
}

impl UrlCacheEntry {
    /// Builds an entry from a drained response.
    ///
    /// The body is hashed here and only here; the hash is returned alongside
    /// the entry so callers never need to touch the body again. No entry is
    /// produced when the response has no `Cache-Control` or forbids storing.
    pub fn from_response(
        validators: ResponseValidators<'_>,
        body: &[u8],
        now: SystemTime,
    ) -> (Option<Self>, String) {
        let hash = content_hash(body);

        let directive = match validators.cache_control {
            Some(d) if !d.trim().is_empty() => d,
            _ => return (None, hash),
        };

        let cc = CacheControl::parse(directive);
        if cc.no_store || cc.no_cache {
            trace!("Not caching response: {directive}");
            return (None, hash);
        }

        let entry = Self {
            last_modified: non_empty(validators.last_modified),
            etag: non_empty(validators.etag),
            expires_at: now + cc.max_age_or_zero(),
            content_hash: hash.clone(),
        };

        (Some(entry), hash)
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(SystemTime::now())
    }

    pub fn is_fresh_at(&self, now: SystemTime) -> bool {
        now < self.expires_at
    }

    /// Headers that turn a request into a conditional one.
    ///
    /// Empty once the entry has expired, and only carries the validators the
    /// origin actually sent.
    pub fn conditional_headers_at(&self, now: SystemTime) -> Vec<(&'static str, &str)> {
        let mut headers = Vec::with_capacity(2);
        if !self.is_fresh_at(now) {
            return headers;
        }

        if let Some(lm) = &self.last_modified {
            headers.push((IF_MODIFIED_SINCE, lm.as_str()));
        }
        if let Some(etag) = &self.etag {
            headers.push((IF_NONE_MATCH, etag.as_str()));
        }
        headers
    }

    pub fn conditional_headers(&self) -> Vec<(&'static str, &str)> {
        self.conditional_headers_at(SystemTime::now())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

/// Path keyed store of [`UrlCacheEntry`]. Entries are only ever replaced whole.
#[derive(Debug, Default)]
pub struct UrlCacheStore {
    items: RwLock<HashMap<String, Arc<UrlCacheEntry>>>,
}

impl UrlCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Arc<UrlCacheEntry>> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn set(&self, path: impl Into<String>, entry: UrlCacheEntry) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), Arc::new(entry));
    }

    pub fn len(&self) -> usize {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
