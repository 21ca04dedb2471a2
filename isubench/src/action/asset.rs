use crate::error::{Failure, FailureKind};
use crate::session::Session;
use isubench_core::{ResponseValidators, UrlCacheEntry};
use reqwest::header::{HeaderMap, HeaderName, CACHE_CONTROL, ETAG, LAST_MODIFIED};
use reqwest::{Method, StatusCode};
use std::time::SystemTime;
use tracing::{debug, instrument};

/// Fetches a static or user generated binary and checks it is correct,
/// honouring conditional caching.
#[derive(Clone, Debug)]
pub struct AssetAction {
    path: String,
    expected_hash: Option<String>,
}

impl AssetAction {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expected_hash: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// A copy of this template expecting the body to hash to `hash`.
    pub fn with_hash(&self, hash: impl Into<String>) -> Self {
        Self {
            path: self.path.clone(),
            expected_hash: Some(hash.into()),
        }
    }

    /// Plays the fetch once and scores the outcome.
    ///
    /// Correct answers are a `304` to a request sent while a cache entry
    /// existed, or a `200` whose response was stored as a new cache entry or
    /// whose body hash matches the expectation. Without an expected hash any
    /// `200` is correct.
    #[instrument(name = "asset", skip_all, fields(path = %self.path))]
    pub async fn play(&self, session: &Session) -> Result<(), Failure> {
        let method = Method::GET;

        let url = match session.resolve(&self.path) {
            Ok(url) => url,
            Err(err) => {
                debug!("{err}");
                return Err(session.fail(
                    FailureKind::Exception,
                    &method,
                    &self.path,
                    "failed to build request",
                ));
            }
        };
        let key = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };

        let mut request = session.request_url(method.clone(), url);

        let cached = session.context().cache().get(&key);
        if let Some(entry) = &cached {
            for (name, value) in entry.conditional_headers() {
                request = request.header(name, value);
            }
        }

        let res = match session.send(request).await {
            Ok(res) => res,
            Err(err) => return Err(session.transport_failure(&method, &self.path, &err)),
        };

        let status = res.status();
        let final_path = res.url().path().to_string();
        let validators = OwnedValidators::from_headers(res.headers());

        let body = match res.bytes().await {
            Ok(body) => body,
            Err(err) => return Err(session.transport_failure(&method, &self.path, &err)),
        };

        let (entry, hash) =
            UrlCacheEntry::from_response(validators.borrowed(), &body, SystemTime::now());
        let stored = entry.is_some();
        if let Some(entry) = entry {
            session.context().cache().set(key, entry);
        }

        let revalidated = cached.is_some() && status == StatusCode::NOT_MODIFIED;
        let fetched = status == StatusCode::OK
            && (stored || self.expected_hash.as_deref().map_or(true, |h| h == hash));

        if !(revalidated || fetched) {
            debug!(
                "status {}, expected {:?}, got {hash}",
                status.as_u16(),
                self.expected_hash
            );
            return Err(session.fail(
                FailureKind::Assertion,
                &method,
                &final_path,
                "static file is not correct",
            ));
        }

        session.success(session.context().scores().success_get);
        Ok(())
    }
}

struct OwnedValidators {
    cache_control: Option<String>,
    last_modified: Option<String>,
    etag: Option<String>,
}

impl OwnedValidators {
    fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            cache_control: get(CACHE_CONTROL),
            last_modified: get(LAST_MODIFIED),
            etag: get(ETAG),
        }
    }

    fn borrowed(&self) -> ResponseValidators<'_> {
        ResponseValidators {
            cache_control: self.cache_control.as_deref(),
            last_modified: self.last_modified.as_deref(),
            etag: self.etag.as_deref(),
        }
    }
}
