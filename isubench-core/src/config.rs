use crate::constants::*;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid target host \"{0}\": {1}")]
    InvalidTarget(String, url::ParseError),

    #[error("Target host \"{0}\" has no host component")]
    EmptyHost(String),

    #[error("Pool capacity must be at least 1")]
    EmptyPool,

    #[error("Flow \"{name}\" needs {needed} sessions per iteration but the pool only holds {capacity}")]
    PoolTooSmall {
        name: String,
        needed: usize,
        capacity: usize,
    },
}

/// Scheme and authority of the service under test.
///
/// Any path, query or fragment of the configured value is dropped, so every
/// request path resolves against the root of the host.
#[derive(Clone, PartialEq, Eq)]
pub struct TargetHost {
    base: Url,
}

impl TargetHost {
    pub fn parse(host: &str) -> Result<Self, ConfigError> {
        let input = host.trim();
        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("http://{input}")
        };

        let parsed = Url::parse(&with_scheme)
            .map_err(|err| ConfigError::InvalidTarget(host.to_string(), err))?;

        let hostname = match parsed.host_str() {
            Some(h) if !h.is_empty() => h,
            _ => return Err(ConfigError::EmptyHost(host.to_string())),
        };

        let authority = match parsed.port() {
            Some(port) => format!("{hostname}:{port}"),
            None => hostname.to_string(),
        };

        let base = Url::parse(&format!("{}://{}/", parsed.scheme(), authority))
            .map_err(|err| ConfigError::InvalidTarget(host.to_string(), err))?;

        Ok(Self { base })
    }

    /// Resolves `path` against the target. Absolute URLs are returned unchanged.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base.join(path)
    }

    pub fn as_url(&self) -> &Url {
        &self.base
    }
}

impl fmt::Display for TargetHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base.as_str().trim_end_matches('/'))
    }
}

impl fmt::Debug for TargetHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetHost({self})")
    }
}

/// Signed point values applied per outcome.
///
/// Competitions have changed these numbers between rounds, so they are
/// loaded from configuration rather than baked into the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreTable {
    /// Points for any successful play.
    pub success_get: i64,
    /// Extra points for a successful state-changing (POST) play.
    pub bonus_post: i64,
    /// Extra points for a successful upload.
    pub bonus_upload: i64,
    /// Penalty for an assertion failure (status, location, body, cache).
    pub fail_error: i64,
    /// Penalty for a transport failure or timeout.
    pub fail_exception: i64,
}

impl Default for ScoreTable {
    fn default() -> Self {
        Self {
            success_get: DEFAULT_SUCCESS_GET,
            bonus_post: DEFAULT_BONUS_POST,
            bonus_upload: DEFAULT_BONUS_UPLOAD,
            fail_error: DEFAULT_FAIL_ERROR,
            fail_exception: DEFAULT_FAIL_EXCEPTION,
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(with = "target_serde")]
    pub target: TargetHost,
    #[serde_as(as = "DurationSeconds")]
    #[serde(default = "default_duration")]
    pub duration: Duration,
    #[serde_as(as = "DurationMilliSeconds")]
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds")]
    #[serde(default = "default_initialize_timeout")]
    pub initialize_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds")]
    #[serde(default = "default_drain")]
    pub drain: Duration,
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u64,
    #[serde(default)]
    pub scores: ScoreTable,
}

impl BenchConfig {
    pub fn new(target: TargetHost) -> Self {
        Self {
            target,
            duration: DEFAULT_BENCHMARK_DURATION,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            initialize_timeout: DEFAULT_INITIALIZE_TIMEOUT,
            drain: DEFAULT_DRAIN,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
            scores: ScoreTable::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_capacity == 0 {
            return Err(ConfigError::EmptyPool);
        }
        Ok(())
    }
}

impl fmt::Display for BenchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target={}, duration={}, request_timeout={}, pool={}",
            self.target,
            humantime::format_duration(self.duration),
            humantime::format_duration(self.request_timeout),
            self.pool_capacity,
        )
    }
}

fn default_duration() -> Duration {
    DEFAULT_BENCHMARK_DURATION
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_initialize_timeout() -> Duration {
    DEFAULT_INITIALIZE_TIMEOUT
}

fn default_drain() -> Duration {
    DEFAULT_DRAIN
}

fn default_pool_capacity() -> usize {
    DEFAULT_POOL_CAPACITY
}

fn default_fail_threshold() -> u64 {
    DEFAULT_FAIL_THRESHOLD
}

mod target_serde {
    use super::TargetHost;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(target: &TargetHost, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(target)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<TargetHost, D::Error> {
        let raw = String::deserialize(d)?;
        TargetHost::parse(&raw).map_err(D::Error::custom)
    }
}
