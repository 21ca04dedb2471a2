use isubench_core::{ConfigError, FailRecord};
use thiserror::Error;

/// Local errors raised while preparing a request. These never reach the
/// target; the caller decides how they are scored.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unable to resolve request path \"{path}\": {source}")]
    Url {
        path: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unable to read upload fixture {path}: {source}")]
    Fixture {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid MIME type \"{0}\" for upload")]
    Mime(String),

    #[error("Unable to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Session producer stopped unexpectedly: {0}")]
    Producer(String),
}

/// Which penalty a failed play carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport error, timeout or a request that could not be built.
    Exception,
    /// The response arrived but was wrong.
    Assertion,
}

/// A scored failure, as returned from a play.
///
/// Displays exactly like the line appended to the fail list.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{record}")]
pub struct Failure {
    pub kind: FailureKind,
    pub record: FailRecord,
}

impl Failure {
    pub fn message(&self) -> &str {
        &self.record.message
    }
}

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("userdata directory is not specified")]
    NotSpecified,

    #[error("userdata path {0} is not a directory")]
    NotADirectory(String),

    #[error("userdata {0} has no entries")]
    Empty(&'static str),

    #[error("Unable to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("No flows registered")]
    NoFlows,

    #[error("Unable to create session: {0}")]
    Session(#[from] SessionError),
}
