//! One simulated actor's HTTP state.
use crate::context::BenchContext;
use crate::error::{Failure, FailureKind, SessionError};
use crate::fixtures::Asset;
use isubench_core::{FailRecord, USER_AGENT};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use std::path::Path;
use std::sync::Arc;
use url::Url;
#[allow(unused_imports)]
use tracing::{debug, error, trace, warn};

/// An actor's cookie jar and transport, bound to the configured target.
///
/// Cloning a `Session` yields another handle to the *same* actor (same jar,
/// same connection pool). Requests issued through one actor must stay
/// sequential; the session pool only ever hands a session to one worker.
#[derive(Clone)]
pub struct Session {
    client: Client,
    jar: Arc<Jar>,
    ctx: Arc<BenchContext>,
}

impl Session {
    pub fn new(ctx: Arc<BenchContext>) -> Result<Self, SessionError> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(USER_AGENT)
            .timeout(ctx.config().request_timeout)
            .build()?;

        Ok(Self { client, jar, ctx })
    }

    pub fn context(&self) -> &Arc<BenchContext> {
        &self.ctx
    }

    /// Resolves `path` against the target host. Absolute URLs pass through.
    pub fn resolve(&self, path: &str) -> Result<Url, SessionError> {
        self.ctx
            .target()
            .resolve(path)
            .map_err(|source| SessionError::Url {
                path: path.to_string(),
                source,
            })
    }

    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, SessionError> {
        let url = self.resolve(path)?;
        Ok(self.request_url(method, url))
    }

    pub fn request_url(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Builds a `multipart/form-data` body with the fixture under `param_name`.
    ///
    /// The part's `Content-Type` is the fixture's declared MIME type; nothing
    /// is sniffed from the file contents.
    pub async fn upload_form(
        &self,
        fields: &[(String, String)],
        param_name: &str,
        asset: &Asset,
    ) -> Result<Form, SessionError> {
        let data = tokio::fs::read(&asset.path)
            .await
            .map_err(|source| SessionError::Fixture {
                path: asset.path.display().to_string(),
                source,
            })?;

        let file_name = Path::new(&asset.path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str(&asset.mime_type)
            .map_err(|_| SessionError::Mime(asset.mime_type.clone()))?;

        let mut form = Form::new().part(param_name.to_string(), part);
        for (key, value) in fields {
            form = form.text(key.clone(), value.clone());
        }

        Ok(form)
    }

    /// Sends one request. No retries; the client's timeout bounds the call.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, reqwest::Error> {
        request.send().await
    }

    /// The `Cookie` header this session would send to `url`, if any.
    pub fn cookies(&self, url: &Url) -> Option<String> {
        self.jar
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    pub fn success(&self, points: i64) {
        self.ctx.score().record_success(points);
    }

    pub fn bonus(&self, points: i64) {
        self.ctx.score().record_bonus(points);
    }

    /// Records a failure with the penalty for `kind` and returns it.
    pub fn fail(
        &self,
        kind: FailureKind,
        method: &Method,
        path: &str,
        message: impl Into<String>,
    ) -> Failure {
        let points = match kind {
            FailureKind::Exception => self.ctx.scores().fail_exception,
            FailureKind::Assertion => self.ctx.scores().fail_error,
        };
        let record = FailRecord::new(method.as_str(), path, message);
        self.ctx.score().record_failure(points, record.clone());
        Failure { kind, record }
    }

    /// Scores a transport error. Timeouts get their own message so they are
    /// easy to tell apart in the report.
    pub fn transport_failure(&self, method: &Method, path: &str, err: &reqwest::Error) -> Failure {
        if err.is_timeout() {
            debug!("{method} {path} timed out: {err}");
            self.fail(FailureKind::Exception, method, path, "request timed out")
        } else {
            warn!("{method} {path} failed: {err}");
            self.fail(FailureKind::Exception, method, path, "request failed")
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("target", self.ctx.target())
            .finish()
    }
}
