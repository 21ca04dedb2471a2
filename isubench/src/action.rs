//! Scripted HTTP interactions and their success criteria.
//!
//! An [`Action`] is an immutable template. Per-play data (form fields, an
//! upload fixture) is bound with the `with_*` methods, which return a new
//! value, so one template can be shared by any number of concurrent plays.
use crate::error::{Failure, FailureKind};
use crate::session::Session;
use regex::Regex;
use reqwest::{Method, Response, StatusCode};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

mod asset;
mod upload;

pub use asset::AssetAction;
pub use upload::UploadAction;

pub type CheckFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Body validator. Gets a handle to the playing session (so it can issue
/// nested plays) and the fully read response body.
pub type CheckFn = Arc<dyn Fn(Session, String) -> CheckFuture + Send + Sync>;

/// Expected final path of a play, after redirects.
#[derive(Clone, Debug)]
pub enum Location {
    Exact(String),
    Pattern(Regex),
}

impl Location {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Location::Exact(expected) => expected == path,
            Location::Pattern(re) => re.is_match(path),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Exact(expected) => write!(f, "{expected}"),
            Location::Pattern(re) => write!(f, "{}", re.as_str()),
        }
    }
}

/// Status, location and body criteria shared by plain and upload actions.
#[derive(Clone)]
pub(crate) struct Expectations {
    pub status: StatusCode,
    pub location: Option<Location>,
    pub check: Option<CheckFn>,
}

impl Default for Expectations {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            location: None,
            check: None,
        }
    }
}

impl Expectations {
    /// Drains `res` and runs every criterion against it.
    ///
    /// A status mismatch does not stop evaluation, so body checks (and any
    /// nested plays they issue) still run; a location mismatch does. Only the
    /// first failure found is recorded for the play.
    pub(crate) async fn verify(
        &self,
        session: &Session,
        method: &Method,
        requested_path: &str,
        res: Response,
    ) -> Result<Url, Failure> {
        let final_url = res.url().clone();
        let status = res.status();
        let path = final_url.path().to_string();

        let body = match res.text().await {
            Ok(body) => body,
            Err(err) => return Err(session.transport_failure(method, requested_path, &err)),
        };

        let mut failure = None;

        if status != self.status {
            failure = Some(format!(
                "response code should be {}, got {}",
                self.status.as_u16(),
                status.as_u16()
            ));
        }

        if let Some(location) = &self.location {
            if !location.matches(&path) {
                let message = format!(
                    "redirect location is incorrect: expected '{location}', got '{path}'"
                );
                let message = failure.unwrap_or(message);
                return Err(session.fail(FailureKind::Assertion, method, &path, message));
            }
        }

        if let Some(check) = &self.check {
            if let Err(err) = check(session.clone(), body).await {
                match &failure {
                    None => failure = Some(err.to_string()),
                    Some(first) => debug!("{method} {path}: {err} (already failed: {first})"),
                }
            }
        }

        match failure {
            Some(message) => Err(session.fail(FailureKind::Assertion, method, &path, message)),
            None => Ok(final_url),
        }
    }
}

/// A plain scripted request: form-encoded on POST.
#[derive(Clone)]
pub struct Action {
    method: Method,
    path: String,
    form: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    expect: Expectations,
    description: Option<String>,
}

impl Action {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            form: vec![],
            headers: vec![],
            expect: Expectations::default(),
            description: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn expect_status(mut self, status: StatusCode) -> Self {
        self.expect.status = status;
        self
    }

    /// The final path after redirects must equal `path`.
    pub fn expect_location(mut self, path: impl Into<String>) -> Self {
        self.expect.location = Some(Location::Exact(path.into()));
        self
    }

    /// The final path after redirects must match `pattern`.
    pub fn expect_location_pattern(mut self, pattern: Regex) -> Self {
        self.expect.location = Some(Location::Pattern(pattern));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Installs a body validator.
    ///
    /// ```ignore
    /// Action::get("/").check(|session, body| async move {
    ///     anyhow::ensure!(body.contains("isu-post"), "no posts shown");
    ///     Ok(())
    /// });
    /// ```
    pub fn check<F, Fut>(mut self, check: F) -> Self
    where
        F: Fn(Session, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.expect.check = Some(Arc::new(move |session, body| {
            Box::pin(check(session, body)) as CheckFuture
        }));
        self
    }

    /// A copy of this template carrying `form` as the request body.
    pub fn with_form<K, V>(&self, form: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut action = self.clone();
        action.form = form
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        action
    }

    /// A copy of this template aimed at `path`.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        let mut action = self.clone();
        action.path = path.into();
        action
    }

    fn is_state_changing(&self) -> bool {
        self.method == Method::POST
    }

    /// Plays the action once and scores the outcome.
    ///
    /// Returns the final URL (after redirects) on success.
    #[instrument(name = "play", skip_all, fields(method = %self.method, path = %self.path))]
    pub async fn play(&self, session: &Session) -> Result<Url, Failure> {
        let mut request = match session.request(self.method.clone(), &self.path) {
            Ok(request) => request,
            Err(err) => {
                error!("{err}");
                return Err(session.fail(
                    FailureKind::Exception,
                    &self.method,
                    &self.path,
                    "failed to build request",
                ));
            }
        };

        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if self.is_state_changing() {
            request = request.form(&self.form);
        } else if !self.form.is_empty() {
            request = request.query(&self.form);
        }

        let res = match session.send(request).await {
            Ok(res) => res,
            Err(err) => return Err(session.transport_failure(&self.method, &self.path, &err)),
        };

        let url = self
            .expect
            .verify(session, &self.method, &self.path, res)
            .await?;

        let scores = *session.context().scores();
        session.success(scores.success_get);
        if self.is_state_changing() {
            session.bonus(scores.bonus_post);
        }

        Ok(url)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("status", &self.expect.status)
            .field("location", &self.expect.location)
            .field("check", &self.expect.check.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::BenchContext;
    use axum::{
        extract::Form,
        http::HeaderMap,
        response::{IntoResponse, Redirect},
        routing::get,
        Router,
    };
    use isubench_core::{BenchConfig, TargetHost};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::Duration;

    pub(crate) async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    pub(crate) fn session_with(addr: SocketAddr, timeout: Duration) -> Session {
        let mut config = BenchConfig::new(TargetHost::parse(&addr.to_string()).unwrap());
        config.request_timeout = timeout;
        Session::new(BenchContext::new(config).shared()).unwrap()
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "<p class=\"hello\">hello</p>" }))
            .route(
                "/login",
                get(|| async { "login form" }).post(|Form(form): Form<HashMap<String, String>>| async move {
                    if form.get("password").map(String::as_str) == Some("pw") {
                        ([("set-cookie", "session=ok; Path=/")], Redirect::to("/")).into_response()
                    } else {
                        Redirect::to("/login").into_response()
                    }
                }),
            )
            .route("/me", get(|headers: HeaderMap| async move {
                headers
                    .get("cookie")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }))
            .route("/missing", get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn get_success_scores_one_point() {
        let addr = serve(app()).await;
        let session = session_with(addr, Duration::from_secs(5));

        let url = Action::get("/").expect_location("/").play(&session).await.unwrap();
        assert_eq!(url.path(), "/");

        let snap = session.context().score().snapshot();
        assert_eq!((snap.score, snap.successes, snap.fails), (1, 1, 0));
    }

    #[tokio::test]
    async fn login_earns_post_bonus_and_keeps_cookie() {
        let addr = serve(app()).await;
        let session = session_with(addr, Duration::from_secs(5));

        let login = Action::post("/login").expect_location("/");
        login
            .with_form([("account_name", "a"), ("password", "pw")])
            .play(&session)
            .await
            .unwrap();

        let snap = session.context().score().snapshot();
        assert_eq!((snap.score, snap.successes, snap.fails), (3, 1, 0));

        let cookie = Action::get("/me").check(|_, body| async move {
            anyhow::ensure!(body == "session=ok", "cookie not sent: {body}");
            Ok(())
        });
        cookie.play(&session).await.unwrap();
    }

    #[tokio::test]
    async fn location_mismatch_fails_even_with_matching_status() {
        let addr = serve(app()).await;
        let session = session_with(addr, Duration::from_secs(5));

        let failure = Action::post("/login")
            .expect_location("/")
            .with_form([("password", "wrong")])
            .play(&session)
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Assertion);
        assert_eq!(
            failure.to_string(),
            "redirect location is incorrect: expected '/', got '/login' (POST /login)"
        );
        let snap = session.context().score().snapshot();
        assert_eq!((snap.score, snap.successes, snap.fails), (-10, 0, 1));
    }

    #[tokio::test]
    async fn status_mismatch_still_runs_check_but_fails_once() {
        let addr = serve(app()).await;
        let session = session_with(addr, Duration::from_secs(5));

        let nested = Action::get("/");
        let failure = Action::get("/missing")
            .check(move |session, _| {
                let nested = nested.clone();
                async move {
                    nested.play(&session).await?;
                    anyhow::bail!("body is wrong too")
                }
            })
            .play(&session)
            .await
            .unwrap_err();

        assert_eq!(failure.message(), "response code should be 200, got 404");
        // The nested play scored on its own, the parent failed exactly once.
        let snap = session.context().score().snapshot();
        assert_eq!((snap.successes, snap.fails), (1, 1));
        assert_eq!(snap.score, 1 - 10);
    }

    #[tokio::test]
    async fn check_error_overrides_success() {
        let addr = serve(app()).await;
        let session = session_with(addr, Duration::from_secs(5));

        let failure = Action::get("/")
            .check(|_, body| async move {
                anyhow::ensure!(body.contains("isu-post"), "posts are not shown");
                Ok(())
            })
            .play(&session)
            .await
            .unwrap_err();

        assert_eq!(failure.to_string(), "posts are not shown (GET /)");
    }

    #[tokio::test]
    async fn expected_404_is_success() {
        let addr = serve(app()).await;
        let session = session_with(addr, Duration::from_secs(5));

        Action::get("/missing")
            .expect_status(StatusCode::NOT_FOUND)
            .play(&session)
            .await
            .unwrap();
        assert_eq!(session.context().score().successes(), 1);
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn timeout_is_an_exceptional_failure() {
        let addr = serve(app()).await;
        let session = session_with(addr, Duration::from_millis(200));

        let failure = Action::get("/slow").play(&session).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Exception);
        assert_eq!(failure.to_string(), "request timed out (GET /slow)");
        assert_eq!(session.context().score().score(), -20);
    }

    #[tokio::test]
    async fn connection_refused_is_an_exceptional_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let session = session_with(addr, Duration::from_secs(2));
        let failure = Action::get("/").play(&session).await.unwrap_err();
        assert_eq!(failure.to_string(), "request failed (GET /)");
        let snap = session.context().score().snapshot();
        assert_eq!((snap.successes, snap.fails), (0, 1));
    }
}
