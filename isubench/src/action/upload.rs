use super::{Expectations, Location};
use crate::error::{Failure, FailureKind};
use crate::fixtures::Asset;
use crate::session::Session;
use regex::Regex;
use reqwest::{Method, StatusCode};
use url::Url;
use tracing::{error, instrument};

/// A `multipart/form-data` POST carrying one file field.
#[derive(Clone)]
pub struct UploadAction {
    path: String,
    param_name: String,
    fields: Vec<(String, String)>,
    asset: Option<Asset>,
    expect: Expectations,
}

impl UploadAction {
    pub fn new(path: impl Into<String>, param_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            param_name: param_name.into(),
            fields: vec![],
            asset: None,
            expect: Expectations::default(),
        }
    }

    pub fn expect_status(mut self, status: StatusCode) -> Self {
        self.expect.status = status;
        self
    }

    pub fn expect_location_pattern(mut self, pattern: Regex) -> Self {
        self.expect.location = Some(Location::Pattern(pattern));
        self
    }

    /// A copy of this template carrying `asset` and the text `fields`.
    pub fn with_upload<K, V>(
        &self,
        asset: &Asset,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut action = self.clone();
        action.asset = Some(asset.clone());
        action.fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        action
    }

    /// Plays the upload once and scores it. A successful upload earns the
    /// upload bonus on top of the success point.
    #[instrument(name = "upload", skip_all, fields(path = %self.path))]
    pub async fn play(&self, session: &Session) -> Result<Url, Failure> {
        let method = Method::POST;

        let form = match &self.asset {
            Some(asset) => session.upload_form(&self.fields, &self.param_name, asset).await,
            None => Ok(reqwest::multipart::Form::new()),
        };
        let request = form.and_then(|form| {
            session
                .request(method.clone(), &self.path)
                .map(|request| request.multipart(form))
        });

        let request = match request {
            Ok(request) => request,
            Err(err) => {
                error!("{err}");
                return Err(session.fail(
                    FailureKind::Exception,
                    &method,
                    &self.path,
                    "failed to build request",
                ));
            }
        };

        let res = match session.send(request).await {
            Ok(res) => res,
            Err(err) => return Err(session.transport_failure(&method, &self.path, &err)),
        };

        let url = self.expect.verify(session, &method, &self.path, res).await?;

        let scores = *session.context().scores();
        session.success(scores.success_get);
        session.bonus(scores.bonus_upload);

        Ok(url)
    }
}

impl std::fmt::Debug for UploadAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadAction")
            .field("path", &self.path)
            .field("param_name", &self.param_name)
            .field("asset", &self.asset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::tests::{serve, session_with};
    use axum::{extract::Multipart, response::Redirect, routing::post, Router};
    use std::time::Duration;

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                post(|mut multipart: Multipart| async move {
                    let mut summary = vec![];
                    while let Ok(Some(field)) = multipart.next_field().await {
                        let name = field.name().unwrap_or_default().to_string();
                        let mime = field.content_type().unwrap_or_default().to_string();
                        let len = field.bytes().await.map(|b| b.len()).unwrap_or_default();
                        summary.push(format!("{name}:{mime}:{len}"));
                    }
                    if summary.iter().any(|s| s == "file:image/png:4") {
                        Redirect::to("/posts/42")
                    } else {
                        Redirect::to("/")
                    }
                })
                .get(|| async { "index" }),
            )
            .route(
                "/posts/:id",
                axum::routing::get(|| async { "post" }),
            )
    }

    #[tokio::test]
    async fn upload_sends_declared_mime_and_earns_bonus() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00001.png");
        std::fs::write(&path, b"fake").unwrap();
        let asset = Asset::new(&path, "unused", "image/png");

        let addr = serve(app()).await;
        let session = session_with(addr, Duration::from_secs(5));

        let upload = UploadAction::new("/", "file")
            .expect_location_pattern(Regex::new(r"^/posts/\d+$").unwrap());
        let url = upload
            .with_upload(&asset, [("body", "hello"), ("csrf_token", "t")])
            .play(&session)
            .await
            .unwrap();
        assert_eq!(url.path(), "/posts/42");

        let snap = session.context().score().snapshot();
        assert_eq!((snap.score, snap.successes, snap.fails), (6, 1, 0));
    }

    #[tokio::test]
    async fn unreadable_fixture_is_an_exceptional_failure() {
        let addr = serve(app()).await;
        let session = session_with(addr, Duration::from_secs(5));

        let asset = Asset::new("/not/a/real/file.png", "unused", "image/png");
        let failure = UploadAction::new("/", "file")
            .with_upload(&asset, Vec::<(String, String)>::new())
            .play(&session)
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Exception);
        assert_eq!(session.context().score().score(), -20);
    }
}
