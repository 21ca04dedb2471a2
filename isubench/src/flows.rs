//! The named user journeys played against the target.
use crate::action::{Action, AssetAction, UploadAction};
use crate::error::{Failure, FailureKind};
use crate::fixtures::{random_alphanumeric, Asset, User, Userdata};
use crate::orchestrator::Flow;
use crate::session::Session;
use anyhow::Context;
use isubench_core::FailRecord;
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::datetime;
use time::OffsetDateTime;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

pub mod html;

const TOPPAGE_IMAGES: usize = 16;
const BAN_CHECK_POSTS: usize = 20;
const POSTS_PER_PAGE: usize = 20;
const POSTS_PAGES: i64 = 10;
const RANDOM_ACCOUNT_LEN: usize = 25;
const BAN_PAUSE: Duration = Duration::from_secs(10);

/// Newest `max_created_at` the "more posts" walk starts from.
const POSTS_EPOCH: OffsetDateTime = datetime!(2016-01-02 11:46:21 +09:00);

const STATIC_ASSETS: [&str; 3] = [
    "js/jquery-2.2.0.js",
    "/js/main.js",
    "/css/style.css",
];

lazy_static! {
    static ref POST_PATH: Regex = Regex::new(r"^/posts/[0-9]+$").unwrap();
}

/// Every flow with its default worker and session counts.
pub fn all(data: Arc<Userdata>) -> Vec<Flow> {
    vec![
        toppage_not_login(),
        static_files(),
        userpage_not_login(data.clone()),
        post_data(data.clone()),
        ban_user(data),
        posts_more_and_more(),
    ]
}

/// Splits the leased Sessions into the `N` a flow needs.
///
/// A mismatch is scored as an exception on the first Session, when there is
/// one, and ends the iteration.
fn take<const N: usize>(sessions: Vec<Session>) -> Result<[Session; N], Failure> {
    sessions.try_into().map_err(|sessions: Vec<Session>| {
        let message = format!("flow needs {N} sessions, got {}", sessions.len());
        error!("{message}");
        match sessions.first() {
            Some(session) => session.fail(FailureKind::Exception, &Method::GET, "/", message),
            None => Failure {
                kind: FailureKind::Exception,
                record: FailRecord::new(Method::GET.as_str(), "/", message),
            },
        }
    })
}

/// Anonymous top page plus its images, then the top page again on the same
/// Session, which must still look anonymous.
pub fn toppage_not_login() -> Flow {
    let index_and_images = Action::get("/")
        .expect_location("/")
        .describe("anonymous top page and its images")
        .check(|session, body| async move {
            for src in html::img_srcs(&body).into_iter().take(TOPPAGE_IMAGES) {
                let _ = AssetAction::new(src).play(&session).await;
            }
            Ok(())
        });

    let index = Action::get("/")
        .expect_location("/")
        .describe("anonymous top page is not logged in")
        .check(|_, body| async move {
            let names = html::class_texts(&body, "isu-account-name");
            anyhow::ensure!(
                names.iter().all(String::is_empty),
                "anonymous user appears logged in"
            );
            Ok(())
        });

    Flow::new("toppage_not_login", move |sessions| {
        let index_and_images = index_and_images.clone();
        let index = index.clone();
        async move {
            let [session] = take(sessions)?;
            index_and_images.play(&session).await?;
            index.play(&session).await?;
            Ok(())
        }
    })
}

/// Static assets must be served correctly. The precomposed touch icon
/// must not exist.
pub fn static_files() -> Flow {
    let favicon = AssetAction::new("/favicon.ico");
    let apple_touch_icon = Action::get("/apple-touch-icon-precomposed.png")
        .expect_status(StatusCode::NOT_FOUND)
        .describe("apple-touch-icon-precomposed.png should not exist");
    let assets: Vec<AssetAction> = STATIC_ASSETS.iter().map(|p| AssetAction::new(*p)).collect();

    Flow::new("static_files", move |sessions| {
        let favicon = favicon.clone();
        let apple_touch_icon = apple_touch_icon.clone();
        let assets = assets.clone();
        async move {
            let [session] = take(sessions)?;
            favicon.play(&session).await?;
            apple_touch_icon.play(&session).await?;
            for asset in &assets {
                asset.play(&session).await?;
            }
            Ok(())
        }
    })
}

/// A random user's page, anonymously, with every post image.
pub fn userpage_not_login(data: Arc<Userdata>) -> Flow {
    let userpage = Action::get("/")
        .describe("anonymous user page and its images")
        .check(|session, body| async move {
            for src in html::class_img_srcs(&body, "isu-post-image") {
                let _ = AssetAction::new(src).play(&session).await;
            }
            Ok(())
        });

    Flow::new("userpage_not_login", move |sessions| {
        let account_name = data.random_user().account_name.clone();
        let userpage = userpage.with_path(format!("/@{account_name}"));
        async move {
            let [session] = take(sessions)?;
            userpage.play(&session).await?;
            Ok(())
        }
    })
}

fn login() -> Action {
    Action::post("/login").expect_location("/").describe("login")
}

fn register() -> Action {
    Action::post("/register").expect_location("/").describe("register")
}

/// Log in as a random user, post an image, check it, comment on it.
pub fn post_data(data: Arc<Userdata>) -> Flow {
    let login = login();

    Flow::new("post_data", move |sessions| {
        let user = data.random_user().clone();
        let job = PostJob::random(&data, &user.account_name);
        let login = login.with_form(user.login_form());
        async move {
            let [session] = take(sessions)?;
            login.play(&session).await?;
            job.action().play(&session).await?;
            Ok(())
        }
    })
}

/// Register a throwaway account and post with it, then ban it as an admin
/// on a second Session and check its posts are gone from the top page.
pub fn ban_user(data: Arc<Userdata>) -> Flow {
    let login = login();
    let register = register();

    Flow::new("ban_user", move |sessions| {
        let name = random_alphanumeric(RANDOM_ACCOUNT_LEN);
        let victim = User::new(name.clone(), name.clone());
        let admin = data.random_admin().clone();
        let job = PostJob::random(&data, &name);
        let register = register.with_form(victim.login_form());
        let login_victim = login.with_form(victim.login_form());
        let login_admin = login.with_form(admin.login_form());

        async move {
            let [poster, moderator] = take(sessions)?;

            register.play(&poster).await?;
            login_victim.play(&poster).await?;
            job.action().play(&poster).await?;

            login_admin.play(&moderator).await?;
            ban_page(name.clone()).play(&moderator).await?;
            banned_posts_hidden(name).play(&moderator).await?;
            Ok(())
        }
    })
    .sessions(2)
    .pause(BAN_PAUSE)
}

/// Follows "more posts" for several pages, fetching every image.
pub fn posts_more_and_more() -> Flow {
    let posts = Action::get("/posts")
        .describe("follow more posts")
        .check(|session, body| async move {
            let srcs = html::img_srcs(&body);
            for src in &srcs {
                let _ = Action::get(src.as_str()).play(&session).await;
            }
            anyhow::ensure!(
                srcs.len() >= POSTS_PER_PAGE,
                "not enough images on a page"
            );
            Ok(())
        });

    Flow::new("posts_more_and_more", move |sessions| {
        let posts = posts.clone();
        let offset = rand::thread_rng().gen_range(0..10);
        async move {
            let [session] = take(sessions)?;
            for page in 0..POSTS_PAGES {
                let max_created_at = posts_page_cursor(page, offset);
                let stamp = max_created_at.format(&Rfc3339).map_err(|err| {
                    error!("{err}");
                    session.fail(
                        FailureKind::Exception,
                        &Method::GET,
                        "/posts",
                        "failed to build request",
                    )
                })?;
                posts
                    .with_form([("max_created_at", stamp)])
                    .play(&session)
                    .await?;
            }
            Ok(())
        }
    })
    .workers(2)
}

fn posts_page_cursor(page: i64, offset: i64) -> OffsetDateTime {
    POSTS_EPOCH - time::Duration::seconds(POSTS_PER_PAGE as i64 * page)
        + time::Duration::seconds(offset)
}

/// Everything one "post an image, then comment on it" run needs.
#[derive(Clone, Debug)]
struct PostJob {
    account_name: String,
    image: Asset,
    text: String,
    comment: String,
}

impl PostJob {
    fn random(data: &Userdata, account_name: &str) -> Self {
        Self {
            account_name: account_name.to_string(),
            image: data.random_image().clone(),
            text: data.random_text(),
            comment: data.random_text(),
        }
    }

    /// `GET /` whose check posts the image with the page's token and
    /// follows up on the new post.
    fn action(self) -> Action {
        let job = Arc::new(self);
        Action::get("/")
            .describe("post an image from the top page")
            .check(move |session, body| post_from_index(session, body, job.clone()))
    }
}

async fn post_from_index(session: Session, body: String, job: Arc<PostJob>) -> anyhow::Result<()> {
    let token = html::csrf_token(&body).context("csrf token is missing")?;

    let upload = UploadAction::new("/", "file")
        .expect_location_pattern(POST_PATH.clone())
        .with_upload(
            &job.image,
            [
                ("body", job.text.clone()),
                ("csrf_token", token.clone()),
                ("type", job.image.mime_type.clone()),
            ],
        );

    // Nested plays score themselves. Stop quietly once one fails.
    let Ok(url) = upload.play(&session).await else {
        return Ok(());
    };
    let post_path = url.path().to_string();
    let Some(post_id) = html::post_id(&post_path).map(str::to_string) else {
        return Ok(());
    };

    let hash = job.image.hash.clone();
    let post_page = Action::get(post_path.clone()).check(move |session, body| {
        let hash = hash.clone();
        async move {
            if let Some(src) = html::img_srcs(&body).into_iter().next() {
                let _ = AssetAction::new(src).with_hash(hash).play(&session).await;
            }
            Ok(())
        }
    });
    if post_page.play(&session).await.is_err() {
        return Ok(());
    }

    let shown = job.clone();
    let _ = Action::post("/comment")
        .expect_location(post_path)
        .check(move |_, body| {
            let job = shown.clone();
            async move { comment_shown(&body, &job.account_name, &job.comment) }
        })
        .with_form([
            ("post_id", post_id),
            ("comment", job.comment.clone()),
            ("csrf_token", token),
        ])
        .play(&session)
        .await;

    Ok(())
}

fn comment_shown(body: &str, account_name: &str, comment: &str) -> anyhow::Result<()> {
    let names = html::class_texts(body, "isu-comment-account-name");
    let texts = html::class_texts(body, "isu-comment-text");
    let comment = comment.trim();

    anyhow::ensure!(
        names
            .iter()
            .zip(texts.iter())
            .any(|(name, text)| name == account_name && text == comment),
        "posted comment is not shown"
    );
    Ok(())
}

/// Admin page: find the account's uid and ban it.
fn ban_page(account_name: String) -> Action {
    let account_name = Arc::new(account_name);
    Action::get("/admin/banned")
        .expect_location("/admin/banned")
        .describe("ban a user")
        .check(move |session, body| {
            let account_name = account_name.clone();
            async move {
                let token = html::csrf_token(&body).context("csrf token is missing")?;
                let uid = html::input_value(&body, "data-account-name", &account_name)
                    .context("user to ban is not listed")?;

                let _ = Action::post("/admin/banned")
                    .expect_location("/admin/banned")
                    .with_form([("uid[]", uid), ("csrf_token", token)])
                    .play(&session)
                    .await;
                Ok(())
            }
        })
}

fn banned_posts_hidden(account_name: String) -> Action {
    let account_name = Arc::new(account_name);
    Action::get("/")
        .describe("banned user's posts are hidden")
        .check(move |_, body| {
            let account_name = account_name.clone();
            async move {
                let shown = html::class_texts(&body, "isu-post-account-name")
                    .into_iter()
                    .take(BAN_CHECK_POSTS)
                    .any(|name| name == *account_name);
                anyhow::ensure!(!shown, "posts by a banned user are shown");
                Ok(())
            }
        })
}
