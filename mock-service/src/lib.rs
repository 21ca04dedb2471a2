//! A small in-memory imitation of the photo sharing app the checker plays
//! against. Only the HTTP surface the flows touch is implemented.
use axum::{
    debug_handler,
    extract::{DefaultBodyLimit, Form, Multipart, Path, Query, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, COOKIE, ETAG, IF_NONE_MATCH, SET_COOKIE},
        HeaderMap, StatusCode,
    },
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use metrics::counter;
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::format_description::well_known::Rfc3339;
use time::macros::datetime;
use time::{Duration as TimeDuration, OffsetDateTime};
use tower_http::trace::TraceLayer;
use tracing::debug;

const SESSION_COOKIE: &str = "isu_session";
const POSTS_PER_PAGE: usize = 20;
const UPLOAD_LIMIT: usize = 10 * 1024 * 1024;
const SEED_EPOCH: OffsetDateTime = datetime!(2016-01-01 00:00:00 +09:00);

pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=86400";

#[derive(Clone, Debug)]
pub struct SeedUser {
    pub account_name: String,
    pub password: String,
    pub admin: bool,
}

/// Initial contents, restored by `GET /initialize`.
#[derive(Clone, Debug, Default)]
pub struct Seed {
    pub users: Vec<SeedUser>,
    /// Posts spread over the seeded users, all older than the posts walk start.
    pub posts: usize,
}

impl Seed {
    /// Users named `names` with the name repeated twice as password. The
    /// first `admins` of them are administrators.
    pub fn from_names<S: AsRef<str>>(names: &[S], admins: usize, posts: usize) -> Self {
        let users = names
            .iter()
            .enumerate()
            .map(|(i, name)| SeedUser {
                account_name: name.as_ref().to_string(),
                password: name.as_ref().repeat(2),
                admin: i < admins,
            })
            .collect();
        Self { users, posts }
    }
}

#[derive(Clone, Debug)]
struct UserRow {
    id: u64,
    account_name: String,
    password: String,
    admin: bool,
    banned: bool,
}

#[derive(Clone, Debug)]
struct PostRow {
    id: u64,
    user_id: u64,
    mime: String,
    data: Vec<u8>,
    body: String,
    created_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
struct CommentRow {
    post_id: u64,
    user_id: u64,
    comment: String,
}

#[derive(Debug, Default)]
struct Db {
    users: Vec<UserRow>,
    posts: Vec<PostRow>,
    comments: Vec<CommentRow>,
    sessions: HashMap<String, u64>,
}

impl Db {
    fn seeded(seed: &Seed) -> Self {
        let users: Vec<UserRow> = seed
            .users
            .iter()
            .enumerate()
            .map(|(i, u)| UserRow {
                id: i as u64 + 1,
                account_name: u.account_name.clone(),
                password: u.password.clone(),
                admin: u.admin,
                banned: false,
            })
            .collect();

        let posts = if users.is_empty() {
            vec![]
        } else {
            (0..seed.posts)
                .map(|i| PostRow {
                    id: i as u64 + 1,
                    user_id: users[i % users.len()].id,
                    mime: "image/jpeg".to_string(),
                    data: format!("seed-image-{i}").into_bytes(),
                    body: format!("seed post {i}"),
                    created_at: SEED_EPOCH - TimeDuration::minutes(i as i64),
                })
                .collect()
        };

        Self {
            users,
            posts,
            ..Default::default()
        }
    }

    fn user(&self, id: u64) -> Option<&UserRow> {
        self.users.iter().find(|u| u.id == id)
    }

    fn user_by_name(&self, name: &str) -> Option<&UserRow> {
        self.users.iter().find(|u| u.account_name == name)
    }

    /// Newest first, hiding banned users.
    fn visible_posts(&self, filter: impl Fn(&PostRow) -> bool) -> Vec<&PostRow> {
        let mut posts: Vec<&PostRow> = self
            .posts
            .iter()
            .filter(|p| self.user(p.user_id).is_some_and(|u| !u.banned))
            .filter(|p| filter(*p))
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        posts.truncate(POSTS_PER_PAGE);
        posts
    }
}

/// Request counters, for assertions in tests.
#[derive(Debug, Default)]
pub struct Stats {
    pub requests: AtomicU64,
    pub not_modified: AtomicU64,
    pub initialized: AtomicU64,
}

#[derive(Debug)]
pub struct AppState {
    seed: Seed,
    db: RwLock<Db>,
    cache_control: String,
    pub stats: Stats,
}

impl AppState {
    pub fn new(seed: Seed) -> Self {
        Self {
            db: RwLock::new(Db::seeded(&seed)),
            seed,
            cache_control: DEFAULT_CACHE_CONTROL.to_string(),
            stats: Stats::default(),
        }
    }

    /// `Cache-Control` sent with static files and post images.
    pub fn with_cache_control(mut self, directive: impl Into<String>) -> Self {
        self.cache_control = directive.into();
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn post_count(&self) -> usize {
        self.read().posts.len()
    }

    pub fn comment_count(&self) -> usize {
        self.read().comments.len()
    }

    pub fn is_banned(&self, account_name: &str) -> bool {
        self.read()
            .user_by_name(account_name)
            .is_some_and(|u| u.banned)
    }

    fn read(&self) -> RwLockReadGuard<'_, Db> {
        self.db.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Db> {
        self.db.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn me(&self, headers: &HeaderMap) -> Option<(String, UserRow)> {
        let token = session_token(headers)?;
        let db = self.read();
        let user = db.sessions.get(&token).and_then(|id| db.user(*id))?;
        if user.banned {
            return None;
        }
        Some((token, user.clone()))
    }
}

type Shared = State<Arc<AppState>>;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/initialize", get(initialize))
        .route("/login", get(login_page).post(login))
        .route("/register", get(register_page).post(register))
        .route("/logout", get(logout))
        .route("/", get(index).post(upload))
        .route("/posts", get(posts))
        .route("/posts/:id", get(post_page))
        .route("/image/:file", get(image))
        .route("/comment", post(comment))
        .route("/admin/banned", get(banned_page).post(ban))
        .route("/favicon.ico", get(static_file))
        .route("/js/:file", get(static_file))
        .route("/css/:file", get(static_file))
        .route("/img/:file", get(static_file))
        .route("/:page", get(user_page))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves on `addr` until the task is dropped.
pub async fn run(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await
}

/// Serves on an ephemeral localhost port in the background.
pub async fn spawn(state: Arc<AppState>) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app(state)).await {
            tracing::error!("Mock service stopped: {err}");
        }
    });
    Ok(addr)
}

fn hit(state: &AppState) {
    counter!("mock_service.requests").increment(1);
    state.stats.requests.fetch_add(1, Ordering::Relaxed);
}

#[debug_handler(state = Arc<AppState>)]
async fn initialize(State(state): Shared) -> &'static str {
    hit(&state);
    *state.write() = Db::seeded(&state.seed);
    state.stats.initialized.fetch_add(1, Ordering::Relaxed);
    "ok"
}

#[derive(serde::Deserialize)]
struct Credentials {
    account_name: String,
    password: String,
}

async fn login_page(State(state): Shared, headers: HeaderMap) -> Html<String> {
    hit(&state);
    let me = state.me(&headers).map(|(_, u)| u);
    layout(
        me.as_ref(),
        r#"<form method="post" action="/login"><input type="text" name="account_name"><input type="password" name="password"><input type="submit" name="submit" value="submit"></form>"#,
    )
}

async fn login(State(state): Shared, Form(creds): Form<Credentials>) -> Response {
    hit(&state);
    let user = state
        .read()
        .user_by_name(&creds.account_name)
        .filter(|u| !u.banned && u.password == creds.password)
        .map(|u| u.id);

    match user {
        Some(id) => start_session(&state, id),
        None => Redirect::to("/login").into_response(),
    }
}

async fn register_page(State(state): Shared) -> Html<String> {
    hit(&state);
    layout(
        None,
        r#"<form method="post" action="/register"><input type="text" name="account_name"><input type="password" name="password"><input type="submit" name="submit" value="submit"></form>"#,
    )
}

async fn register(State(state): Shared, Form(creds): Form<Credentials>) -> Response {
    hit(&state);
    let valid_name = creds.account_name.len() >= 3
        && creds
            .account_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_name || creds.password.len() < 6 {
        return Redirect::to("/register").into_response();
    }

    let id = {
        let mut db = state.write();
        if db.user_by_name(&creds.account_name).is_some() {
            return Redirect::to("/register").into_response();
        }
        let id = db.users.len() as u64 + 1;
        db.users.push(UserRow {
            id,
            account_name: creds.account_name,
            password: creds.password,
            admin: false,
            banned: false,
        });
        id
    };

    start_session(&state, id)
}

async fn logout(State(state): Shared, headers: HeaderMap) -> Redirect {
    hit(&state);
    if let Some(token) = session_token(&headers) {
        state.write().sessions.remove(&token);
    }
    Redirect::to("/")
}

fn start_session(state: &AppState, user_id: u64) -> Response {
    let token: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    state.write().sessions.insert(token.clone(), user_id);
    (
        [(SET_COOKIE, format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly"))],
        Redirect::to("/"),
    )
        .into_response()
}

async fn index(State(state): Shared, headers: HeaderMap) -> Html<String> {
    hit(&state);
    let me = state.me(&headers);
    let token = me.as_ref().map(|(t, _)| t.as_str()).unwrap_or_default();

    let db = state.read();
    let posts = render_posts(&db, &db.visible_posts(|_| true), token);
    let content = format!(
        r#"<div class="isu-submit">
  <form method="post" action="/" enctype="multipart/form-data">
    <div class="isu-form"><input type="file" name="file" value="file"></div>
    <div class="isu-form"><textarea name="body"></textarea></div>
    <div class="form-submit">
      <input type="hidden" name="csrf_token" value="{token}">
      <input type="submit" name="submit" value="submit">
    </div>
  </form>
</div>
<div class="isu-posts">{posts}</div>
<div id="isu-post-more">
  <button id="isu-post-more-btn">more</button>
  <img class="isu-loading-icon" src="/img/ajax-loader.gif">
</div>"#,
        token = escape(token)
    );
    layout(me.as_ref().map(|(_, u)| u), &content)
}

#[derive(serde::Deserialize)]
struct PostsQuery {
    max_created_at: Option<String>,
}

async fn posts(State(state): Shared, Query(query): Query<PostsQuery>) -> Response {
    hit(&state);
    let max = match query.max_created_at.as_deref() {
        Some(raw) => match OffsetDateTime::parse(raw, &Rfc3339) {
            Ok(max) => Some(max),
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        },
        None => None,
    };

    let db = state.read();
    let posts = db.visible_posts(move |p| max.map_or(true, |max| p.created_at <= max));
    if posts.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    Html(render_posts(&db, &posts, "")).into_response()
}

async fn post_page(
    State(state): Shared,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    hit(&state);
    let me = state.me(&headers);
    let token = me.as_ref().map(|(t, _)| t.as_str()).unwrap_or_default();

    let db = state.read();
    let posts = db.visible_posts(|p| p.id == id);
    if posts.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let content = render_posts(&db, &posts, token);
    layout(me.as_ref().map(|(_, u)| u), &content).into_response()
}

async fn user_page(State(state): Shared, Path(page): Path<String>) -> Response {
    hit(&state);
    let Some(name) = page.strip_prefix('@') else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let db = state.read();
    let Some(user) = db.user_by_name(name).filter(|u| !u.banned) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let user_id = user.id;
    let posts = db.visible_posts(|p| p.user_id == user_id);
    let content = format!(
        r#"<div class="isu-user"><div class="isu-user-name">{}</div></div><div class="isu-posts">{}</div>"#,
        escape(name),
        render_posts(&db, &posts, "")
    );
    layout(None, &content).into_response()
}

async fn upload(State(state): Shared, headers: HeaderMap, mut multipart: Multipart) -> Response {
    hit(&state);
    let Some((token, me)) = state.me(&headers) else {
        return Redirect::to("/login").into_response();
    };

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut body = String::new();
    let mut csrf = String::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                debug!("Bad multipart body: {err}");
                return Redirect::to("/").into_response();
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let mime = field.content_type().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(data) => file = Some((mime, data.to_vec())),
                    Err(_) => return Redirect::to("/").into_response(),
                }
            }
            "body" => body = field.text().await.unwrap_or_default(),
            "csrf_token" => csrf = field.text().await.unwrap_or_default(),
            _ => {}
        }
    }

    if csrf != token {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }
    let Some((mime, data)) = file.filter(|(mime, data)| !data.is_empty() && ext_for(mime).is_some())
    else {
        return Redirect::to("/").into_response();
    };

    let id = {
        let mut db = state.write();
        let id = db.posts.iter().map(|p| p.id).max().unwrap_or_default() + 1;
        db.posts.push(PostRow {
            id,
            user_id: me.id,
            mime,
            data,
            body,
            created_at: OffsetDateTime::now_utc(),
        });
        id
    };

    Redirect::to(&format!("/posts/{id}")).into_response()
}

#[derive(serde::Deserialize)]
struct CommentForm {
    post_id: u64,
    comment: String,
    csrf_token: String,
}

async fn comment(State(state): Shared, headers: HeaderMap, Form(form): Form<CommentForm>) -> Response {
    hit(&state);
    let Some((token, me)) = state.me(&headers) else {
        return Redirect::to("/login").into_response();
    };
    if form.csrf_token != token {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    state.write().comments.push(CommentRow {
        post_id: form.post_id,
        user_id: me.id,
        comment: form.comment,
    });
    Redirect::to(&format!("/posts/{}", form.post_id)).into_response()
}

async fn banned_page(State(state): Shared, headers: HeaderMap) -> Response {
    hit(&state);
    let Some((token, me)) = state.me(&headers) else {
        return Redirect::to("/").into_response();
    };
    if !me.admin {
        return StatusCode::FORBIDDEN.into_response();
    }

    let db = state.read();
    let rows: String = db
        .users
        .iter()
        .filter(|u| !u.admin && !u.banned)
        .map(|u| {
            format!(
                r#"<div><input type="checkbox" name="uid[]" id="uid_{id}" value="{id}" data-account-name="{name}"> <label for="uid_{id}">{name}</label></div>"#,
                id = u.id,
                name = escape(&u.account_name)
            )
        })
        .collect();
    let content = format!(
        r#"<div><form method="post" action="/admin/banned">{rows}<div class="form-submit"><input type="hidden" name="csrf_token" value="{token}"><input type="submit" name="submit" value="submit"></div></form></div>"#,
        token = escape(&token)
    );
    layout(Some(&me), &content).into_response()
}

async fn ban(
    State(state): Shared,
    headers: HeaderMap,
    Form(form): Form<Vec<(String, String)>>,
) -> Response {
    hit(&state);
    let Some((token, me)) = state.me(&headers) else {
        return Redirect::to("/").into_response();
    };
    if !me.admin {
        return StatusCode::FORBIDDEN.into_response();
    }
    let csrf = form.iter().find(|(k, _)| k == "csrf_token").map(|(_, v)| v.as_str());
    if csrf != Some(token.as_str()) {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    let uids: Vec<u64> = form
        .iter()
        .filter(|(k, _)| k == "uid[]")
        .filter_map(|(_, v)| v.parse().ok())
        .collect();
    let mut db = state.write();
    for user in db.users.iter_mut().filter(|u| uids.contains(&u.id)) {
        user.banned = true;
    }
    Redirect::to("/admin/banned").into_response()
}

async fn image(State(state): Shared, Path(file): Path<String>, headers: HeaderMap) -> Response {
    hit(&state);
    let (id, ext) = file.split_once('.').unwrap_or((file.as_str(), ""));
    let Ok(id) = id.parse::<u64>() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let db = state.read();
    let Some(post) = db
        .posts
        .iter()
        .find(|p| p.id == id && ext_for(&p.mime) == Some(ext))
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    cacheable(
        &state,
        &headers,
        format!("\"image-{id}\""),
        &post.mime,
        post.data.clone(),
    )
}

const STATIC_FILES: &[(&str, &str, &[u8])] = &[
    ("/favicon.ico", "image/x-icon", b"\x00\x00\x01\x00mock-icon"),
    ("/js/jquery-2.2.0.js", "application/javascript", b"/* jquery */"),
    (
        "/js/main.js",
        "application/javascript",
        b"$(function () { $('#isu-post-more-btn').on('click', function () {}); });",
    ),
    ("/css/style.css", "text/css", b".isu-post { margin: 0 auto; }"),
    ("/img/ajax-loader.gif", "image/gif", b"GIF89a-mock"),
];

async fn static_file(State(state): Shared, uri: axum::http::Uri, headers: HeaderMap) -> Response {
    hit(&state);
    match STATIC_FILES.iter().find(|(path, _, _)| *path == uri.path()) {
        Some((path, mime, data)) => cacheable(
            &state,
            &headers,
            format!("\"static-{}\"", path.len() + data.len()),
            mime,
            data.to_vec(),
        ),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn cacheable(
    state: &AppState,
    headers: &HeaderMap,
    etag: String,
    mime: &str,
    data: Vec<u8>,
) -> Response {
    let revalidated = headers
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag);

    let validators = [
        (CACHE_CONTROL, state.cache_control.clone()),
        (ETAG, etag),
    ];

    if revalidated {
        state.stats.not_modified.fetch_add(1, Ordering::Relaxed);
        return (StatusCode::NOT_MODIFIED, validators).into_response();
    }

    (validators, [(CONTENT_TYPE, mime.to_string())], data).into_response()
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            pair.trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
                .map(str::to_string)
        })
}

fn ext_for(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

fn render_posts(db: &Db, posts: &[&PostRow], token: &str) -> String {
    posts
        .iter()
        .map(|post| {
            let author = db
                .user(post.user_id)
                .map(|u| escape(&u.account_name))
                .unwrap_or_default();
            let ext = ext_for(&post.mime).unwrap_or("jpg");
            let comments: Vec<&CommentRow> =
                db.comments.iter().filter(|c| c.post_id == post.id).collect();
            let rendered_comments: String = comments
                .iter()
                .map(|c| {
                    let name = db
                        .user(c.user_id)
                        .map(|u| escape(&u.account_name))
                        .unwrap_or_default();
                    format!(
                        r#"
    <div class="isu-comment">
      <a href="/@{name}" class="isu-comment-account-name">{name}</a>
      <span class="isu-comment-text">{}</span>
    </div>"#,
                        escape(&c.comment)
                    )
                })
                .collect();
            let created_at = post.created_at.format(&Rfc3339).unwrap_or_default();

            format!(
                r#"<div class="isu-post" id="pid_{id}" data-created-at="{created_at}">
  <div class="isu-post-header">
    <a href="/@{author}" class="isu-post-account-name">{author}</a>
    <a href="/posts/{id}" class="isu-post-permalink"><time class="timeago" datetime="{created_at}"></time></a>
  </div>
  <div class="isu-post-image">
    <img src="/image/{id}.{ext}" class="isu-image">
  </div>
  <div class="isu-post-text">
    <a href="/@{author}" class="isu-post-account-name">{author}</a>
    {body}
  </div>
  <div class="isu-post-comment">
    <div class="isu-post-comment-count">comments: <b>{count}</b></div>{rendered_comments}
    <div class="isu-comment-form">
      <form method="post" action="/comment">
        <input type="text" name="comment">
        <input type="hidden" name="post_id" value="{id}">
        <input type="hidden" name="csrf_token" value="{token}">
        <input type="submit" name="submit" value="submit">
      </form>
    </div>
  </div>
</div>
"#,
                id = post.id,
                body = escape(&post.body),
                count = comments.len(),
                token = escape(token),
            )
        })
        .collect()
}

fn layout(me: Option<&UserRow>, content: &str) -> Html<String> {
    let menu = match me {
        None => r#"<div><a href="/login">login</a></div>"#.to_string(),
        Some(user) => {
            let name = escape(&user.account_name);
            let admin = if user.admin {
                r#"<div><a href="/admin/banned">admin</a></div>"#
            } else {
                ""
            };
            format!(
                r#"<div><a href="/@{name}"><span class="isu-account-name">{name}</span></a></div>{admin}<div><a href="/logout">logout</a></div>"#
            )
        }
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Iscogram</title>
<link href="/css/style.css" media="screen" rel="stylesheet" type="text/css">
</head>
<body>
<div class="container">
<div class="header">
  <div class="isu-title"><h1><a href="/">Iscogram</a></h1></div>
  <div class="isu-header-menu">{menu}</div>
</div>
{content}
</div>
<script src="/js/jquery-2.2.0.js"></script>
<script src="/js/main.js"></script>
</body>
</html>"#
    ))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
