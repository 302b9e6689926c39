//! Shared fixtures for handler tests: an in-memory database with the
//! migrations applied, the full router, and request helpers that carry a
//! valid CSRF cookie and, optionally, a session.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tempfile::TempDir;
use tower::ServiceExt;

pub use crate::middleware::ACCESS_TOKEN_COOKIE;
use crate::{
    AppState,
    config::Config,
    db::{CommentExt, DBClient, UserExt},
    middleware::CSRF_COOKIE,
    models::{Post, User},
    routes::create_router,
    utils::{password, token},
};

pub const TEST_PASSWORD: &str = "test password";
pub const TEST_CSRF: &str = "test-csrf-token";
const TEST_SECRET: &str = "test-secret";
const BOUNDARY: &str = "blogicum-test-boundary";

// argon2 is slow in debug builds; every fixture user shares one hash
static TEST_PASSWORD_HASH: Lazy<String> =
    Lazy::new(|| password::hash(TEST_PASSWORD).expect("hash test password"));

pub struct TestResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub set_cookies: Vec<String>,
    pub body: String,
}

impl TestResponse {
    /// Value of the `name` cookie set by this response
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.set_cookies.iter().find_map(|raw| {
            let pair = raw.split(';').next()?;
            let (key, value) = pair.split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
    }
}

pub struct TestEnv {
    pub pool: SqlitePool,
    pub app_state: AppState,
    router: Router,
    media: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);

        // one connection that never recycles, or the in-memory database is lost
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::migrate!().run(&pool).await.unwrap();

        let media = TempDir::new().unwrap();
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: TEST_SECRET.to_string(),
            jwt_maxage: 3600,
            port: 0,
            media_root: media.path().to_path_buf(),
            max_upload_size: 1024 * 1024,
        };

        let app_state = AppState {
            env: Arc::new(config),
            db_client: DBClient::new(pool.clone()),
        };
        let router = create_router(app_state.clone());

        TestEnv {
            pool,
            app_state,
            router,
            media,
        }
    }

    pub fn media_root(&self) -> PathBuf {
        self.media.path().to_path_buf()
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    pub async fn create_user(&self, username: &str) -> User {
        self.app_state
            .db_client
            .save_user(username, "", "", "", &TEST_PASSWORD_HASH)
            .await
            .unwrap()
    }

    pub async fn create_category(&self, title: &str, slug: &str, is_published: bool) -> i64 {
        sqlx::query_scalar(
            r#"
            INSERT INTO category (title, description, slug, is_published, created_at)
            VALUES (?, '', ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(title)
        .bind(slug)
        .bind(is_published)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .unwrap()
    }

    pub async fn create_location(&self, name: &str, is_published: bool) -> i64 {
        sqlx::query_scalar(
            "INSERT INTO location (name, is_published, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(is_published)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .unwrap()
    }

    pub async fn create_post(
        &self,
        author: &User,
        title: &str,
        pub_date: DateTime<Utc>,
        is_published: bool,
        category_id: Option<i64>,
    ) -> i64 {
        sqlx::query_scalar(
            r#"
            INSERT INTO post (title, text, pub_date, is_published, author_id, category_id, created_at)
            VALUES (?, 'Body of the entry.', ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(title)
        .bind(pub_date)
        .bind(is_published)
        .bind(author.id)
        .bind(category_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .unwrap()
    }

    pub async fn create_comment(&self, author: &User, post_id: i64, text: &str) -> i64 {
        self.app_state
            .db_client
            .create_comment(author.id, post_id, text)
            .await
            .unwrap()
            .id
    }

    pub async fn comment_count(&self, post_id: i64) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM comment WHERE post_id = ?")
            .bind(post_id)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn post(&self, post_id: i64) -> Option<Post> {
        sqlx::query_as::<_, Post>("SELECT * FROM post WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .unwrap()
    }

    pub async fn posts_of(&self, author: &User) -> Vec<Post> {
        sqlx::query_as::<_, Post>("SELECT * FROM post WHERE author_id = ? ORDER BY id")
            .bind(author.id)
            .fetch_all(&self.pool)
            .await
            .unwrap()
    }

    pub fn session_token(&self, user: &User) -> String {
        token::create_token(&user.id, TEST_SECRET.as_bytes(), 3600).unwrap()
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    fn cookie_header(&self, user: Option<&User>) -> String {
        match user {
            Some(user) => format!(
                "{}={}; {}={}",
                CSRF_COOKIE,
                TEST_CSRF,
                ACCESS_TOKEN_COOKIE,
                self.session_token(user)
            ),
            None => format!("{}={}", CSRF_COOKIE, TEST_CSRF),
        }
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .map(|v| v.to_str().unwrap().to_string());
        let set_cookies = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        TestResponse {
            status,
            location,
            set_cookies,
            body: String::from_utf8_lossy(&body).into_owned(),
        }
    }

    pub async fn get(&self, uri: &str, user: Option<&User>) -> TestResponse {
        let request = Request::get(uri)
            .header(header::COOKIE, self.cookie_header(user))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// GET with a raw session token, as a browser would replay it
    pub async fn get_with_token(&self, uri: &str, token: &str) -> TestResponse {
        let cookie = format!(
            "{}={}; {}={}",
            CSRF_COOKIE, TEST_CSRF, ACCESS_TOKEN_COOKIE, token
        );
        let request = Request::get(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// urlencoded POST carrying the CSRF token
    pub async fn post_form(
        &self,
        uri: &str,
        user: Option<&User>,
        fields: &[(&str, &str)],
    ) -> TestResponse {
        let mut fields = fields.to_vec();
        fields.push(("csrfmiddlewaretoken", TEST_CSRF));
        self.post_form_raw(uri, user, &fields).await
    }

    /// urlencoded POST exactly as given, no CSRF token added
    pub async fn post_form_raw(
        &self,
        uri: &str,
        user: Option<&User>,
        fields: &[(&str, &str)],
    ) -> TestResponse {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let request = Request::post(uri)
            .header(header::COOKIE, self.cookie_header(user))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    /// multipart POST carrying the CSRF token and an optional file part
    pub async fn post_multipart(
        &self,
        uri: &str,
        user: Option<&User>,
        fields: &[(&str, &str)],
        file: Option<(&str, &str, &[u8])>,
    ) -> TestResponse {
        let mut fields = fields.to_vec();
        fields.push(("csrfmiddlewaretoken", TEST_CSRF));
        self.send_multipart(uri, user, &fields, file).await
    }

    /// multipart POST without a CSRF token
    pub async fn post_multipart_raw(
        &self,
        uri: &str,
        user: Option<&User>,
        fields: &[(&str, &str)],
    ) -> TestResponse {
        self.send_multipart(uri, user, fields, None).await
    }

    async fn send_multipart(
        &self,
        uri: &str,
        user: Option<&User>,
        fields: &[(&str, &str)],
        file: Option<(&str, &str, &[u8])>,
    ) -> TestResponse {
        let mut body: Vec<u8> = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((name, filename, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::post(uri)
            .header(header::COOKIE, self.cookie_header(user))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }
}
