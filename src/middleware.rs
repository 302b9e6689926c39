use axum::{
    Form,
    extract::{FromRequest, Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::{
    AppState,
    db::UserExt,
    dtos::CsrfProtected,
    error::{ErrorMessage, HttpError},
    models::User,
    utils::token,
};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const CSRF_COOKIE: &str = "csrftoken";
pub const LOGIN_URL: &str = "/auth/login/";

/// Per-request session data, inserted by [`session`] for every route
///
/// Handlers extract it with `Extension<RequestContext>`; `page()` seeds a
/// template context with what `base.html` needs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user: Option<User>,
    pub csrf_token: String,
}

impl RequestContext {
    pub fn page(&self) -> tera::Context {
        let mut context = tera::Context::new();
        context.insert("user", &self.user);
        context.insert("csrf_token", &self.csrf_token);
        context
    }
}

/// The logged-in user, inserted by [`login_required`]
///
/// Example usage in a handler:
/// ```
/// async fn my_handler(Extension(auth): Extension<AuthUser>) {
///     // Access auth.user here
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
}

/// Session middleware, applied to the whole router
///
/// 1. Reads the `access_token` cookie, verifies the JWT and loads the user.
///    Any failure leaves the request anonymous instead of rejecting it.
/// 2. Reads the `csrftoken` cookie, issuing a fresh one when absent.
/// 3. Inserts a [`RequestContext`] for downstream handlers.
pub async fn session(
    cookie_jar: CookieJar,
    State(app_state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let user = match cookie_jar.get(ACCESS_TOKEN_COOKIE) {
        Some(cookie) => resolve_user(&app_state, cookie.value()).await,
        None => None,
    };

    let (csrf_token, issued) = match cookie_jar.get(CSRF_COOKIE) {
        Some(cookie) if !cookie.value().is_empty() => (cookie.value().to_string(), false),
        _ => (Uuid::new_v4().simple().to_string(), true),
    };

    req.extensions_mut().insert(RequestContext {
        user,
        csrf_token: csrf_token.clone(),
    });

    let response = next.run(req).await;

    if issued {
        let cookie = Cookie::build((CSRF_COOKIE, csrf_token))
            .path("/")
            .same_site(SameSite::Lax)
            .max_age(time::Duration::days(365))
            .build();
        (cookie_jar.add(cookie), response).into_response()
    } else {
        response
    }
}

async fn resolve_user(app_state: &AppState, token: &str) -> Option<User> {
    let user_id = match token::decode_token(token, app_state.env.jwt_secret.as_bytes()) {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::debug!("Ignoring session cookie: {}", e);
            return None;
        }
    };

    // The user may have been deleted after the token was issued
    match app_state.db_client.get_user(Some(user_id), None).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!("DB error, loading session user: {}", e);
            None
        }
    }
}

/// Redirect anonymous requests to the login page
///
/// Must run after [`session`]. On success inserts [`AuthUser`].
pub async fn login_required(mut req: Request, next: Next) -> Response {
    let user = req
        .extensions()
        .get::<RequestContext>()
        .and_then(|ctx| ctx.user.clone());

    match user {
        Some(user) => {
            req.extensions_mut().insert(AuthUser { user });
            next.run(req).await
        }
        None => {
            let next_url = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            Redirect::to(&login_url(next_url)).into_response()
        }
    }
}

pub fn login_url(next: &str) -> String {
    format!("{}?next={}", LOGIN_URL, urlencoding::encode(next))
}

/// Session cookie holding a freshly issued token
pub fn session_cookie(token: String, max_age_seconds: i64) -> Cookie<'static> {
    Cookie::build((ACCESS_TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age_seconds))
        .build()
}

/// Cookie to pass to `CookieJar::remove` on logout
pub fn session_cookie_removal() -> Cookie<'static> {
    Cookie::build(ACCESS_TOKEN_COOKIE).path("/").build()
}

/// Compare a submitted `csrfmiddlewaretoken` with the `csrftoken` cookie
pub fn verify_csrf(ctx: &RequestContext, submitted: &str) -> Result<(), HttpError> {
    if submitted.is_empty() || submitted != ctx.csrf_token {
        tracing::warn!("CSRF token missing or incorrect");
        return Err(HttpError::forbidden(ErrorMessage::CsrfFailed.to_string()));
    }
    Ok(())
}

/// `Form<T>` that also verifies the CSRF token carried by `T`
pub struct CsrfForm<T>(pub T);

impl<T, S> FromRequest<S> for CsrfForm<T>
where
    T: DeserializeOwned + CsrfProtected,
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = req.extensions().get::<RequestContext>().cloned();

        let Form(form) = Form::<T>::from_request(req, state)
            .await
            .map_err(|e| HttpError::bad_request(e.body_text()))?;

        let ctx = ctx.ok_or_else(|| HttpError::forbidden(ErrorMessage::CsrfFailed.to_string()))?;
        verify_csrf(&ctx, form.csrf_token())?;

        Ok(CsrfForm(form))
    }
}
