use crate::{
    AppState,
    db::UserExt,
    dtos::{
        ConfirmForm, FormErrors, LoginUserDto, NON_FIELD_ERRORS, NextQuery, PasswordChangeDto,
        RegisterUserDto, add_error, form_errors,
    },
    error::{ErrorMessage, HttpError, db_error},
    handler::render_page,
    middleware::{
        AuthUser, CsrfForm, RequestContext, login_required, session_cookie,
        session_cookie_removal,
    },
    models::User,
    utils::{password, token},
};
use axum::{
    Extension, Router,
    extract::{Query, State},
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::instrument;
use validator::Validate;

const INVALID_LOGIN: &str =
    "Please enter a correct username and password. Note that both fields may be case-sensitive.";
const WRONG_OLD_PASSWORD: &str =
    "Your old password was entered incorrectly. Please enter it again.";
const USERNAME_TAKEN: &str = "A user with that username already exists.";

pub const PASSWORD_CHANGE_DONE_URL: &str = "/auth/password_change/done/";

/// Router for authentication endpoints under /auth/
pub fn auth_handler() -> Router<AppState> {
    Router::new()
        .route("/auth/registration/", get(registration_form).post(register))
        .route("/auth/login/", get(login_form).post(login))
        .route("/auth/logout/", post(logout))
        .route(
            "/auth/password_change/",
            get(password_change_form)
                .post(password_change)
                .route_layer(middleware::from_fn(login_required)),
        )
        .route(
            "/auth/password_change/done/",
            get(password_change_done).route_layer(middleware::from_fn(login_required)),
        )
}

/// Only same-site absolute paths are followed after login
fn safe_next(next: Option<&str>) -> &str {
    match next {
        // browsers drop tab and newline from Location, so "/\t/host" turns into "//host"
        Some(next) if next.chars().any(char::is_control) => "/",
        Some(next) if next.starts_with('/') && !next.starts_with("//") && !next.contains('\\') => {
            next
        }
        _ => "/",
    }
}

/// Issue a session token for `user` and attach it to the redirect
fn log_in(
    app_state: &AppState,
    jar: CookieJar,
    user: &User,
    redirect_to: &str,
) -> Result<Response, HttpError> {
    let access_token = token::create_token(
        &user.id,
        app_state.env.jwt_secret.as_bytes(),
        app_state.env.jwt_maxage,
    )
    .map_err(|e| {
        tracing::error!("Access token creation error: {}", e);
        HttpError::server_error(ErrorMessage::ServerError.to_string())
    })?;

    let jar = jar.add(session_cookie(access_token, app_state.env.jwt_maxage));
    Ok((jar, Redirect::to(redirect_to)).into_response())
}

fn render_registration(
    ctx: &RequestContext,
    form: &RegisterUserDto,
    errors: FormErrors,
) -> Result<Response, HttpError> {
    let mut context = ctx.page();
    context.insert("form", form);
    context.insert("errors", &errors);
    render_page("registration/registration_form.html", &context)
}

#[instrument(skip_all)]
pub async fn registration_form(
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HttpError> {
    render_registration(&ctx, &RegisterUserDto::default(), FormErrors::new())
}

/// Register a new account and log it in straight away
#[instrument(skip(app_state, ctx, jar, body), fields(username = %body.username))]
pub async fn register(
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    CsrfForm(body): CsrfForm<RegisterUserDto>,
) -> Result<Response, HttpError> {
    let mut errors = match body.validate() {
        Ok(()) => FormErrors::new(),
        Err(e) => form_errors(&e),
    };

    if !errors.contains_key("username") {
        let taken = app_state
            .db_client
            .username_taken(&body.username, None)
            .await
            .map_err(|e| db_error("checking username", e))?;
        if taken {
            add_error(&mut errors, "username", USERNAME_TAKEN);
        }
    }

    if !errors.is_empty() {
        tracing::debug!(?errors, "Invalid register input");
        return render_registration(&ctx, &body, errors);
    }

    let hash_password = match password::hash(&body.password1) {
        Ok(hash) => hash,
        Err(e @ (ErrorMessage::EmptyPassword | ErrorMessage::ExceededMaxPasswordLength(_))) => {
            let mut errors = FormErrors::new();
            add_error(&mut errors, "password1", e.to_string());
            return render_registration(&ctx, &body, errors);
        }
        Err(e) => {
            tracing::error!("Password hashing error: {}", e);
            return Err(HttpError::server_error(ErrorMessage::ServerError.to_string()));
        }
    };

    let result = app_state
        .db_client
        .save_user(
            &body.username,
            &body.first_name,
            &body.last_name,
            &body.email,
            &hash_password,
        )
        .await;

    match result {
        Ok(user) => {
            tracing::info!(user_id = %user.id, "Register successful");
            log_in(&app_state, jar, &user, "/")
        }
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            tracing::info!("DB error, saving user, unique_violation: {}", db_err);
            let mut errors = FormErrors::new();
            add_error(&mut errors, "username", USERNAME_TAKEN);
            render_registration(&ctx, &body, errors)
        }
        Err(e) => Err(db_error("saving user", e)),
    }
}

fn render_login(
    ctx: &RequestContext,
    form: &LoginUserDto,
    errors: FormErrors,
) -> Result<Response, HttpError> {
    let mut context = ctx.page();
    context.insert("next", form.next.as_deref().unwrap_or_default());
    context.insert("form", form);
    context.insert("errors", &errors);
    render_page("registration/login.html", &context)
}

#[instrument(skip_all)]
pub async fn login_form(
    Query(query): Query<NextQuery>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HttpError> {
    let form = LoginUserDto {
        next: query.next,
        ..Default::default()
    };
    render_login(&ctx, &form, FormErrors::new())
}

/// Check credentials and start a session
///
/// Unknown usernames and wrong passwords produce the same error.
#[instrument(skip(app_state, ctx, jar, body), fields(username = %body.username))]
pub async fn login(
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    CsrfForm(body): CsrfForm<LoginUserDto>,
) -> Result<Response, HttpError> {
    if let Err(e) = body.validate() {
        return render_login(&ctx, &body, form_errors(&e));
    }

    let user = app_state
        .db_client
        .get_user(None, Some(body.username.trim()))
        .await
        .map_err(|e| db_error("getting user", e))?;

    let authenticated = user.filter(|user| {
        password::compare(&body.password, &user.password).unwrap_or_else(|e| {
            tracing::debug!("Password error: {}", e);
            false
        })
    });

    let Some(user) = authenticated else {
        tracing::info!("Login failed");
        let mut errors = FormErrors::new();
        add_error(&mut errors, NON_FIELD_ERRORS, INVALID_LOGIN);
        return render_login(&ctx, &body, errors);
    };

    tracing::info!(user_id = %user.id, "Login successful");
    log_in(&app_state, jar, &user, safe_next(body.next.as_deref()))
}

/// Drop the session cookie and render the logged-out page anonymously
#[instrument(skip_all)]
pub async fn logout(
    Extension(ctx): Extension<RequestContext>,
    jar: CookieJar,
    CsrfForm(_form): CsrfForm<ConfirmForm>,
) -> Result<Response, HttpError> {
    let anonymous = RequestContext {
        user: None,
        csrf_token: ctx.csrf_token,
    };
    let page = render_page("registration/logged_out.html", &anonymous.page())?;

    tracing::info!("Logout successful");
    Ok((jar.remove(session_cookie_removal()), page).into_response())
}

fn render_password_change(ctx: &RequestContext, errors: FormErrors) -> Result<Response, HttpError> {
    let mut context = ctx.page();
    context.insert("errors", &errors);
    render_page("registration/password_change_form.html", &context)
}

#[instrument(skip_all, fields(username = %auth.user.username))]
pub async fn password_change_form(
    Extension(ctx): Extension<RequestContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, HttpError> {
    render_password_change(&ctx, FormErrors::new())
}

/// Change password (requires old password verification)
///
/// The session token only names the user, so the current session stays valid.
#[instrument(skip_all, fields(username = %auth.user.username))]
pub async fn password_change(
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(auth): Extension<AuthUser>,
    CsrfForm(body): CsrfForm<PasswordChangeDto>,
) -> Result<Response, HttpError> {
    let mut errors = match body.validate() {
        Ok(()) => FormErrors::new(),
        Err(e) => form_errors(&e),
    };

    if !errors.contains_key("old_password") {
        let old_matches =
            password::compare(&body.old_password, &auth.user.password).unwrap_or(false);
        if !old_matches {
            add_error(&mut errors, "old_password", WRONG_OLD_PASSWORD);
        }
    }

    if !errors.is_empty() {
        tracing::debug!(?errors, "Invalid password_change input");
        return render_password_change(&ctx, errors);
    }

    let hash_password = password::hash(&body.new_password1).map_err(|e| {
        tracing::error!("Password hashing error: {}", e);
        HttpError::server_error(ErrorMessage::ServerError.to_string())
    })?;

    app_state
        .db_client
        .update_user_password(auth.user.id, &hash_password)
        .await
        .map_err(|e| db_error("updating user password", e))?;

    tracing::info!("password_change successful");
    Ok(Redirect::to(PASSWORD_CHANGE_DONE_URL).into_response())
}

#[instrument(skip_all)]
pub async fn password_change_done(
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HttpError> {
    render_page("registration/password_change_done.html", &ctx.page())
}
