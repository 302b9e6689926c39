use crate::{
    AppState,
    db::{PostScope, UserExt},
    dtos::{FormErrors, PageQuery, UserEditDto, add_error, form_errors},
    error::{HttpError, db_error},
    handler::{post::paginate_posts, profile_url, render_page},
    middleware::{AuthUser, CsrfForm, RequestContext, login_required},
};
use axum::{
    Extension, Router,
    extract::{Path, Query, State},
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use tracing::instrument;
use validator::Validate;

const USERNAME_TAKEN: &str = "A user with that username already exists.";

/// Router for profile pages
///
/// `/profile/edit/` is registered as a static segment, so it wins over a
/// user literally named "edit".
pub fn users_handler() -> Router<AppState> {
    Router::new()
        .route(
            "/profile/edit/",
            get(edit_profile_form)
                .post(edit_profile)
                .route_layer(middleware::from_fn(login_required)),
        )
        .route("/profile/{username}/", get(profile))
}

/// A user's posts, newest first
///
/// The owner sees everything they wrote; other visitors get the public
/// listing filter.
#[instrument(skip(app_state, ctx))]
pub async fn profile(
    Path(username): Path<String>,
    Query(params): Query<PageQuery>,
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HttpError> {
    let profile = app_state
        .db_client
        .get_user(None, Some(&username))
        .await
        .map_err(|e| db_error("getting user", e))?
        .ok_or_else(|| HttpError::not_found(format!("User {} not found", username)))?;

    let is_owner = ctx.user.as_ref().is_some_and(|u| u.id == profile.id);
    let scope = PostScope::Author {
        author_id: profile.id,
        include_hidden: is_owner,
    };
    let page = paginate_posts(&app_state, scope, params.page.as_deref()).await?;

    let mut context = ctx.page();
    context.insert("profile_name", &profile.display_name());
    context.insert("profile", &profile);
    context.insert("page_obj", &page);
    render_page("blog/profile.html", &context)
}

fn render_profile_form(
    ctx: &RequestContext,
    form: &UserEditDto,
    errors: FormErrors,
) -> Result<Response, HttpError> {
    let mut context = ctx.page();
    context.insert("form", form);
    context.insert("errors", &errors);
    render_page("blog/user.html", &context)
}

#[instrument(skip_all, fields(username = %auth.user.username))]
pub async fn edit_profile_form(
    Extension(ctx): Extension<RequestContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, HttpError> {
    render_profile_form(&ctx, &UserEditDto::from_user(&auth.user), FormErrors::new())
}

/// Update the session user's names, username and email
#[instrument(skip_all, fields(username = %auth.user.username))]
pub async fn edit_profile(
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(auth): Extension<AuthUser>,
    CsrfForm(body): CsrfForm<UserEditDto>,
) -> Result<Response, HttpError> {
    let mut errors = match body.validate() {
        Ok(()) => FormErrors::new(),
        Err(e) => form_errors(&e),
    };

    if !errors.contains_key("username") {
        let taken = app_state
            .db_client
            .username_taken(&body.username, Some(auth.user.id))
            .await
            .map_err(|e| db_error("checking username", e))?;
        if taken {
            add_error(&mut errors, "username", USERNAME_TAKEN);
        }
    }

    if !errors.is_empty() {
        tracing::debug!(?errors, "Invalid edit_profile input");
        return render_profile_form(&ctx, &body, errors);
    }

    let user = match app_state
        .db_client
        .update_user_profile(
            auth.user.id,
            &body.username,
            &body.first_name,
            &body.last_name,
            &body.email,
        )
        .await
    {
        Ok(user) => user,
        // lost a race with another account taking the same username
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            let mut errors = FormErrors::new();
            add_error(&mut errors, "username", USERNAME_TAKEN);
            return render_profile_form(&ctx, &body, errors);
        }
        Err(e) => return Err(db_error("updating user profile", e)),
    };

    tracing::info!(new_username = %user.username, "edit_profile successful");
    Ok(Redirect::to(&profile_url(&user.username)).into_response())
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn owner_sees_hidden_posts_visitors_do_not() {
        let env = TestEnv::new().await;
        let author = env.create_user("author").await;
        let visitor = env.create_user("visitor").await;
        let category = env.create_category("Travel", "travel", true).await;
        let past = Utc::now() - Duration::hours(1);

        env.create_post(&author, "Shared thoughts", past, true, Some(category)).await;
        env.create_post(&author, "Secret draft", past, false, Some(category)).await;
        env.create_post(&author, "Scheduled piece", Utc::now() + Duration::days(2), true, Some(category))
            .await;

        let own = env.get("/profile/author/", Some(&author)).await;
        assert_eq!(own.status, StatusCode::OK);
        assert!(own.body.contains("Shared thoughts"));
        assert!(own.body.contains("Secret draft"));
        assert!(own.body.contains("Scheduled piece"));

        for session in [None, Some(&visitor)] {
            let page = env.get("/profile/author/", session).await;
            assert!(page.body.contains("Shared thoughts"));
            assert!(!page.body.contains("Secret draft"));
            assert!(!page.body.contains("Scheduled piece"));
        }
    }

    #[tokio::test]
    async fn unknown_profile_is_not_found() {
        let env = TestEnv::new().await;
        assert_eq!(env.get("/profile/ghost/", None).await.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn profile_edit_renames_and_redirects() {
        let env = TestEnv::new().await;
        let user = env.create_user("oldname").await;

        let form = env.get("/profile/edit/", Some(&user)).await;
        assert_eq!(form.status, StatusCode::OK);
        assert!(form.body.contains("value=\"oldname\""));

        let response = env
            .post_form(
                "/profile/edit/",
                Some(&user),
                &[
                    ("first_name", "Ada"),
                    ("last_name", "Lovelace"),
                    ("username", "newname"),
                    ("email", "ada@example.com"),
                ],
            )
            .await;
        assert_eq!(response.location.as_deref(), Some("/profile/newname/"));

        let page = env.get("/profile/newname/", Some(&user)).await;
        assert!(page.body.contains("Ada Lovelace"));
        assert_eq!(env.get("/profile/oldname/", None).await.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn profile_edit_rejects_taken_username() {
        let env = TestEnv::new().await;
        let user = env.create_user("first").await;
        env.create_user("second").await;

        let response = env
            .post_form(
                "/profile/edit/",
                Some(&user),
                &[("username", "second"), ("email", "")],
            )
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.contains("A user with that username already exists."));
    }

    #[tokio::test]
    async fn profile_edit_requires_login() {
        let env = TestEnv::new().await;
        let response = env.get("/profile/edit/", None).await;
        assert_eq!(
            response.location.as_deref(),
            Some("/auth/login/?next=%2Fprofile%2Fedit%2F")
        );
    }
}
