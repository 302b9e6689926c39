use crate::AppState;
use crate::db::CommentExt;
use crate::dtos::{CommentDto, CommentForm, ConfirmForm, FormErrors, form_errors};
use crate::error::{HttpError, db_error};
use crate::handler::post::load_post;
use crate::handler::{post_detail_url, render_page};
use crate::middleware::{AuthUser, CsrfForm, RequestContext, login_required};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Extension, Router, middleware};
use chrono::Utc;
use tracing::instrument;
use validator::Validate;

/// Router for comment endpoints under /posts/{post_id}/comment/
///
/// Every route requires a logged-in user.
pub fn comment_handler() -> Router<AppState> {
    Router::new()
        .route("/posts/{post_id}/comment/", post(add_comment))
        .route(
            "/posts/{post_id}/comment/{comment_id}/edit/",
            get(edit_comment_form).post(edit_comment),
        )
        .route(
            "/posts/{post_id}/comment/{comment_id}/delete/",
            get(delete_comment_form).post(delete_comment),
        )
        .route_layer(middleware::from_fn(login_required))
}

fn comment_url(post_id: i64, comment_id: i64) -> String {
    format!("{}#comment_{}", post_detail_url(post_id), comment_id)
}

async fn load_comment(
    app_state: &AppState,
    post_id: i64,
    comment_id: i64,
) -> Result<CommentDto, HttpError> {
    app_state
        .db_client
        .get_comment(post_id, comment_id)
        .await
        .map_err(|e| db_error("getting comment", e))?
        .ok_or_else(|| {
            HttpError::not_found(format!(
                "Comment {} not found on post {}",
                comment_id, post_id
            ))
        })
}

fn render_comment_page(
    ctx: &RequestContext,
    comment: &CommentDto,
    form: Option<&CommentForm>,
    errors: FormErrors,
) -> Result<Response, HttpError> {
    let mut context = ctx.page();
    context.insert("comment", comment);
    context.insert("form", &form);
    context.insert("errors", &errors);
    render_page("blog/comment.html", &context)
}

/// Add a comment to a post the user can see
///
/// An invalid submission goes back to the post without creating anything.
#[instrument(skip(app_state, ctx, auth, body), fields(username = %auth.user.username))]
pub async fn add_comment(
    Path(post_id): Path<i64>,
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(auth): Extension<AuthUser>,
    CsrfForm(body): CsrfForm<CommentForm>,
) -> Result<Response, HttpError> {
    let post = load_post(&app_state, post_id).await?;
    if !post.is_visible_to(ctx.user.as_ref(), Utc::now()) {
        return Err(HttpError::not_found(format!(
            "Post {} is not visible to this user",
            post_id
        )));
    }

    if let Err(e) = body.validate() {
        tracing::info!("Invalid add_comment input: {}", e);
        return Ok(Redirect::to(&post_detail_url(post_id)).into_response());
    }

    let comment = app_state
        .db_client
        .create_comment(auth.user.id, post_id, body.text.trim())
        .await
        .map_err(|e| db_error("creating comment", e))?;

    tracing::info!(comment_id = comment.id, "add_comment successful");
    Ok(Redirect::to(&comment_url(post_id, comment.id)).into_response())
}

#[instrument(skip(app_state, ctx, auth))]
pub async fn edit_comment_form(
    Path((post_id, comment_id)): Path<(i64, i64)>,
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, HttpError> {
    let comment = load_comment(&app_state, post_id, comment_id).await?;
    if comment.author_id != auth.user.id {
        return Ok(Redirect::to(&post_detail_url(post_id)).into_response());
    }

    let form = CommentForm {
        text: comment.text.clone(),
        ..Default::default()
    };
    render_comment_page(&ctx, &comment, Some(&form), FormErrors::new())
}

/// Edit a comment; only its author may do so
#[instrument(skip(app_state, ctx, auth, body), fields(username = %auth.user.username))]
pub async fn edit_comment(
    Path((post_id, comment_id)): Path<(i64, i64)>,
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(auth): Extension<AuthUser>,
    CsrfForm(body): CsrfForm<CommentForm>,
) -> Result<Response, HttpError> {
    let comment = load_comment(&app_state, post_id, comment_id).await?;
    if comment.author_id != auth.user.id {
        tracing::info!("edit_comment refused, not the author");
        return Ok(Redirect::to(&post_detail_url(post_id)).into_response());
    }

    if let Err(e) = body.validate() {
        return render_comment_page(&ctx, &comment, Some(&body), form_errors(&e));
    }

    app_state
        .db_client
        .edit_comment(auth.user.id, comment_id, body.text.trim())
        .await
        .map_err(|e| db_error("editing comment", e))?;

    tracing::info!("edit_comment successful");
    Ok(Redirect::to(&comment_url(post_id, comment_id)).into_response())
}

#[instrument(skip(app_state, ctx, auth))]
pub async fn delete_comment_form(
    Path((post_id, comment_id)): Path<(i64, i64)>,
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, HttpError> {
    let comment = load_comment(&app_state, post_id, comment_id).await?;
    if comment.author_id != auth.user.id {
        return Ok(Redirect::to(&post_detail_url(post_id)).into_response());
    }

    render_comment_page(&ctx, &comment, None, FormErrors::new())
}

#[instrument(skip(app_state, auth, _form), fields(username = %auth.user.username))]
pub async fn delete_comment(
    Path((post_id, comment_id)): Path<(i64, i64)>,
    State(app_state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    CsrfForm(_form): CsrfForm<ConfirmForm>,
) -> Result<Response, HttpError> {
    let comment = load_comment(&app_state, post_id, comment_id).await?;
    if comment.author_id != auth.user.id {
        tracing::info!("delete_comment refused, not the author");
        return Ok(Redirect::to(&post_detail_url(post_id)).into_response());
    }

    app_state
        .db_client
        .delete_comment(auth.user.id, comment_id)
        .await
        .map_err(|e| db_error("deleting comment", e))?;

    tracing::info!("delete_comment successful");
    Ok(Redirect::to(&post_detail_url(post_id)).into_response())
}
