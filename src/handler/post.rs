use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Extension, Router, middleware};
use chrono::Utc;
use tracing::instrument;
use validator::Validate;

use crate::AppState;
use crate::db::{CategoryExt, CommentExt, LocationExt, PostExt, PostScope};
use crate::dtos::{
    ConfirmForm, CsrfProtected, FormErrors, PageQuery, PostDto, PostForm, PostFormValues,
    PostInput, UploadedFile, add_error, form_errors, parse_datetime_local,
};
use crate::error::{ErrorMessage, HttpError, db_error};
use crate::handler::{post_detail_url, profile_url, render_page};
use crate::middleware::{AuthUser, CsrfForm, RequestContext, login_required, verify_csrf};
use crate::models::{Category, Location};
use crate::utils::pagination::{POSTS_PER_PAGE, Page, PageWindow};
use crate::utils::upload::{self, UploadError};

/// Listing, detail and post mutation routes
pub fn post_handler(app_state: &AppState) -> Router<AppState> {
    let upload_limit = DefaultBodyLimit::max(app_state.env.max_upload_size);

    Router::new()
        .route("/", get(index))
        .route("/category/{category_slug}/", get(category_posts))
        .route("/posts/{post_id}/", get(post_detail))
        .route(
            "/posts/create/",
            get(create_post_form)
                .post(create_post)
                .layer(upload_limit.clone())
                .route_layer(middleware::from_fn(login_required)),
        )
        .route(
            "/posts/{post_id}/edit/",
            get(edit_post_form)
                .post(edit_post)
                .layer(upload_limit)
                .route_layer(middleware::from_fn(login_required)),
        )
        .route(
            "/posts/{post_id}/delete/",
            get(delete_post_form)
                .post(delete_post)
                .route_layer(middleware::from_fn(login_required)),
        )
}

/// One page of posts in `scope`, newest first, `POSTS_PER_PAGE` per page
pub async fn paginate_posts(
    app_state: &AppState,
    scope: PostScope,
    requested_page: Option<&str>,
) -> Result<Page<PostDto>, HttpError> {
    let now = Utc::now();

    let total = app_state
        .db_client
        .get_post_count(scope, now)
        .await
        .map_err(|e| db_error("counting posts", e))?;

    let window = PageWindow::resolve(total, POSTS_PER_PAGE, requested_page);

    let posts = app_state
        .db_client
        .get_posts(scope, now, window.limit(), window.offset())
        .await
        .map_err(|e| db_error("getting posts", e))?;

    Ok(window.into_page(posts))
}

/// Post by id regardless of visibility, 404 if absent
pub async fn load_post(app_state: &AppState, post_id: i64) -> Result<PostDto, HttpError> {
    app_state
        .db_client
        .get_post(post_id)
        .await
        .map_err(|e| db_error("getting post", e))?
        .ok_or_else(|| HttpError::not_found(format!("Post {} not found", post_id)))
}

#[instrument(skip(app_state, ctx))]
pub async fn index(
    Query(params): Query<PageQuery>,
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HttpError> {
    let page = paginate_posts(&app_state, PostScope::Public, params.page.as_deref()).await?;

    let mut context = ctx.page();
    context.insert("page_obj", &page);
    render_page("blog/index.html", &context)
}

#[instrument(skip(app_state, ctx))]
pub async fn category_posts(
    Path(category_slug): Path<String>,
    Query(params): Query<PageQuery>,
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HttpError> {
    let category = app_state
        .db_client
        .get_published_category(&category_slug)
        .await
        .map_err(|e| db_error("getting category", e))?
        .ok_or_else(|| HttpError::not_found(format!("Category {} not found", category_slug)))?;

    let page = paginate_posts(
        &app_state,
        PostScope::Category(category.id),
        params.page.as_deref(),
    )
    .await?;

    let mut context = ctx.page();
    context.insert("category", &category);
    context.insert("page_obj", &page);
    render_page("blog/category.html", &context)
}

/// Post detail
///
/// A post failing the publication gate is shown to its author only; anyone
/// else gets the same 404 as for a missing post.
#[instrument(skip(app_state, ctx))]
pub async fn post_detail(
    Path(post_id): Path<i64>,
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HttpError> {
    let post = load_post(&app_state, post_id).await?;

    if !post.is_visible_to(ctx.user.as_ref(), Utc::now()) {
        return Err(HttpError::not_found(format!(
            "Post {} is not visible to this user",
            post_id
        )));
    }

    let comments = app_state
        .db_client
        .get_comments(post_id)
        .await
        .map_err(|e| db_error("getting comments", e))?;

    let is_author = ctx.user.as_ref().is_some_and(|u| u.id == post.author_id);

    let mut context = ctx.page();
    context.insert("post", &post);
    context.insert("comments", &comments);
    context.insert("is_author", &is_author);
    render_page("blog/detail.html", &context)
}

#[instrument(skip(app_state, ctx))]
pub async fn create_post_form(
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HttpError> {
    let options = FormOptions::load(&app_state).await?;
    render_post_form(
        &ctx,
        &options,
        None,
        PostFormValues::blank(Utc::now()),
        FormErrors::new(),
    )
}

#[instrument(skip_all, fields(username = %auth.user.username))]
pub async fn create_post(
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(auth): Extension<AuthUser>,
    multipart: Multipart,
) -> Result<Response, HttpError> {
    let form = read_post_form(multipart).await?;
    verify_csrf(&ctx, form.csrf_token())?;

    let options = FormOptions::load(&app_state).await?;
    let input = match clean_post_form(&app_state, &form, &options, None).await? {
        Ok(input) => input,
        Err(errors) => {
            return render_post_form(&ctx, &options, None, form.values(None), errors);
        }
    };

    let post = match app_state.db_client.create_post(auth.user.id, &input).await {
        Ok(post) => post,
        Err(e) => {
            discard_new_image(&app_state, &form, &input).await;
            return Err(db_error("creating post", e));
        }
    };

    tracing::info!(post_id = post.id, "create_post successful");
    Ok(Redirect::to(&profile_url(&auth.user.username)).into_response())
}

#[instrument(skip(app_state, ctx, auth))]
pub async fn edit_post_form(
    Path(post_id): Path<i64>,
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, HttpError> {
    let post = load_post(&app_state, post_id).await?;
    if post.author_id != auth.user.id {
        return Ok(Redirect::to(&post_detail_url(post_id)).into_response());
    }

    let options = FormOptions::load(&app_state).await?;
    render_post_form(
        &ctx,
        &options,
        Some(post_id),
        PostFormValues::from_post(&post),
        FormErrors::new(),
    )
}

#[instrument(skip(app_state, ctx, auth, multipart), fields(username = %auth.user.username))]
pub async fn edit_post(
    Path(post_id): Path<i64>,
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(auth): Extension<AuthUser>,
    multipart: Multipart,
) -> Result<Response, HttpError> {
    let form = read_post_form(multipart).await?;
    verify_csrf(&ctx, form.csrf_token())?;

    let post = load_post(&app_state, post_id).await?;
    if post.author_id != auth.user.id {
        tracing::info!("edit_post refused, not the author");
        return Ok(Redirect::to(&post_detail_url(post_id)).into_response());
    }

    let options = FormOptions::load(&app_state).await?;
    let input = match clean_post_form(&app_state, &form, &options, post.image.clone()).await? {
        Ok(input) => input,
        Err(errors) => {
            return render_post_form(&ctx, &options, Some(post_id), form.values(post.image), errors);
        }
    };

    if let Err(e) = app_state
        .db_client
        .edit_post(auth.user.id, post_id, &input)
        .await
    {
        discard_new_image(&app_state, &form, &input).await;
        return Err(db_error("editing post", e));
    }

    tracing::info!("edit_post successful");
    Ok(Redirect::to(&post_detail_url(post_id)).into_response())
}

#[instrument(skip(app_state, ctx, auth))]
pub async fn delete_post_form(
    Path(post_id): Path<i64>,
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, HttpError> {
    let post = load_post(&app_state, post_id).await?;
    if post.author_id != auth.user.id {
        return Ok(Redirect::to(&post_detail_url(post_id)).into_response());
    }

    let mut context = ctx.page();
    context.insert("object", &post);
    render_page("blog/confirm_delete.html", &context)
}

#[instrument(skip(app_state, auth, _form), fields(username = %auth.user.username))]
pub async fn delete_post(
    Path(post_id): Path<i64>,
    State(app_state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    CsrfForm(_form): CsrfForm<ConfirmForm>,
) -> Result<Response, HttpError> {
    let post = load_post(&app_state, post_id).await?;
    if post.author_id != auth.user.id {
        tracing::info!("delete_post refused, not the author");
        return Ok(Redirect::to(&post_detail_url(post_id)).into_response());
    }

    app_state
        .db_client
        .delete_post(auth.user.id, post_id)
        .await
        .map_err(|e| db_error("deleting post", e))?;

    tracing::info!("delete_post successful");
    Ok(Redirect::to(&profile_url(&auth.user.username)).into_response())
}

/// Categories and locations offered by the post form
pub struct FormOptions {
    categories: Vec<Category>,
    locations: Vec<Location>,
}

impl FormOptions {
    async fn load(app_state: &AppState) -> Result<Self, HttpError> {
        let categories = app_state
            .db_client
            .get_categories()
            .await
            .map_err(|e| db_error("getting categories", e))?;
        let locations = app_state
            .db_client
            .get_locations()
            .await
            .map_err(|e| db_error("getting locations", e))?;

        Ok(FormOptions {
            categories,
            locations,
        })
    }
}

fn render_post_form(
    ctx: &RequestContext,
    options: &FormOptions,
    post_id: Option<i64>,
    values: PostFormValues,
    errors: FormErrors,
) -> Result<Response, HttpError> {
    let mut context = ctx.page();
    context.insert("post_id", &post_id);
    context.insert("form", &values);
    context.insert("errors", &errors);
    context.insert("categories", &options.categories);
    context.insert("locations", &options.locations);
    render_page("blog/create.html", &context)
}

fn checkbox(value: &str) -> bool {
    !matches!(value.trim(), "" | "0" | "false" | "False")
}

/// Bind a `multipart/form-data` post submission
async fn read_post_form(mut multipart: Multipart) -> Result<PostForm, HttpError> {
    let mut form = PostForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| HttpError::bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "image" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| HttpError::bad_request(e.body_text()))?;
            // an empty file input still sends a part with no file name
            if !filename.is_empty() {
                form.image = Some(UploadedFile {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| HttpError::bad_request(e.body_text()))?;

        match name.as_str() {
            "title" => form.title = value,
            "text" => form.text = value,
            "pub_date" => form.pub_date = value,
            "is_published" => form.is_published = checkbox(&value),
            "category" => form.category = Some(value),
            "location" => form.location = Some(value),
            "image-clear" => form.image_clear = checkbox(&value),
            "csrfmiddlewaretoken" => form.csrfmiddlewaretoken = value,
            _ => {}
        }
    }

    Ok(form)
}

const INVALID_CHOICE: &str = "Select a valid choice. That choice is not one of the available choices.";

/// Resolve a `<select>` value: blank means none, otherwise it must be a known id
fn resolve_choice(raw: Option<&str>, known: &[i64]) -> Result<Option<i64>, &'static str> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<i64>() {
        Ok(id) if known.contains(&id) => Ok(Some(id)),
        _ => Err(INVALID_CHOICE),
    }
}

/// Validate a post submission and, when it is clean, store the uploaded image
///
/// The outer error is a server failure; the inner one carries field errors for
/// re-rendering the form.
async fn clean_post_form(
    app_state: &AppState,
    form: &PostForm,
    options: &FormOptions,
    current_image: Option<String>,
) -> Result<Result<PostInput, FormErrors>, HttpError> {
    let mut errors = match form.validate() {
        Ok(()) => FormErrors::new(),
        Err(e) => form_errors(&e),
    };

    let category_ids: Vec<i64> = options.categories.iter().map(|c| c.id).collect();
    let category_id = resolve_choice(form.category.as_deref(), &category_ids)
        .unwrap_or_else(|message| {
            add_error(&mut errors, "category", message);
            None
        });

    let location_ids: Vec<i64> = options.locations.iter().map(|l| l.id).collect();
    let location_id = resolve_choice(form.location.as_deref(), &location_ids)
        .unwrap_or_else(|message| {
            add_error(&mut errors, "location", message);
            None
        });

    if let Some(file) = &form.image {
        if form.image_clear {
            add_error(
                &mut errors,
                "image",
                "Please either submit a file or check the clear checkbox, not both.",
            );
        } else if let Err(e) = upload::image_extension(&file.filename) {
            add_error(&mut errors, "image", e.to_string());
        } else if file.bytes.is_empty() {
            add_error(&mut errors, "image", UploadError::Empty.to_string());
        }
    }

    if !errors.is_empty() {
        tracing::debug!(?errors, "Invalid post form");
        return Ok(Err(errors));
    }

    let pub_date = parse_datetime_local(&form.pub_date)
        .ok_or_else(|| HttpError::server_error(ErrorMessage::ServerError.to_string()))?;

    let image = match &form.image {
        Some(file) => Some(
            upload::save_image(&app_state.env.media_root, &file.filename, &file.bytes)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to save post image: {}", e);
                    HttpError::server_error(ErrorMessage::ServerError.to_string())
                })?,
        ),
        None if form.image_clear => None,
        None => current_image,
    };

    Ok(Ok(PostInput {
        title: form.title.trim().to_string(),
        text: form.text.clone(),
        pub_date,
        is_published: form.is_published,
        category_id,
        location_id,
        image,
    }))
}

/// Drop the image stored by this request when its row was never written
async fn discard_new_image(app_state: &AppState, form: &PostForm, input: &PostInput) {
    if form.image.is_none() {
        return;
    }
    if let Some(image) = &input.image {
        upload::remove_image(&app_state.env.media_root, image).await;
    }
}
