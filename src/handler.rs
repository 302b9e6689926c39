use axum::response::{IntoResponse, Response};

use crate::{error::HttpError, templates};

pub mod auth;
pub mod comment;
pub mod pages;
pub mod post;
pub mod users;

/// Render a template into a 200 response
pub fn render_page(name: &str, context: &tera::Context) -> Result<Response, HttpError> {
    Ok(templates::render(name, context)?.into_response())
}

pub fn post_detail_url(post_id: i64) -> String {
    format!("/posts/{}/", post_id)
}

pub fn profile_url(username: &str) -> String {
    format!("/profile/{}/", urlencoding::encode(username))
}
