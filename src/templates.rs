//! Tera templates compiled into the binary.

use axum::response::Html;
use once_cell::sync::Lazy;
use tera::{Context, Tera};

use crate::error::{ErrorMessage, HttpError};

macro_rules! template {
    ($name:literal) => {
        ($name, include_str!(concat!("../templates/", $name)))
    };
}

const SOURCES: &[(&str, &str)] = &[
    template!("base.html"),
    template!("includes/header.html"),
    template!("includes/paginator.html"),
    template!("includes/post_card.html"),
    template!("includes/form_errors.html"),
    template!("blog/index.html"),
    template!("blog/category.html"),
    template!("blog/detail.html"),
    template!("blog/create.html"),
    template!("blog/confirm_delete.html"),
    template!("blog/comment.html"),
    template!("blog/profile.html"),
    template!("blog/user.html"),
    template!("registration/registration_form.html"),
    template!("registration/login.html"),
    template!("registration/logged_out.html"),
    template!("registration/password_change_form.html"),
    template!("registration/password_change_done.html"),
    template!("pages/about.html"),
    template!("pages/rules.html"),
    template!("pages/404.html"),
    template!("pages/403csrf.html"),
    template!("pages/500.html"),
];

pub static TEMPLATES: Lazy<Tera> = Lazy::new(|| match build() {
    Ok(tera) => tera,
    Err(e) => {
        tracing::error!("Failed to compile templates: {:?}", e);
        Tera::default()
    }
});

fn build() -> tera::Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_templates(SOURCES.to_vec())?;
    Ok(tera)
}

/// Compile the sources eagerly so a broken template stops startup
pub fn check() -> tera::Result<()> {
    build()?;
    Lazy::force(&TEMPLATES);
    Ok(())
}

/// Render `name` with `context` into an HTML response body
pub fn render(name: &str, context: &Context) -> Result<Html<String>, HttpError> {
    TEMPLATES.render(name, context).map(Html).map_err(|e| {
        tracing::error!("Template error, rendering {}: {:?}", name, e);
        HttpError::server_error(ErrorMessage::ServerError.to_string())
    })
}
