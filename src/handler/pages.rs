use axum::{Extension, Router, extract::OriginalUri, response::Response, routing::get};

use crate::{
    AppState,
    error::{ErrorMessage, HttpError},
    handler::render_page,
    middleware::RequestContext,
};

/// Static informational pages
pub fn pages_handler() -> Router<AppState> {
    Router::new()
        .route("/pages/about/", get(about))
        .route("/pages/rules/", get(rules))
}

pub async fn about(Extension(ctx): Extension<RequestContext>) -> Result<Response, HttpError> {
    render_page("pages/about.html", &ctx.page())
}

pub async fn rules(Extension(ctx): Extension<RequestContext>) -> Result<Response, HttpError> {
    render_page("pages/rules.html", &ctx.page())
}

/// Fallback for unknown routes
pub async fn not_found(OriginalUri(uri): OriginalUri) -> HttpError {
    HttpError::not_found(format!("{}: {}", ErrorMessage::PageNotFound, uri))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn static_pages_render() {
        let env = TestEnv::new().await;

        let about = env.get("/pages/about/", None).await;
        assert_eq!(about.status, StatusCode::OK);
        assert!(about.body.contains("Blogicum"));

        let rules = env.get("/pages/rules/", None).await;
        assert_eq!(rules.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_renders_404_page() {
        let env = TestEnv::new().await;
        let response = env.get("/no/such/page/", None).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(response.body.contains("404"));
    }
}
