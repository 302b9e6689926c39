use axum::{Router, middleware};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{
    AppState,
    handler::{
        auth::auth_handler, comment::comment_handler, pages::not_found, pages::pages_handler,
        post::post_handler, users::users_handler,
    },
    middleware::session,
};

pub fn create_router(app_state: AppState) -> Router {
    let media = ServeDir::new(&app_state.env.media_root);

    Router::new()
        .merge(post_handler(&app_state))
        .merge(comment_handler())
        .merge(users_handler())
        .merge(auth_handler())
        .merge(pages_handler())
        .nest_service("/media", media)
        .fallback(not_found)
        // wraps the fallback too; every handler can rely on RequestContext
        .layer(middleware::from_fn_with_state(app_state.clone(), session))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
