use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::request_id::{make_span_with_request_id, request_id_middleware};

use super::handlers;
use super::AppState;

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        // Catalogue
        .route("/shows", get(handlers::list_shows))
        .route("/shows/:show_id/interactions", post(handlers::record_interaction))
        .route("/genres", get(handlers::list_genres))
        .route("/counts", get(handlers::anonymous_counts))
        // Per user
        .route("/users/:user_id/profile", get(handlers::get_profile))
        .route("/users/:user_id/shows", get(handlers::list_user_shows))
        .route("/users/:user_id/counts", get(handlers::user_counts))
        .route(
            "/users/:user_id/shows/:show_id",
            put(handlers::set_user_show).delete(handlers::clear_user_show),
        )
        // Server-held feeds
        .route("/feeds", post(handlers::open_feed))
        .route(
            "/feeds/:session_id",
            get(handlers::get_feed)
                .patch(handlers::update_feed)
                .delete(handlers::close_feed),
        )
        .route("/feeds/:session_id/more", post(handlers::feed_more))
        .route("/feeds/:session_id/counts", get(handlers::feed_counts))
        .route(
            "/feeds/:session_id/shows/:show_id",
            put(handlers::set_feed_show).delete(handlers::clear_feed_show),
        )
        // Images
        .route("/images/preload", post(handlers::preload_images))
}
