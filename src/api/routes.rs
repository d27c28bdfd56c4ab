use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Multipart framing adds a little on top of the file itself.
    let upload_limit = state.config.max_upload_size as usize + 64 * 1024;

    Router::new()
        // Unified media
        .route(
            "/upload",
            post(handlers::upload_media).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/metadata/:filename", get(handlers::get_metadata))
        .route("/resize", post(handlers::resize_image))
        .route("/rename", post(handlers::rename_media))
        .route("/media", get(handlers::list_media))
        .route("/media/:filename", delete(handlers::delete_media))
        // Legacy-compatible
        .route(
            "/upload/image",
            post(handlers::upload_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/upload/doc",
            post(handlers::upload_doc).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/rename/image", post(handlers::rename_image))
        .route("/rename/doc", post(handlers::rename_doc))
        .route("/images", get(handlers::list_images))
        .route("/images/:filename", delete(handlers::delete_image))
        .route("/docs", get(handlers::list_docs))
        .route("/docs/:filename", delete(handlers::delete_doc))
        // Stored content
        .route("/files/*key", get(handlers::download_file))
        // Internal
        .route("/_internal/health", get(handlers::health))
        .route("/_internal/migration", get(handlers::migration_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
