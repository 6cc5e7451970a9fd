//! Route modules for the file registry server

pub mod contents;
pub mod files;
pub mod health;
pub mod upload;

use axum::{extract::DefaultBodyLimit, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Multipart framing allowance on top of the upload limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let max_bytes = state.config().upload.max_bytes;
    let body_limit = if max_bytes == 0 {
        DefaultBodyLimit::disable()
    } else {
        DefaultBodyLimit::max(
            usize::try_from(max_bytes)
                .unwrap_or(usize::MAX)
                .saturating_add(MULTIPART_OVERHEAD),
        )
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router())
        .merge(upload::router())
        .merge(contents::router())
        .nest("/files", files::router())
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
