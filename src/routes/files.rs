//! File serving routes
//!
//! Serves stored bytes by content digest.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Router,
};

use crate::digest::ContentDigest;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the files router
pub fn router() -> Router<AppState> {
    Router::new().route("/:digest", get(serve_file))
}

/// Serve the bytes behind a digest
async fn serve_file(
    State(state): State<AppState>,
    Path(digest): Path<String>,
) -> Result<Response> {
    let digest = ContentDigest::parse(&digest).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let record = state
        .registry()
        .find(&digest)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No content with digest {}", digest)))?;

    let bytes = state.store().load(&digest).await?;

    let content_type = mime_guess::from_path(&record.name)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    // Content never changes under a digest
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "inline; filename*=UTF-8''{}",
                urlencoding::encode(&record.name)
            ),
        )
        .header(header::ETAG, format!("\"{}\"", digest))
        .header(header::CACHE_CONTROL, "public, max-age=31536000, immutable")
        .body(Body::from(bytes))
        .map_err(|e| AppError::Internal(e.to_string()))
}
