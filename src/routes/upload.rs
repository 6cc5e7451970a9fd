//! Upload Routes
//!
//! Endpoints:
//! - POST /upload - multipart upload (`file`, optional `path` and `kind`)

use axum::{
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::error::{AppError, Result};
use crate::registry::ContentKind;
use crate::state::AppState;
use crate::upload::UploadRequest;

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new().route("/upload", post(upload))
}

/// POST /upload
///
/// Every successful outcome (created, linked, no-op) answers 201 with the
/// receipt; `status` in the body tells them apart.
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut data = None;
    let mut file_name = None;
    let mut path = None;
    let mut kind = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                data = Some(bytes.to_vec());
            }
            "path" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                path = Some(text);
            }
            "kind" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                kind = Some(text.parse::<ContentKind>().map_err(AppError::BadRequest)?);
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown multipart field");
            }
        }
    }

    let data = data.ok_or_else(|| AppError::BadRequest("missing 'file' part".to_string()))?;
    let origin = path
        .filter(|p| !p.trim().is_empty())
        .or_else(|| file_name.clone())
        .filter(|o| !o.trim().is_empty())
        .ok_or_else(|| {
            AppError::BadRequest("no origin: send a filename or a 'path' part".to_string())
        })?;

    let request = UploadRequest {
        data,
        origin,
        name: file_name,
        kind,
    };

    let receipt = state.uploader().upload(request).await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/files/{}", receipt.digest))],
        Json(receipt),
    ))
}
