//! Content record routes
//!
//! Endpoints:
//! - GET /api/v1/contents - page through content records
//! - GET /api/v1/contents/:digest - one record with its origins
//! - GET /api/v1/contents/:digest/origins - origin records with timestamps
//! - GET /api/v1/origins?path= - records ever uploaded from a path

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::digest::ContentDigest;
use crate::error::{AppError, Result};
use crate::registry::{ContentRecord, OriginRecord};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 500;

/// Create the contents router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/contents", get(list_contents))
        .route("/api/v1/contents/:digest", get(get_content))
        .route("/api/v1/contents/:digest/origins", get(get_origins))
        .route("/api/v1/origins", get(find_by_origin))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct OriginQuery {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ContentList {
    pub items: Vec<ContentRecord>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

async fn list_contents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ContentList>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let items = state.registry().list(limit, offset).await?;
    let total = state.registry().count().await?;

    Ok(Json(ContentList {
        items,
        total,
        limit,
        offset,
    }))
}

async fn get_content(
    State(state): State<AppState>,
    Path(digest): Path<String>,
) -> Result<Json<ContentRecord>> {
    let digest = parse_digest(&digest)?;

    state
        .registry()
        .find(&digest)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No content with digest {}", digest)))
}

async fn get_origins(
    State(state): State<AppState>,
    Path(digest): Path<String>,
) -> Result<Json<Vec<OriginRecord>>> {
    let digest = parse_digest(&digest)?;

    if !state.registry().contains(&digest).await? {
        return Err(AppError::NotFound(format!("No content with digest {}", digest)));
    }

    Ok(Json(state.registry().origins(&digest).await?))
}

async fn find_by_origin(
    State(state): State<AppState>,
    Query(query): Query<OriginQuery>,
) -> Result<Json<Vec<ContentRecord>>> {
    Ok(Json(state.registry().find_by_origin(&query.path).await?))
}

fn parse_digest(value: &str) -> Result<ContentDigest> {
    ContentDigest::parse(value).map_err(|e| AppError::BadRequest(e.to_string()))
}
