//! Legacy-compatible endpoints. They keep the per-type field names, response
//! shapes and name-collision rules older clients rely on.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::read_upload;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::error::MediaError;
use crate::service::StoredMedia;
use crate::storage::models::{LegacyKind, LegacyRecord};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ImageUploadResponse {
    pub image_url: String,
    pub filename: String,
    pub checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DocUploadResponse {
    pub doc_url: String,
    pub filename: String,
    pub checksum: String,
}

#[derive(Debug, Serialize)]
pub struct LegacyRecordResponse {
    pub id: String,
    pub filename: String,
    pub checksum: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct LegacyDeleteResponse {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyRenameRequest {
    pub old_filename: String,
    pub new_filename: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<JSend<ImageUploadResponse>>, ApiError> {
    let upload = read_upload(multipart, "image", state.config.max_upload_size).await?;
    let stored = state
        .media
        .upload_legacy(LegacyKind::Image, &upload.file_name, upload.data)
        .await?;
    Ok(JSend::success(image_response(stored)))
}

pub async fn upload_doc(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<JSend<DocUploadResponse>>, ApiError> {
    let upload = read_upload(multipart, "doc", state.config.max_upload_size).await?;
    let stored = state
        .media
        .upload_legacy(LegacyKind::Doc, &upload.file_name, upload.data)
        .await?;
    Ok(JSend::success(doc_response(stored)))
}

pub async fn rename_image(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<LegacyRenameRequest>,
) -> Result<Json<JSend<ImageUploadResponse>>, ApiError> {
    let stored = state
        .media
        .rename_legacy(LegacyKind::Image, &req.old_filename, &req.new_filename)
        .await?;
    Ok(JSend::success(image_response(stored)))
}

pub async fn rename_doc(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<LegacyRenameRequest>,
) -> Result<Json<JSend<DocUploadResponse>>, ApiError> {
    let stored = state
        .media
        .rename_legacy(LegacyKind::Doc, &req.old_filename, &req.new_filename)
        .await?;
    Ok(JSend::success(doc_response(stored)))
}

pub async fn list_images(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<Vec<LegacyRecordResponse>>>, ApiError> {
    let images = state.db.get_all_images().map_err(MediaError::from)?;
    Ok(JSend::success(images.iter().map(record_response).collect()))
}

pub async fn list_docs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<Vec<LegacyRecordResponse>>>, ApiError> {
    let docs = state.db.get_all_docs().map_err(MediaError::from)?;
    Ok(JSend::success(docs.iter().map(record_response).collect()))
}

pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Json<JSend<LegacyDeleteResponse>>, ApiError> {
    delete(&state, LegacyKind::Image, &filename).await
}

pub async fn delete_doc(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Json<JSend<LegacyDeleteResponse>>, ApiError> {
    delete(&state, LegacyKind::Doc, &filename).await
}

// ============================================================================
// Helpers
// ============================================================================

async fn delete(
    state: &AppState,
    kind: LegacyKind,
    filename: &str,
) -> Result<Json<JSend<LegacyDeleteResponse>>, ApiError> {
    let outcome = state.media.delete_legacy(kind, filename).await?;
    Ok(JSend::success(LegacyDeleteResponse {
        filename: outcome.media.file_name,
        warning: outcome.warning,
    }))
}

fn image_response(stored: StoredMedia) -> ImageUploadResponse {
    ImageUploadResponse {
        image_url: stored.url,
        checksum: stored.media.checksum.to_hex(),
        width: stored.media.width,
        height: stored.media.height,
        filename: stored.media.file_name,
    }
}

fn doc_response(stored: StoredMedia) -> DocUploadResponse {
    DocUploadResponse {
        doc_url: stored.url,
        checksum: stored.media.checksum.to_hex(),
        filename: stored.media.file_name,
    }
}

fn record_response(record: &LegacyRecord) -> LegacyRecordResponse {
    LegacyRecordResponse {
        id: record.id.clone(),
        filename: record.file_name.clone(),
        checksum: record.checksum.to_hex(),
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
    }
}
