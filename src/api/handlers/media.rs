use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{parse_type, read_upload};
use crate::api::response::{ApiError, AppJson, AppQuery, JSend, Page};
use crate::service::{MediaMetadata, StoredMedia};
use crate::storage::models::{Media, MediaType};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file_url: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub filename: String,
    pub checksum: String,
}

#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    pub filename: String,
    pub download_url: String,
    pub file_size: u64,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct MediaResponse {
    pub id: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub checksum: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TypeParams {
    #[serde(rename = "type")]
    pub media_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMediaParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default, rename = "type")]
    pub media_type: Option<String>,
}

fn default_limit() -> u32 {
    50
}

/// Signed so negative values get a clear message instead of a parse error.
#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    pub filename: String,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub old_filename: String,
    pub new_filename: String,
    #[serde(rename = "type")]
    pub media_type: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn upload_media(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    let upload = read_upload(multipart, "file", state.config.max_upload_size).await?;
    let stored = state.media.upload(&upload.file_name, upload.data).await?;
    Ok(JSend::success(upload_response(stored)))
}

pub async fn get_metadata(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    AppQuery(params): AppQuery<TypeParams>,
) -> Result<Json<JSend<MetadataResponse>>, ApiError> {
    let media_type = parse_type(&params.media_type)?;
    let metadata = state.media.metadata(&filename, media_type).await?;
    Ok(JSend::success(metadata_response(metadata)))
}

pub async fn resize_image(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<ResizeRequest>,
) -> Result<Json<JSend<MediaResponse>>, ApiError> {
    let (width, height) = match (u32::try_from(req.width), u32::try_from(req.height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(ApiError::bad_request(
                "width and height must be positive integers",
            ))
        }
    };
    let media = state.media.resize(&req.filename, width, height).await?;
    Ok(JSend::success(media_response(&media)))
}

pub async fn rename_media(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<RenameRequest>,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    let media_type = parse_type(&req.media_type)?;
    let stored = state
        .media
        .rename(media_type, &req.old_filename, &req.new_filename)
        .await?;
    Ok(JSend::success(upload_response(stored)))
}

pub async fn delete_media(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    AppQuery(params): AppQuery<TypeParams>,
) -> Result<Json<JSend<DeleteResponse>>, ApiError> {
    let media_type = parse_type(&params.media_type)?;
    let outcome = state.media.delete(&filename, media_type).await?;
    Ok(JSend::success(DeleteResponse {
        filename: outcome.media.file_name,
        warning: outcome.warning,
    }))
}

pub async fn list_media(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<ListMediaParams>,
) -> Result<Json<JSend<Page<MediaResponse>>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }
    let media_type = params.media_type.as_deref().map(parse_type).transpose()?;

    let media = state.media.list(media_type)?;
    Ok(JSend::success(Page::window(
        &media,
        params.limit,
        params.offset,
        media_response,
    )))
}

/// Serve a stored file by its storage key.
/// Route: GET /files/*key
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    // Hidden segments cover `..` and the staging area.
    if key.split('/').any(|part| part.is_empty() || part.starts_with('.')) {
        return Err(ApiError::not_found("File not found"));
    }
    let data = state.media.read(&key).await?;

    let file_name = key.rsplit('/').next().unwrap_or(&key);
    let mime_type = mime_guess::from_path(file_name).first_or_octet_stream();

    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        mime_type
            .essence_str()
            .parse()
            .unwrap_or(header::HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = format!("inline; filename=\"{file_name}\"").parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

// ============================================================================
// Helpers
// ============================================================================

fn upload_response(stored: StoredMedia) -> UploadResponse {
    UploadResponse {
        file_url: stored.url,
        media_type: stored.media.media_type,
        filename: stored.media.file_name,
        checksum: stored.media.checksum.to_hex(),
    }
}

fn metadata_response(metadata: MediaMetadata) -> MetadataResponse {
    MetadataResponse {
        filename: metadata.media.file_name,
        download_url: metadata.download_url,
        file_size: metadata.file_size,
        media_type: metadata.media.media_type,
        width: metadata.media.width,
        height: metadata.media.height,
    }
}

pub(super) fn media_response(media: &Media) -> MediaResponse {
    MediaResponse {
        id: media.id.clone(),
        filename: media.file_name.clone(),
        media_type: media.media_type,
        checksum: media.checksum.to_hex(),
        width: media.width,
        height: media.height,
        created_at: media.created_at.to_rfc3339(),
        updated_at: media.updated_at.to_rfc3339(),
    }
}
