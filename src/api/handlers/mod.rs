mod admin;
mod legacy;
mod media;

use axum::extract::Multipart;
use bytes::Bytes;

use crate::api::response::ApiError;
use crate::error::MediaError;
use crate::storage::models::MediaType;

pub use admin::{health, migration_status};
pub use legacy::{
    delete_doc, delete_image, list_docs, list_images, rename_doc, rename_image, upload_doc,
    upload_image,
};
pub use media::{
    delete_media, download_file, get_metadata, list_media, rename_media, resize_image,
    upload_media,
};

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::Validation(msg) => ApiError::bad_request(msg),
            MediaError::Conflict {
                message,
                existing_file,
            } => ApiError::conflict(message, existing_file),
            MediaError::NotFound(msg) => ApiError::not_found(msg),
            e @ MediaError::NotResizable(_) => ApiError::unprocessable(e.to_string()),
            e @ (MediaError::Io(_) | MediaError::Database(_) | MediaError::Internal(_)) => {
                tracing::error!(error = %e, "Request failed");
                ApiError::internal(e.to_string())
            }
        }
    }
}

/// Parse the `type` query parameter.
fn parse_type(value: &str) -> Result<MediaType, ApiError> {
    MediaType::parse(value).ok_or_else(|| {
        ApiError::bad_request(format!(
            "invalid type '{value}', expected one of: audio, document, image, video"
        ))
    })
}

/// An uploaded file pulled out of a multipart body.
struct Upload {
    file_name: String,
    data: Bytes,
}

/// Read the file part named `file_field` and, if present, a text part named
/// `filename` overriding the client-supplied name.
async fn read_upload(
    mut multipart: Multipart,
    file_field: &str,
    max_upload_size: u64,
) -> Result<Upload, ApiError> {
    let mut data: Option<Bytes> = None;
    let mut client_name: Option<String> = None;
    let mut override_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        if field_name == file_field {
            client_name = field.file_name().map(|s| s.to_string());
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;

            if bytes.len() as u64 > max_upload_size {
                return Err(ApiError::payload_too_large(format!(
                    "File exceeds maximum upload size of {max_upload_size} bytes"
                )));
            }
            data = Some(bytes);
        } else if field_name == "filename" {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request(format!("Invalid filename: {e}")))?;
            if !text.trim().is_empty() {
                override_name = Some(text.trim().to_string());
            }
        }
    }

    let data = data.ok_or_else(|| ApiError::bad_request(format!("{file_field} field is required")))?;
    let file_name = override_name
        .or(client_name)
        .ok_or_else(|| ApiError::bad_request("filename is required"))?;
    Ok(Upload { file_name, data })
}
