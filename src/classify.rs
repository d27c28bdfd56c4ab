//! Media type classification from leading bytes, with the file extension as
//! a fallback for content the sniffer cannot place.

use thiserror::Error;

use crate::storage::models::MediaType;

/// Number of leading bytes inspected by the sniffer.
pub const SNIFF_LEN: usize = 512;

const GENERIC_MIME: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("unsupported file type for '{file_name}' (detected {detected})")]
    Unsupported { file_name: String, detected: String },
}

/// How the MIME type was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeSource {
    Sniffed,
    Extension,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub mime_type: String,
    pub media_type: MediaType,
    pub source: MimeSource,
}

#[derive(Debug, Clone, Default)]
pub struct TypeClassifier;

impl TypeClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify an upload from its first bytes and its file name.
    ///
    /// The sniffed type wins when it is specific and supported. Generic or
    /// unsupported sniff results (zip containers such as docx, plain text
    /// which has no magic number) fall back to the extension table.
    pub fn classify(&self, data: &[u8], file_name: &str) -> Result<Classification, ClassifyError> {
        let prefix = &data[..data.len().min(SNIFF_LEN)];
        let sniffed = infer::get(prefix).map(|t| t.mime_type().to_string());

        if let Some(ref mime) = sniffed {
            if mime != GENERIC_MIME {
                if let Some(media_type) = MediaType::from_mime(mime) {
                    tracing::debug!(file_name, mime = %mime, %media_type, "Classified by content");
                    return Ok(Classification {
                        mime_type: mime.clone(),
                        media_type,
                        source: MimeSource::Sniffed,
                    });
                }
            }
        }

        let guessed = mime_guess::from_path(file_name).first();
        if let Some(mime) = guessed {
            let mime = mime.essence_str().to_string();
            if let Some(media_type) = MediaType::from_mime(&mime) {
                tracing::debug!(
                    file_name,
                    sniffed = sniffed.as_deref().unwrap_or("none"),
                    mime = %mime,
                    %media_type,
                    fallback = true,
                    "Classified by extension"
                );
                return Ok(Classification {
                    mime_type: mime,
                    media_type,
                    source: MimeSource::Extension,
                });
            }
        }

        Err(ClassifyError::Unsupported {
            file_name: file_name.to_string(),
            detected: sniffed.unwrap_or_else(|| GENERIC_MIME.to_string()),
        })
    }
}
