use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cas::Checksum;

/// Logical classification of a stored media file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Document,
    Image,
    Video,
}

impl MediaType {
    pub const ALL: [MediaType; 4] = [
        MediaType::Audio,
        MediaType::Document,
        MediaType::Image,
        MediaType::Video,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Document => "document",
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }

    /// Parse the wire name of a media type. Accepts `doc` as an alias for `document`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "audio" => Some(MediaType::Audio),
            "document" | "doc" => Some(MediaType::Document),
            "image" => Some(MediaType::Image),
            "video" => Some(MediaType::Video),
            _ => None,
        }
    }

    /// Derive a media type from a MIME type string. Returns `None` for MIME
    /// types outside the supported set.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        let (primary, sub) = mime_type.split_once('/')?;
        let sub = sub.split(';').next().unwrap_or("").trim();
        match primary {
            "audio" => Some(MediaType::Audio),
            "image" => Some(MediaType::Image),
            "video" => Some(MediaType::Video),
            "text" => match sub {
                "plain" | "markdown" | "x-markdown" | "csv" | "rtf" | "html" => {
                    Some(MediaType::Document)
                }
                _ => None,
            },
            "application" => match sub {
                "pdf"
                | "msword"
                | "rtf"
                | "epub+zip"
                | "vnd.oasis.opendocument.text"
                | "vnd.oasis.opendocument.spreadsheet"
                | "vnd.oasis.opendocument.presentation"
                | "vnd.openxmlformats-officedocument.wordprocessingml.document"
                | "vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                | "vnd.openxmlformats-officedocument.presentationml.presentation"
                | "vnd.ms-excel"
                | "vnd.ms-powerpoint" => Some(MediaType::Document),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two pre-unification record kinds, each with its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegacyKind {
    Image,
    Doc,
}

impl LegacyKind {
    pub const ALL: [LegacyKind; 2] = [LegacyKind::Image, LegacyKind::Doc];

    /// The unified type a legacy row of this kind converts to.
    pub fn media_type(&self) -> MediaType {
        match self {
            LegacyKind::Image => MediaType::Image,
            LegacyKind::Doc => MediaType::Document,
        }
    }

    pub fn from_media_type(media_type: MediaType) -> Option<Self> {
        match media_type {
            MediaType::Image => Some(LegacyKind::Image),
            MediaType::Document => Some(LegacyKind::Doc),
            MediaType::Audio | MediaType::Video => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LegacyKind::Image => "image",
            LegacyKind::Doc => "doc",
        }
    }
}

impl fmt::Display for LegacyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unified media record stored in redb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub id: String,
    pub file_name: String,
    pub checksum: Checksum,
    pub media_type: MediaType,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Media {
    /// Build a fresh record. Dimensions are dropped for non-image types.
    pub fn new(
        file_name: impl Into<String>,
        checksum: Checksum,
        media_type: MediaType,
        dimensions: Option<(u32, u32)>,
    ) -> Self {
        let now = Utc::now();
        let (width, height) = match (media_type, dimensions) {
            (MediaType::Image, Some((w, h))) => (Some(w), Some(h)),
            _ => (None, None),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_name: file_name.into(),
            checksum,
            media_type,
            width,
            height,
            created_at: now,
            updated_at: now,
        }
    }

    /// Convert a legacy row. Every field is copied except the id, which is
    /// regenerated so rows from both legacy tables can share one keyspace.
    pub fn from_legacy(record: &LegacyRecord, kind: LegacyKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_name: record.file_name.clone(),
            checksum: record.checksum,
            media_type: kind.media_type(),
            width: None,
            height: None,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    /// Reshape into the legacy image/doc shape for backward-compatible callers.
    pub fn to_legacy(&self) -> LegacyRecord {
        LegacyRecord {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            checksum: self.checksum,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }
}

/// A legacy image or document record. Same shape as [`Media`] minus the type
/// discriminator and the image-only fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyRecord {
    pub id: String,
    pub file_name: String,
    pub checksum: Checksum,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LegacyRecord {
    pub fn new(file_name: impl Into<String>, checksum: Checksum) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_name: file_name.into(),
            checksum,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Completed,
}

/// Marker row written at the end of a successful unification migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub name: String,
    pub status: MigrationStatus,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub images_migrated: u64,
    #[serde(default)]
    pub docs_migrated: u64,
    #[serde(default)]
    pub already_present: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_from_mime() {
        assert_eq!(MediaType::from_mime("image/png"), Some(MediaType::Image));
        assert_eq!(MediaType::from_mime("IMAGE/JPEG"), Some(MediaType::Image));
        assert_eq!(MediaType::from_mime("video/mp4"), Some(MediaType::Video));
        assert_eq!(MediaType::from_mime("audio/mpeg"), Some(MediaType::Audio));
        assert_eq!(
            MediaType::from_mime("application/pdf"),
            Some(MediaType::Document)
        );
        assert_eq!(
            MediaType::from_mime("text/plain; charset=utf-8"),
            Some(MediaType::Document)
        );
        assert_eq!(MediaType::from_mime("application/octet-stream"), None);
        assert_eq!(MediaType::from_mime("application/zip"), None);
        assert_eq!(MediaType::from_mime("garbage"), None);
    }

    #[test]
    fn media_type_parse_accepts_doc_alias() {
        assert_eq!(MediaType::parse("doc"), Some(MediaType::Document));
        assert_eq!(MediaType::parse(" Image "), Some(MediaType::Image));
        assert_eq!(MediaType::parse("binary"), None);
    }

    #[test]
    fn non_image_media_drops_dimensions() {
        let doc = Media::new(
            "a.pdf",
            Checksum::compute(b"pdf"),
            MediaType::Document,
            Some((10, 10)),
        );
        assert_eq!(doc.dimensions(), None);

        let img = Media::new(
            "a.png",
            Checksum::compute(b"png"),
            MediaType::Image,
            Some((10, 20)),
        );
        assert_eq!(img.dimensions(), Some((10, 20)));
    }

    #[test]
    fn from_legacy_assigns_fresh_id_and_copies_fields() {
        let legacy = LegacyRecord::new("cat.png", Checksum::compute(b"cat"));
        let media = Media::from_legacy(&legacy, LegacyKind::Image);

        assert_ne!(media.id, legacy.id);
        assert_eq!(media.file_name, legacy.file_name);
        assert_eq!(media.checksum, legacy.checksum);
        assert_eq!(media.created_at, legacy.created_at);
        assert_eq!(media.updated_at, legacy.updated_at);
        assert_eq!(media.media_type, MediaType::Image);
        assert_eq!(media.dimensions(), None);

        let doc = Media::from_legacy(&legacy, LegacyKind::Doc);
        assert_eq!(doc.media_type, MediaType::Document);
    }
}
