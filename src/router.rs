//! Maps media records to storage keys and on-disk directories.
//!
//! Keys are relative to the storage root:
//! - unified uploads: `media/<checksum>/<file_name>`
//! - legacy-compatible uploads: `images/<file_name>` or `docs/<file_name>`
//! - in-flight uploads: `.staging/<uuid>`

use std::path::{Path, PathBuf};

use crate::error::MediaError;
use crate::storage::models::{LegacyKind, Media, MediaType};

pub const UNIFIED_DIR: &str = "media";
pub const IMAGES_DIR: &str = "images";
pub const DOCS_DIR: &str = "docs";
pub const STAGING_DIR: &str = ".staging";

const MAX_FILE_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Unified,
    Legacy,
}

#[derive(Debug, Clone)]
pub struct DirectoryRouter {
    root: PathBuf,
    base_url: String,
}

impl DirectoryRouter {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Top-level directory for a type in the given mode. Legacy mode only
    /// knows images and documents.
    pub fn directory(media_type: MediaType, mode: StorageMode) -> Result<&'static str, MediaError> {
        match mode {
            StorageMode::Unified => Ok(UNIFIED_DIR),
            StorageMode::Legacy => match LegacyKind::from_media_type(media_type) {
                Some(LegacyKind::Image) => Ok(IMAGES_DIR),
                Some(LegacyKind::Doc) => Ok(DOCS_DIR),
                None => Err(MediaError::Validation(format!(
                    "{media_type} files have no legacy storage directory"
                ))),
            },
        }
    }

    pub fn object_key(&self, media: &Media, mode: StorageMode) -> Result<String, MediaError> {
        Self::key_for(media, &media.file_name, mode)
    }

    /// Key the record would have under `file_name`, used to plan renames.
    pub fn key_for(media: &Media, file_name: &str, mode: StorageMode) -> Result<String, MediaError> {
        let dir = Self::directory(media.media_type, mode)?;
        Ok(match mode {
            StorageMode::Unified => format!("{dir}/{}/{file_name}", media.checksum.to_hex()),
            StorageMode::Legacy => format!("{dir}/{file_name}"),
        })
    }

    /// Every key a record's file may live under, most specific first. Rows
    /// carried over by the migration keep their files in the legacy
    /// directories.
    pub fn candidate_keys(&self, media: &Media) -> Vec<(StorageMode, String)> {
        [StorageMode::Unified, StorageMode::Legacy]
            .into_iter()
            .filter_map(|mode| self.object_key(media, mode).ok().map(|key| (mode, key)))
            .collect()
    }

    pub fn staging_key(&self) -> String {
        format!("{STAGING_DIR}/{}", uuid::Uuid::new_v4())
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Create the parent directory of `key` if it does not exist yet.
    pub async fn ensure_parent(&self, key: &str) -> std::io::Result<PathBuf> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(path)
    }

    pub fn download_url(&self, key: &str) -> String {
        format!("{}/files/{key}", self.base_url)
    }
}

/// Reject names that could escape their directory or that the file system
/// would mangle.
pub fn validate_file_name(file_name: &str) -> Result<(), MediaError> {
    if file_name.trim().is_empty() {
        return Err(MediaError::Validation("filename must not be empty".into()));
    }
    if file_name.len() > MAX_FILE_NAME_LEN {
        return Err(MediaError::Validation(format!(
            "filename exceeds {MAX_FILE_NAME_LEN} bytes"
        )));
    }
    if file_name.starts_with('.')
        || file_name.contains(['/', '\\'])
        || file_name.chars().any(char::is_control)
    {
        return Err(MediaError::Validation(format!(
            "invalid filename '{file_name}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::Checksum;

    fn router() -> DirectoryRouter {
        DirectoryRouter::new("/srv/store", "http://localhost:8080/")
    }

    #[test]
    fn unified_keys_are_sharded_by_checksum() {
        let media = Media::new("a.png", Checksum::compute(b"a"), MediaType::Image, None);
        let key = router().object_key(&media, StorageMode::Unified).unwrap();
        assert_eq!(key, format!("media/{}/a.png", media.checksum.to_hex()));
    }

    #[test]
    fn legacy_keys_use_type_directories() {
        let img = Media::new("a.png", Checksum::compute(b"a"), MediaType::Image, None);
        let doc = Media::new("a.pdf", Checksum::compute(b"b"), MediaType::Document, None);
        let r = router();
        assert_eq!(r.object_key(&img, StorageMode::Legacy).unwrap(), "images/a.png");
        assert_eq!(r.object_key(&doc, StorageMode::Legacy).unwrap(), "docs/a.pdf");
    }

    #[test]
    fn video_has_no_legacy_directory() {
        let video = Media::new("a.mp4", Checksum::compute(b"v"), MediaType::Video, None);
        assert!(router().object_key(&video, StorageMode::Legacy).is_err());
        assert_eq!(router().candidate_keys(&video).len(), 1);
    }

    #[test]
    fn download_url_trims_trailing_slash() {
        assert_eq!(
            router().download_url("images/a.png"),
            "http://localhost:8080/files/images/a.png"
        );
    }

    #[test]
    fn file_name_validation() {
        assert!(validate_file_name("photo.png").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("../etc/passwd").is_err());
        assert!(validate_file_name("a/b.png").is_err());
        assert!(validate_file_name(".hidden").is_err());
        assert!(validate_file_name(&"x".repeat(300)).is_err());
    }

    #[tokio::test]
    async fn ensure_parent_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let r = DirectoryRouter::new(dir.path(), "");
        let path = r.ensure_parent("images/a.png").await.unwrap();
        r.ensure_parent("images/a.png").await.unwrap();
        assert!(path.parent().unwrap().is_dir());
    }
}
