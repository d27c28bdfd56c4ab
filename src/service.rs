//! Request-level media operations: each call classifies, checks for
//! duplicates, moves bytes through the object store and keeps the unified
//! table in step with what is on disk.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::cas::{ensure_unique, Checksum, DuplicatePolicy};
use crate::classify::TypeClassifier;
use crate::error::MediaError;
use crate::imaging::ImageProcessor;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::router::{validate_file_name, DirectoryRouter, StorageMode};
use crate::storage::models::{LegacyKind, LegacyRecord, Media, MediaType};
use crate::storage::Database;

/// A record together with the key and URL of its stored file
#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub media: Media,
    pub key: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct MediaMetadata {
    pub media: Media,
    pub download_url: String,
    pub file_size: u64,
}

#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub media: Media,
    /// Set when the row was removed but the file could not be.
    pub warning: Option<String>,
}

#[derive(Clone)]
pub struct MediaService {
    db: Database,
    store: Arc<dyn ObjectStore>,
    router: DirectoryRouter,
    classifier: TypeClassifier,
    processor: ImageProcessor,
}

impl MediaService {
    pub fn new(db: Database, store: Arc<dyn ObjectStore>, router: DirectoryRouter) -> Self {
        Self {
            db,
            store,
            router,
            classifier: TypeClassifier::new(),
            processor: ImageProcessor::new(),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn router(&self) -> &DirectoryRouter {
        &self.router
    }

    // ========================================================================
    // Upload
    // ========================================================================

    /// Unified upload: any supported type, shared file names allowed as long
    /// as the content differs.
    pub async fn upload(&self, file_name: &str, data: Bytes) -> Result<StoredMedia, MediaError> {
        let media = self.prepare(file_name, &data, None, DuplicatePolicy::ContentOnly)?;
        let key = self.router.object_key(&media, StorageMode::Unified)?;
        let staging = self.stage(data).await?;

        if let Err(e) = self.db.add_media(&media) {
            self.discard(&staging).await;
            return Err(e.into());
        }
        self.commit_file(&media, &staging, &key).await?;

        info!(
            file_name = %media.file_name,
            checksum = %media.checksum,
            media_type = %media.media_type,
            key = %key,
            "Stored media"
        );
        Ok(self.stored(media, key))
    }

    /// Legacy-compatible upload: the content must classify as `kind` and the
    /// file name must be unused within that kind.
    pub async fn upload_legacy(
        &self,
        kind: LegacyKind,
        file_name: &str,
        data: Bytes,
    ) -> Result<StoredMedia, MediaError> {
        let prepared = self.prepare(file_name, &data, Some(kind), DuplicatePolicy::ContentAndName)?;
        let key = self.router.object_key(&prepared, StorageMode::Legacy)?;
        let staging = self.stage(data).await?;

        let record = LegacyRecord::new(&prepared.file_name, prepared.checksum);
        let added = match kind {
            LegacyKind::Image => self.db.add_image(&record),
            LegacyKind::Doc => self.db.add_doc(&record),
        };
        let added = match added {
            Ok(added) => added,
            Err(e) => {
                self.discard(&staging).await;
                return Err(e.into());
            }
        };

        let mut media = Media {
            id: added.id,
            created_at: added.created_at,
            updated_at: added.updated_at,
            ..prepared
        };
        if let Some((width, height)) = media.dimensions() {
            if let Err(e) = self.db.update_image_dimensions(&media.id, width, height) {
                warn!(file_name = %media.file_name, error = %e, "Failed to record image dimensions");
                media.width = None;
                media.height = None;
            }
        }
        self.commit_file(&media, &staging, &key).await?;

        info!(
            file_name = %media.file_name,
            checksum = %media.checksum,
            kind = %kind,
            key = %key,
            "Stored legacy media"
        );
        Ok(self.stored(media, key))
    }

    /// Validate, classify and checksum an upload, and run the duplicate
    /// pre-check. No side effects.
    fn prepare(
        &self,
        file_name: &str,
        data: &[u8],
        expected: Option<LegacyKind>,
        policy: DuplicatePolicy,
    ) -> Result<Media, MediaError> {
        validate_file_name(file_name)?;
        if data.is_empty() {
            return Err(MediaError::Validation("file must not be empty".into()));
        }

        let classification = self.classifier.classify(data, file_name)?;
        if let Some(kind) = expected {
            if classification.media_type != kind.media_type() {
                return Err(MediaError::Validation(format!(
                    "invalid {kind} type: {} is a {}",
                    classification.mime_type, classification.media_type
                )));
            }
        }

        let checksum = Checksum::compute(data);
        debug!(
            file_name,
            mime = %classification.mime_type,
            source = ?classification.source,
            %checksum,
            "Prepared upload"
        );
        ensure_unique(&self.db, &checksum, file_name, classification.media_type, policy)?;

        let dimensions = match classification.media_type {
            MediaType::Image => ImageProcessor::dimensions(data),
            _ => None,
        };
        Ok(Media::new(file_name, checksum, classification.media_type, dimensions))
    }

    /// Write the bytes to a private staging key. Nothing refers to it until
    /// the row commits.
    async fn stage(&self, data: Bytes) -> Result<String, MediaError> {
        let staging = self.router.staging_key();
        self.router
            .ensure_parent(&staging)
            .await
            .map_err(ObjectStoreError::from)?;
        self.store.put(&staging, data).await?;
        Ok(staging)
    }

    /// Move a staged file into place after its row committed. On failure the
    /// row is removed again so neither side is left dangling.
    async fn commit_file(&self, media: &Media, staging: &str, key: &str) -> Result<(), MediaError> {
        if let Err(e) = self.place(staging, key).await {
            error!(file_name = %media.file_name, error = %e, "Failed to place file, removing row");
            if let Err(db_err) = self.db.delete_media(&media.id) {
                error!(media_id = %media.id, error = %db_err, "Row left without a file");
            }
            self.discard(staging).await;
            return Err(e);
        }
        Ok(())
    }

    async fn place(&self, from: &str, to: &str) -> Result<(), MediaError> {
        self.router
            .ensure_parent(to)
            .await
            .map_err(ObjectStoreError::from)?;
        self.store.rename(from, to).await?;
        Ok(())
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(key, error = %e, "Failed to remove staged file");
        }
    }

    fn stored(&self, media: Media, key: String) -> StoredMedia {
        StoredMedia {
            url: self.router.download_url(&key),
            media,
            key,
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Find the stored file of a record, checking the unified location first
    /// and then the legacy directory for its type.
    pub async fn locate(&self, media: &Media) -> Result<Option<(StorageMode, String)>, MediaError> {
        for (mode, key) in self.router.candidate_keys(media) {
            if self.store.exists(&key).await? {
                return Ok(Some((mode, key)));
            }
        }
        Ok(None)
    }

    async fn locate_or_missing(&self, media: &Media) -> Result<(StorageMode, String), MediaError> {
        self.locate(media).await?.ok_or_else(|| {
            MediaError::NotFound(format!("file for '{}' is missing from storage", media.file_name))
        })
    }

    fn find(&self, file_name: &str, media_type: MediaType) -> Result<Media, MediaError> {
        self.db
            .get_media_by_file_name_and_type(file_name, media_type)?
            .ok_or_else(|| MediaError::NotFound(format!("{media_type} '{file_name}' not found")))
    }

    /// Look up by name, rejecting a requested type that differs from the
    /// stored one.
    fn find_typed(&self, file_name: &str, media_type: MediaType) -> Result<Media, MediaError> {
        if let Some(media) = self.db.get_media_by_file_name_and_type(file_name, media_type)? {
            return Ok(media);
        }
        match self.db.get_media_by_file_name(file_name)? {
            Some(other) => Err(MediaError::Validation(format!(
                "type mismatch for '{file_name}': requested {media_type}, stored {}",
                other.media_type
            ))),
            None => Err(MediaError::NotFound(format!("'{file_name}' not found"))),
        }
    }

    pub async fn metadata(
        &self,
        file_name: &str,
        media_type: MediaType,
    ) -> Result<MediaMetadata, MediaError> {
        let media = self.find_typed(file_name, media_type)?;
        let (_, key) = self.locate_or_missing(&media).await?;
        let file_size = self.store.size(&key).await?;
        Ok(MediaMetadata {
            download_url: self.router.download_url(&key),
            file_size,
            media,
        })
    }

    pub fn list(&self, media_type: Option<MediaType>) -> Result<Vec<Media>, MediaError> {
        Ok(match media_type {
            Some(t) => self.db.get_media_by_type(t)?,
            None => self.db.get_all_media()?,
        })
    }

    pub async fn read(&self, key: &str) -> Result<Bytes, MediaError> {
        match self.store.get(key).await {
            Ok(data) => Ok(data),
            Err(ObjectStoreError::NotFound(_) | ObjectStoreError::InvalidKey(_)) => {
                Err(MediaError::NotFound(format!("'{key}' not found")))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Resize a stored image in place to exactly `width`×`height`. The original
    /// resolution is not retained.
    pub async fn resize(&self, file_name: &str, width: u32, height: u32) -> Result<Media, MediaError> {
        if width == 0 || height == 0 {
            return Err(MediaError::Validation(
                "width and height must be positive integers".into(),
            ));
        }

        let media = match self.db.get_media_by_file_name_and_type(file_name, MediaType::Image)? {
            Some(media) => media,
            None => {
                return Err(match self.db.get_media_by_file_name(file_name)? {
                    Some(_) => MediaError::NotResizable(file_name.to_string()),
                    None => MediaError::NotFound(format!("'{file_name}' not found")),
                })
            }
        };
        let format = ImageProcessor::output_format(&media.file_name)?;
        let (_, key) = self.locate_or_missing(&media).await?;
        let original = self.store.get(&key).await?;

        let processor = self.processor.clone();
        let resized = tokio::task::spawn_blocking(move || {
            processor.resize(&original, format, width, height)
        })
        .await
        .map_err(|e| MediaError::Internal(format!("resize task failed: {e}")))??;

        // Replace the file atomically: stage, then rename over the old key.
        let staging = self.stage(Bytes::from(resized)).await?;
        if let Err(e) = self.store.rename(&staging, &key).await {
            self.discard(&staging).await;
            return Err(e.into());
        }

        if let Err(e) = self.db.update_image_dimensions(&media.id, width, height) {
            warn!(
                file_name,
                error = %e,
                "File resized but dimensions were not recorded"
            );
            return Err(e.into());
        }

        info!(file_name, width, height, "Resized image");
        self.db
            .get_media(&media.id)?
            .ok_or_else(|| MediaError::NotFound(format!("'{file_name}' not found after resize")))
    }

    /// Rename a record and its file on the unified path.
    pub async fn rename(
        &self,
        media_type: MediaType,
        old_name: &str,
        new_name: &str,
    ) -> Result<StoredMedia, MediaError> {
        self.rename_with(media_type, old_name, new_name, None).await
    }

    /// Rename through the legacy-shaped adapters.
    pub async fn rename_legacy(
        &self,
        kind: LegacyKind,
        old_name: &str,
        new_name: &str,
    ) -> Result<StoredMedia, MediaError> {
        self.rename_with(kind.media_type(), old_name, new_name, Some(kind))
            .await
    }

    async fn rename_with(
        &self,
        media_type: MediaType,
        old_name: &str,
        new_name: &str,
        legacy: Option<LegacyKind>,
    ) -> Result<StoredMedia, MediaError> {
        validate_file_name(new_name)?;
        let media = self.find(old_name, media_type)?;
        let (mode, old_key) = self.locate_or_missing(&media).await?;
        if old_name == new_name {
            return Ok(self.stored(media, old_key));
        }

        if let Some(existing) = self.db.get_media_by_file_name_and_type(new_name, media_type)? {
            return Err(MediaError::Conflict {
                message: format!("{media_type} named '{new_name}' already exists"),
                existing_file: existing.file_name,
            });
        }
        let new_key = DirectoryRouter::key_for(&media, new_name, mode)?;
        if self.store.exists(&new_key).await? {
            return Err(MediaError::Conflict {
                message: format!("a file already exists at '{new_key}'"),
                existing_file: new_name.to_string(),
            });
        }

        self.place(&old_key, &new_key).await?;
        let renamed = match legacy {
            Some(LegacyKind::Image) => self.db.rename_image(old_name, new_name),
            Some(LegacyKind::Doc) => self.db.rename_doc(old_name, new_name),
            None => self.db.rename_media(&media.id, new_name),
        };
        match renamed {
            Ok(true) => {}
            outcome => {
                if let Err(e) = self.store.rename(&new_key, &old_key).await {
                    error!(from = %new_key, to = %old_key, error = %e, "Failed to undo file rename");
                }
                return Err(match outcome {
                    Err(e) => e.into(),
                    _ => MediaError::NotFound(format!("'{old_name}' not found")),
                });
            }
        }

        info!(old_name, new_name, media_type = %media_type, "Renamed media");
        let media = self
            .db
            .get_media(&media.id)?
            .ok_or_else(|| MediaError::NotFound(format!("'{new_name}' not found after rename")))?;
        Ok(self.stored(media, new_key))
    }

    /// Delete the row, then the file. A file that cannot be removed after the
    /// row is gone is reported as a warning.
    pub async fn delete(&self, file_name: &str, media_type: MediaType) -> Result<DeleteOutcome, MediaError> {
        let media = self.find(file_name, media_type)?;
        let location = self.locate(&media).await?;
        if self.db.delete_media(&media.id)?.is_none() {
            return Err(MediaError::NotFound(format!("'{file_name}' not found")));
        }
        Ok(self.finish_delete(media, location).await)
    }

    pub async fn delete_legacy(&self, kind: LegacyKind, file_name: &str) -> Result<DeleteOutcome, MediaError> {
        let media = self.find(file_name, kind.media_type())?;
        let location = self.locate(&media).await?;
        let deleted = match kind {
            LegacyKind::Image => self.db.delete_image(file_name)?,
            LegacyKind::Doc => self.db.delete_doc(file_name)?,
        };
        if !deleted {
            return Err(MediaError::NotFound(format!("{kind} '{file_name}' not found")));
        }
        Ok(self.finish_delete(media, location).await)
    }

    async fn finish_delete(&self, media: Media, location: Option<(StorageMode, String)>) -> DeleteOutcome {
        let warning = match location {
            None => Some(format!("file for '{}' was already missing", media.file_name)),
            Some((_, key)) => match self.store.delete(&key).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(key = %key, error = %e, "Row deleted but file removal failed");
                    Some(format!("record deleted but file '{key}' could not be removed: {e}"))
                }
            },
        };
        info!(file_name = %media.file_name, media_type = %media.media_type, "Deleted media");
        DeleteOutcome { media, warning }
    }
}
