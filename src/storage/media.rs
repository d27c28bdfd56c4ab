use chrono::Utc;
use redb::{ReadableTable, Table, WriteTransaction};
use serde::de::DeserializeOwned;

use super::db::{open_optional, Database, DatabaseError};
use super::models::{LegacyKind, LegacyRecord, Media, MediaType};
use super::tables::*;
use crate::cas::Checksum;

/// How an insert treats an existing record of the same type with the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamePolicy {
    AllowShared,
    RejectDuplicate,
}

/// Decode every msgpack value of a uuid-keyed table.
pub(crate) fn decode_rows<R, T>(table: &T) -> Result<Vec<R>, DatabaseError>
where
    R: DeserializeOwned,
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut rows = Vec::new();
    for result in table.iter()? {
        let (_, value) = result?;
        rows.push(rmp_serde::from_slice(value.value())?);
    }
    Ok(rows)
}

/// Pick the oldest record carrying `file_name` (and `media_type`, when given).
fn oldest_named(
    rows: Vec<Media>,
    file_name: &str,
    media_type: Option<MediaType>,
) -> Option<Media> {
    rows.into_iter()
        .filter(|m| m.file_name == file_name)
        .filter(|m| media_type.map_or(true, |t| m.media_type == t))
        .min_by_key(|m| m.created_at)
}

/// The unified table and its checksum index, opened together inside one
/// write transaction.
pub(crate) struct MediaTables<'txn> {
    media: Table<'txn, &'static str, &'static [u8]>,
    checksums: Table<'txn, &'static [u8], &'static str>,
}

impl<'txn> MediaTables<'txn> {
    pub(crate) fn open(txn: &'txn WriteTransaction) -> Result<Self, DatabaseError> {
        Ok(Self {
            media: txn.open_table(MEDIA)?,
            checksums: txn.open_table(MEDIA_CHECKSUMS)?,
        })
    }

    pub(crate) fn get(&self, id: &str) -> Result<Option<Media>, DatabaseError> {
        match self.media.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    pub(crate) fn find_by_checksum(
        &self,
        checksum: &Checksum,
    ) -> Result<Option<Media>, DatabaseError> {
        let id = match self.checksums.get(checksum.as_bytes().as_slice())? {
            Some(id) => id.value().to_string(),
            None => return Ok(None),
        };
        self.get(&id)
    }

    pub(crate) fn find_by_name(
        &self,
        file_name: &str,
        media_type: Option<MediaType>,
    ) -> Result<Option<Media>, DatabaseError> {
        Ok(oldest_named(decode_rows(&self.media)?, file_name, media_type))
    }

    /// Insert a new record, enforcing checksum uniqueness (always) and name
    /// uniqueness within the type (per `policy`).
    pub(crate) fn insert(&mut self, media: &Media, policy: NamePolicy) -> Result<(), DatabaseError> {
        debug_assert!(!media.id.is_empty(), "media id must not be empty");

        if let Some(existing) = self.find_by_checksum(&media.checksum)? {
            return Err(DatabaseError::DuplicateChecksum {
                existing_file: existing.file_name,
            });
        }
        if policy == NamePolicy::RejectDuplicate {
            if let Some(existing) = self.find_by_name(&media.file_name, Some(media.media_type))? {
                return Err(DatabaseError::DuplicateFileName {
                    existing_file: existing.file_name,
                });
            }
        }
        self.put(media)
    }

    fn put(&mut self, media: &Media) -> Result<(), DatabaseError> {
        let data = rmp_serde::to_vec_named(media)?;
        self.media.insert(media.id.as_str(), data.as_slice())?;
        self.checksums
            .insert(media.checksum.as_bytes().as_slice(), media.id.as_str())?;
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<Option<Media>, DatabaseError> {
        let existing = self.get(id)?;
        if let Some(ref media) = existing {
            self.media.remove(id)?;
            self.checksums.remove(media.checksum.as_bytes().as_slice())?;
        }
        Ok(existing)
    }

    fn rename(&mut self, id: &str, new_name: &str) -> Result<bool, DatabaseError> {
        let mut media = match self.get(id)? {
            Some(media) => media,
            None => return Ok(false),
        };
        if let Some(other) = self.find_by_name(new_name, Some(media.media_type))? {
            if other.id != media.id {
                return Err(DatabaseError::DuplicateFileName {
                    existing_file: other.file_name,
                });
            }
        }
        media.file_name = new_name.to_string();
        media.updated_at = Utc::now();
        self.put(&media)?;
        Ok(true)
    }
}

impl Database {
    // ========================================================================
    // Unified media operations
    // ========================================================================

    /// Run `f` against the unified tables in one write transaction, committing
    /// on success and aborting on error.
    fn write_media<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: for<'a> FnOnce(&mut MediaTables<'a>) -> Result<T, DatabaseError>,
    {
        let write_txn = self.begin_write()?;
        let result = {
            let mut tables = MediaTables::open(&write_txn)?;
            f(&mut tables)
        };
        match result {
            Ok(value) => {
                write_txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                write_txn.abort()?;
                Err(e)
            }
        }
    }

    /// Insert a media record. A record with the same checksum surfaces as
    /// [`DatabaseError::DuplicateChecksum`]; shared file names are allowed.
    pub fn add_media(&self, media: &Media) -> Result<(), DatabaseError> {
        self.insert_media(media, NamePolicy::AllowShared)
    }

    pub fn insert_media(&self, media: &Media, policy: NamePolicy) -> Result<(), DatabaseError> {
        self.write_media(|tables| tables.insert(media, policy))
    }

    pub fn get_media(&self, id: &str) -> Result<Option<Media>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let Some(table) = open_optional(&read_txn, MEDIA)? else {
            return Ok(None);
        };
        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_media_by_checksum(&self, checksum: &Checksum) -> Result<Option<Media>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let Some(index) = open_optional(&read_txn, MEDIA_CHECKSUMS)? else {
            return Ok(None);
        };
        let id = match index.get(checksum.as_bytes().as_slice())? {
            Some(id) => id.value().to_string(),
            None => return Ok(None),
        };
        let Some(table) = open_optional(&read_txn, MEDIA)? else {
            return Ok(None);
        };
        match table.get(id.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Oldest record with this file name, of any type.
    pub fn get_media_by_file_name(&self, file_name: &str) -> Result<Option<Media>, DatabaseError> {
        Ok(oldest_named(self.get_all_media()?, file_name, None))
    }

    pub fn get_media_by_file_name_and_type(
        &self,
        file_name: &str,
        media_type: MediaType,
    ) -> Result<Option<Media>, DatabaseError> {
        Ok(oldest_named(self.get_all_media()?, file_name, Some(media_type)))
    }

    pub fn get_media_by_type(&self, media_type: MediaType) -> Result<Vec<Media>, DatabaseError> {
        Ok(self
            .get_all_media()?
            .into_iter()
            .filter(|m| m.media_type == media_type)
            .collect())
    }

    /// All unified records, oldest first. Empty when the table does not exist.
    pub fn get_all_media(&self) -> Result<Vec<Media>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let Some(table) = open_optional(&read_txn, MEDIA)? else {
            return Ok(Vec::new());
        };
        let mut media: Vec<Media> = decode_rows(&table)?;
        media.sort_by_key(|m| m.created_at);
        Ok(media)
    }

    pub fn count_media(&self) -> Result<u64, DatabaseError> {
        let read_txn = self.begin_read()?;
        let Some(table) = open_optional(&read_txn, MEDIA)? else {
            return Ok(0);
        };
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Delete a record and its checksum index entry. Returns the removed record.
    pub fn delete_media(&self, id: &str) -> Result<Option<Media>, DatabaseError> {
        if self.get_media(id)?.is_none() {
            return Ok(None);
        }
        self.write_media(|tables| tables.remove(id))
    }

    /// Rename a record. Rejects with [`DatabaseError::DuplicateFileName`] if
    /// another record of the same type already carries `new_name`.
    pub fn rename_media(&self, id: &str, new_name: &str) -> Result<bool, DatabaseError> {
        if self.get_media(id)?.is_none() {
            return Ok(false);
        }
        self.write_media(|tables| tables.rename(id, new_name))
    }

    /// Record new pixel dimensions after a resize. Only images carry dimensions.
    pub fn update_image_dimensions(
        &self,
        id: &str,
        width: u32,
        height: u32,
    ) -> Result<bool, DatabaseError> {
        if width == 0 || height == 0 {
            return Err(DatabaseError::InvalidUpdate(format!(
                "dimensions must be positive, got {width}x{height}"
            )));
        }
        if self.get_media(id)?.is_none() {
            return Ok(false);
        }
        self.write_media(|tables| {
            let mut media = match tables.get(id)? {
                Some(media) => media,
                None => return Ok(false),
            };
            if media.media_type != MediaType::Image {
                return Err(DatabaseError::InvalidUpdate(format!(
                    "'{}' is a {}, only images carry dimensions",
                    media.file_name, media.media_type
                )));
            }
            media.width = Some(width);
            media.height = Some(height);
            media.updated_at = Utc::now();
            tables.put(&media)?;
            Ok(true)
        })
    }

    // ========================================================================
    // Legacy-shaped adapters over the unified table
    // ========================================================================

    pub fn add_image(&self, image: &LegacyRecord) -> Result<LegacyRecord, DatabaseError> {
        self.add_shaped(image, LegacyKind::Image)
    }

    pub fn add_doc(&self, doc: &LegacyRecord) -> Result<LegacyRecord, DatabaseError> {
        self.add_shaped(doc, LegacyKind::Doc)
    }

    pub fn get_image_by_checksum(
        &self,
        checksum: &Checksum,
    ) -> Result<Option<LegacyRecord>, DatabaseError> {
        self.get_shaped_by_checksum(checksum, LegacyKind::Image)
    }

    pub fn get_doc_by_checksum(
        &self,
        checksum: &Checksum,
    ) -> Result<Option<LegacyRecord>, DatabaseError> {
        self.get_shaped_by_checksum(checksum, LegacyKind::Doc)
    }

    pub fn get_all_images(&self) -> Result<Vec<LegacyRecord>, DatabaseError> {
        self.get_all_shaped(LegacyKind::Image)
    }

    pub fn get_all_docs(&self) -> Result<Vec<LegacyRecord>, DatabaseError> {
        self.get_all_shaped(LegacyKind::Doc)
    }

    pub fn delete_image(&self, file_name: &str) -> Result<bool, DatabaseError> {
        self.delete_shaped(file_name, LegacyKind::Image)
    }

    pub fn delete_doc(&self, file_name: &str) -> Result<bool, DatabaseError> {
        self.delete_shaped(file_name, LegacyKind::Doc)
    }

    pub fn rename_image(&self, old_name: &str, new_name: &str) -> Result<bool, DatabaseError> {
        self.rename_shaped(old_name, new_name, LegacyKind::Image)
    }

    pub fn rename_doc(&self, old_name: &str, new_name: &str) -> Result<bool, DatabaseError> {
        self.rename_shaped(old_name, new_name, LegacyKind::Doc)
    }

    /// Legacy-shaped insert: the record gets a fresh id and file names must be
    /// unique within the kind, independent of content.
    pub fn add_shaped(
        &self,
        record: &LegacyRecord,
        kind: LegacyKind,
    ) -> Result<LegacyRecord, DatabaseError> {
        let media = Media::from_legacy(record, kind);
        self.insert_media(&media, NamePolicy::RejectDuplicate)?;
        Ok(media.to_legacy())
    }

    fn get_shaped_by_checksum(
        &self,
        checksum: &Checksum,
        kind: LegacyKind,
    ) -> Result<Option<LegacyRecord>, DatabaseError> {
        Ok(self
            .get_media_by_checksum(checksum)?
            .filter(|m| m.media_type == kind.media_type())
            .map(|m| m.to_legacy()))
    }

    fn get_all_shaped(&self, kind: LegacyKind) -> Result<Vec<LegacyRecord>, DatabaseError> {
        Ok(self
            .get_media_by_type(kind.media_type())?
            .iter()
            .map(Media::to_legacy)
            .collect())
    }

    fn delete_shaped(&self, file_name: &str, kind: LegacyKind) -> Result<bool, DatabaseError> {
        match self.get_media_by_file_name_and_type(file_name, kind.media_type())? {
            Some(media) => Ok(self.delete_media(&media.id)?.is_some()),
            None => Ok(false),
        }
    }

    fn rename_shaped(
        &self,
        old_name: &str,
        new_name: &str,
        kind: LegacyKind,
    ) -> Result<bool, DatabaseError> {
        match self.get_media_by_file_name_and_type(old_name, kind.media_type())? {
            Some(media) => self.rename_media(&media.id, new_name),
            None => Ok(false),
        }
    }
}
