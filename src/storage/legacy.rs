use redb::{ReadableTable, TableDefinition, WriteTransaction};

use super::db::{open_optional, Database, DatabaseError};
use super::media::decode_rows;
use super::models::{LegacyKind, LegacyRecord, MigrationRecord};
use super::tables::*;

pub(crate) fn legacy_table(kind: LegacyKind) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match kind {
        LegacyKind::Image => LEGACY_IMAGES,
        LegacyKind::Doc => LEGACY_DOCS,
    }
}

/// Visit every legacy row of `kind` inside an open write transaction, in key order.
pub(crate) fn for_each_legacy<E, F>(
    txn: &WriteTransaction,
    kind: LegacyKind,
    mut f: F,
) -> Result<(), E>
where
    E: From<DatabaseError>,
    F: FnMut(LegacyRecord) -> Result<(), E>,
{
    let table = txn
        .open_table(legacy_table(kind))
        .map_err(DatabaseError::from)?;
    let iter = table.iter().map_err(DatabaseError::from)?;
    for entry in iter {
        let (_, value) = entry.map_err(DatabaseError::from)?;
        let record: LegacyRecord =
            rmp_serde::from_slice(value.value()).map_err(DatabaseError::from)?;
        f(record)?;
    }
    Ok(())
}

pub(crate) fn get_marker_in(
    txn: &WriteTransaction,
    name: &str,
) -> Result<Option<MigrationRecord>, DatabaseError> {
    let table = txn.open_table(MIGRATIONS)?;
    let result = match table.get(name)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(result)
}

pub(crate) fn put_marker_in(
    txn: &WriteTransaction,
    record: &MigrationRecord,
) -> Result<(), DatabaseError> {
    let mut table = txn.open_table(MIGRATIONS)?;
    let data = rmp_serde::to_vec_named(record)?;
    table.insert(record.name.as_str(), data.as_slice())?;
    Ok(())
}

pub(crate) fn remove_marker_in(
    txn: &WriteTransaction,
    name: &str,
) -> Result<Option<MigrationRecord>, DatabaseError> {
    let mut table = txn.open_table(MIGRATIONS)?;
    let result = match table.remove(name)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(result)
}

/// Drop the unified table and its checksum index. Returns whether the unified
/// table existed.
pub(crate) fn drop_unified_in(txn: &WriteTransaction) -> Result<bool, DatabaseError> {
    let existed = txn.delete_table(MEDIA)?;
    txn.delete_table(MEDIA_CHECKSUMS)?;
    Ok(existed)
}

impl Database {
    // ========================================================================
    // Legacy table operations (pre-unification schema)
    // ========================================================================

    /// Store a record in the legacy table for `kind`.
    pub fn put_legacy(&self, kind: LegacyKind, record: &LegacyRecord) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(legacy_table(kind))?;
            let data = rmp_serde::to_vec_named(record)?;
            table.insert(record.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_all_legacy(&self, kind: LegacyKind) -> Result<Vec<LegacyRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let Some(table) = open_optional(&read_txn, legacy_table(kind))? else {
            return Ok(Vec::new());
        };
        let mut records: Vec<LegacyRecord> = decode_rows(&table)?;
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    pub fn count_legacy(&self, kind: LegacyKind) -> Result<u64, DatabaseError> {
        Ok(self.get_all_legacy(kind)?.len() as u64)
    }

    // ========================================================================
    // Migration markers
    // ========================================================================

    pub fn get_migration_record(&self, name: &str) -> Result<Option<MigrationRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let Some(table) = open_optional(&read_txn, MIGRATIONS)? else {
            return Ok(None);
        };
        let result = match table.get(name)? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        Ok(result)
    }
}
