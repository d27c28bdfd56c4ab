use redb::{
    Database as RedbDatabase, ReadOnlyTable, ReadTransaction, TableDefinition, TableHandle,
    WriteTransaction,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;

/// File name of the datastore inside the data directory
pub const DB_FILE_NAME: &str = "media-store.redb";

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(Box<redb::CommitError>),
    #[error("Database error: {0}")]
    Redb(Box<redb::Error>),
    #[error("Database error: {0}")]
    RedbDatabase(Box<redb::DatabaseError>),
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
    #[error("Checksum already stored for '{existing_file}'")]
    DuplicateChecksum { existing_file: String },
    #[error("File name already in use by '{existing_file}'")]
    DuplicateFileName { existing_file: String },
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),
    #[error("Storage error: {0}")]
    Storage(Box<redb::StorageError>),
    #[error("Table error: {0}")]
    Table(Box<redb::TableError>),
    #[error("Transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
}

impl From<redb::CommitError> for DatabaseError {
    fn from(e: redb::CommitError) -> Self {
        DatabaseError::Commit(Box::new(e))
    }
}

impl From<redb::DatabaseError> for DatabaseError {
    fn from(e: redb::DatabaseError) -> Self {
        DatabaseError::RedbDatabase(Box::new(e))
    }
}

impl From<redb::Error> for DatabaseError {
    fn from(e: redb::Error) -> Self {
        DatabaseError::Redb(Box::new(e))
    }
}

impl From<redb::StorageError> for DatabaseError {
    fn from(e: redb::StorageError) -> Self {
        DatabaseError::Storage(Box::new(e))
    }
}

impl From<redb::TableError> for DatabaseError {
    fn from(e: redb::TableError) -> Self {
        DatabaseError::Table(Box::new(e))
    }
}

impl From<redb::TransactionError> for DatabaseError {
    fn from(e: redb::TransactionError) -> Self {
        DatabaseError::Transaction(Box::new(e))
    }
}

pub struct Database {
    db: Arc<RedbDatabase>,
    path: PathBuf,
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            path: self.path.clone(),
        }
    }
}

impl Database {
    /// Path of the datastore file for a data directory.
    pub fn file_path<P: AsRef<Path>>(data_dir: P) -> PathBuf {
        data_dir.as_ref().join(DB_FILE_NAME)
    }

    /// Open or create a database in the given data directory.
    ///
    /// Only the legacy tables and the migration marker table are created here;
    /// the unified table appears with the first write to it.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let path = Self::file_path(&data_dir);
        let db = Arc::new(RedbDatabase::create(&path)?);

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(LEGACY_IMAGES)?;
            let _ = write_txn.open_table(LEGACY_DOCS)?;
            let _ = write_txn.open_table(MIGRATIONS)?;
        }
        write_txn.commit()?;

        Ok(Self { db, path })
    }

    /// Open an existing datastore file without creating anything in it.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref().to_path_buf();
        let db = Arc::new(RedbDatabase::open(&path)?);
        Ok(Self { db, path })
    }

    /// Location of the datastore file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }

    /// Names of every table present in the datastore.
    pub fn table_names(&self) -> Result<Vec<String>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let names = read_txn
            .list_tables()?
            .map(|handle| handle.name().to_string())
            .collect();
        Ok(names)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, DatabaseError> {
        Ok(self.table_names()?.iter().any(|n| n == name))
    }
}

/// Open a table for reading, treating a table that was never created (or was
/// dropped) as absent rather than as an error.
pub(crate) fn open_optional<K, V>(
    txn: &ReadTransaction,
    definition: TableDefinition<K, V>,
) -> Result<Option<ReadOnlyTable<K, V>>, DatabaseError>
where
    K: redb::Key + 'static,
    V: redb::Value + 'static,
{
    match txn.open_table(definition) {
        Ok(table) => Ok(Some(table)),
        Err(redb::TableError::TableDoesNotExist(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
