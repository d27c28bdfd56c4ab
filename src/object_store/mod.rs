mod local;

pub use local::LocalStore;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// Blob storage behind the media records.
///
/// Keys are `/`-separated paths relative to the store root, as produced by
/// [`DirectoryRouter`](crate::router::DirectoryRouter). The store does not
/// create parent directories.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `data` at `key`, replacing anything already there.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
    /// Move `from` to `to`, replacing `to` if it exists. Used to publish
    /// staged uploads and to rename files.
    async fn rename(&self, from: &str, to: &str) -> Result<(), ObjectStoreError>;
    /// Size in bytes of the object at `key`.
    async fn size(&self, key: &str) -> Result<u64, ObjectStoreError>;
}
