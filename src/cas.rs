//! Content addressing: SHA-256 checksums over full file bodies and the
//! duplicate policy enforced before any persistent write.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::MediaError;
use crate::storage::models::MediaType;
use crate::storage::Database;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("Invalid checksum: {0}")]
    Invalid(String),
}

/// SHA-256 digest of a complete file body.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum([u8; 32]);

impl Checksum {
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ChecksumError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            ChecksumError::Invalid(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self, ChecksumError> {
        if s.len() != 64 {
            return Err(ChecksumError::Invalid(format!(
                "expected 64 hex characters, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s).map_err(|e| ChecksumError::Invalid(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl TryFrom<String> for Checksum {
    type Error = ChecksumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.to_hex()
    }
}

/// Which collisions abort an ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Unified path: only identical content conflicts; names may repeat.
    ContentOnly,
    /// Legacy-compatible paths: identical content or an existing record of the
    /// same type with the same file name conflicts.
    ContentAndName,
}

/// Pre-write duplicate check. The datastore enforces the same rules again
/// inside the insert transaction, so this only gives callers an early answer
/// before any bytes are written.
pub fn ensure_unique(
    db: &Database,
    checksum: &Checksum,
    file_name: &str,
    media_type: MediaType,
    policy: DuplicatePolicy,
) -> Result<(), MediaError> {
    if let Some(existing) = db.get_media_by_checksum(checksum)? {
        tracing::debug!(%checksum, existing_file = %existing.file_name, "Content duplicate");
        return Err(MediaError::Conflict {
            message: format!("file with identical content already exists as '{}'", existing.file_name),
            existing_file: existing.file_name,
        });
    }

    if policy == DuplicatePolicy::ContentAndName {
        if let Some(existing) = db.get_media_by_file_name_and_type(file_name, media_type)? {
            tracing::debug!(file_name, %media_type, "Name duplicate");
            return Err(MediaError::Conflict {
                message: format!("{media_type} named '{file_name}' already exists"),
                existing_file: existing.file_name,
            });
        }
    }

    Ok(())
}
