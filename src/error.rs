use thiserror::Error;

use crate::classify::ClassifyError;
use crate::imaging::ImagingError;
use crate::object_store::ObjectStoreError;
use crate::storage::DatabaseError;

/// Request-scoped failures of the media core.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0}")]
    Validation(String),
    #[error("{message}")]
    Conflict {
        message: String,
        existing_file: String,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("'{0}' is not an image and cannot be resized")]
    NotResizable(String),
    #[error("Storage IO error: {0}")]
    Io(#[from] ObjectStoreError),
    #[error(transparent)]
    Database(DatabaseError),
    #[error("{0}")]
    Internal(String),
}

impl From<DatabaseError> for MediaError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::DuplicateChecksum { existing_file } => MediaError::Conflict {
                message: format!("file with identical content already exists as '{existing_file}'"),
                existing_file,
            },
            DatabaseError::DuplicateFileName { existing_file } => MediaError::Conflict {
                message: format!("a file named '{existing_file}' already exists"),
                existing_file,
            },
            DatabaseError::InvalidUpdate(msg) => MediaError::Validation(msg),
            other => MediaError::Database(other),
        }
    }
}

impl From<ClassifyError> for MediaError {
    fn from(e: ClassifyError) -> Self {
        MediaError::Validation(e.to_string())
    }
}

impl From<ImagingError> for MediaError {
    fn from(e: ImagingError) -> Self {
        match e {
            ImagingError::UnsupportedFormat(_) | ImagingError::Decode(_) => {
                MediaError::Validation(e.to_string())
            }
            ImagingError::Encode(_) => MediaError::Internal(e.to_string()),
        }
    }
}
