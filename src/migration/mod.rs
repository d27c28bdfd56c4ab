//! Legacy-to-unified schema migration, with the backups and verification
//! that make it safe to run and reverse.

pub mod backup;
pub mod engine;
pub mod verify;

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cas::Checksum;
use crate::storage::models::MediaType;
use crate::storage::DatabaseError;

pub use backup::{BackupError, BackupInfo, BackupManager, RestoreReport};
pub use engine::{
    apply_migration, migration_state, revert_migration, MigrationEngine, MigrationOptions,
    MigrationState, MigrationSummary, MIGRATION_NAME,
};
pub use verify::{
    verify_migration, verify_rollback, CheckOutcome, LegacySnapshot, VerificationReport,
};

/// What happened to the pre-operation backup after a migration step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored(String),
    Failed(String),
    Skipped,
}

impl fmt::Display for RestoreOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreOutcome::Restored(name) => write!(f, "datastore restored from {name}"),
            RestoreOutcome::Failed(reason) => write!(f, "automatic restore failed: {reason}"),
            RestoreOutcome::Skipped => f.write_str("no backup was taken, nothing restored"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration already completed at {completed_at}")]
    AlreadyCompleted { completed_at: DateTime<Utc> },
    #[error("Migration has not been completed, nothing to roll back")]
    NotCompleted,
    #[error(
        "Checksum {checksum} of legacy {legacy_type} '{legacy_file}' is already stored as {existing_type} '{existing_file}'"
    )]
    ChecksumCollision {
        checksum: Checksum,
        legacy_file: String,
        legacy_type: MediaType,
        existing_file: String,
        existing_type: MediaType,
    },
    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("{source} ({restore})")]
    Recovered {
        source: Box<MigrationError>,
        restore: RestoreOutcome,
    },
}

impl MigrationError {
    /// The failure that triggered an automatic restore, or `self` otherwise.
    pub fn root(&self) -> &MigrationError {
        match self {
            MigrationError::Recovered { source, .. } => source.root(),
            other => other,
        }
    }
}
