//! The unification migration: legacy image and doc rows copied into the
//! unified media table in one write transaction.

use std::fmt;
use std::path::PathBuf;

use chrono::Utc;
use redb::WriteTransaction;
use serde::Serialize;
use tracing::{error, info, warn};

use super::backup::{BackupInfo, BackupManager};
use super::verify::{verify_migration, verify_rollback, LegacySnapshot, VerificationReport};
use super::{MigrationError, RestoreOutcome};
use crate::config::Config;
use crate::storage::models::{LegacyKind, Media, MigrationRecord, MigrationStatus};
use crate::storage::{
    drop_unified_in, for_each_legacy, get_marker_in, put_marker_in, remove_marker_in, Database,
    DatabaseError, MediaTables, NamePolicy,
};

/// Marker name of the legacy-to-unified migration.
pub const MIGRATION_NAME: &str = "unify_media";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    NotStarted,
    Running,
    Completed,
    RolledBack,
}

impl MigrationState {
    /// `RolledBack` behaves like `NotStarted`; a failed run falls back to
    /// `NotStarted` once its backup is restored.
    pub fn can_transition_to(self, next: MigrationState) -> bool {
        use MigrationState::*;
        matches!(
            (self, next),
            (NotStarted | RolledBack, Running)
                | (Running, Completed)
                | (Running, NotStarted)
                | (Completed, RolledBack)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::NotStarted => "not_started",
            MigrationState::Running => "running",
            MigrationState::Completed => "completed",
            MigrationState::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationOptions {
    /// Run without the pre-operation backup. A failure then cannot be
    /// restored automatically.
    pub skip_backup: bool,
}

#[derive(Debug, Clone)]
pub struct MigrationSummary {
    pub state: MigrationState,
    pub record: MigrationRecord,
    pub backup: Option<BackupInfo>,
    pub verification: VerificationReport,
}

/// Current state as recorded in the datastore, with the marker if present.
pub fn migration_state(
    db: &Database,
) -> Result<(MigrationState, Option<MigrationRecord>), DatabaseError> {
    let record = db.get_migration_record(MIGRATION_NAME)?;
    let state = match record {
        Some(ref r) if r.status == MigrationStatus::Completed => MigrationState::Completed,
        _ => MigrationState::NotStarted,
    };
    Ok((state, record))
}

/// Copy every legacy row into the unified table and write the completion
/// marker, all in one write transaction. Nothing is committed on error.
pub fn apply_migration(db: &Database, batch_size: usize) -> Result<MigrationRecord, MigrationError> {
    let write_txn = db.begin_write()?;
    match migrate_in(&write_txn, batch_size.max(1)) {
        Ok(record) => {
            write_txn.commit().map_err(DatabaseError::from)?;
            info!(
                images = record.images_migrated,
                docs = record.docs_migrated,
                already_present = record.already_present,
                "Media unification migration committed"
            );
            Ok(record)
        }
        Err(e) => {
            if let Err(abort) = write_txn.abort() {
                warn!(error = %abort, "Failed to abort migration transaction");
            }
            Err(e)
        }
    }
}

fn migrate_in(txn: &WriteTransaction, batch_size: usize) -> Result<MigrationRecord, MigrationError> {
    if let Some(existing) = get_marker_in(txn, MIGRATION_NAME)? {
        return Err(MigrationError::AlreadyCompleted {
            completed_at: existing.completed_at,
        });
    }

    let mut record = MigrationRecord {
        name: MIGRATION_NAME.to_string(),
        status: MigrationStatus::Completed,
        completed_at: Utc::now(),
        images_migrated: 0,
        docs_migrated: 0,
        already_present: 0,
    };

    {
        let mut tables = MediaTables::open(txn)?;
        for kind in LegacyKind::ALL {
            let media_type = kind.media_type();
            let mut processed = 0u64;
            let mut migrated = 0u64;

            for_each_legacy(txn, kind, |legacy| -> Result<(), MigrationError> {
                processed += 1;
                match tables.find_by_checksum(&legacy.checksum)? {
                    Some(existing) if existing.media_type == media_type => {
                        record.already_present += 1;
                    }
                    Some(existing) => {
                        return Err(MigrationError::ChecksumCollision {
                            checksum: legacy.checksum,
                            legacy_file: legacy.file_name,
                            legacy_type: media_type,
                            existing_file: existing.file_name,
                            existing_type: existing.media_type,
                        });
                    }
                    None => {
                        let media = Media::from_legacy(&legacy, kind);
                        tables.insert(&media, NamePolicy::AllowShared)?;
                        migrated += 1;
                    }
                }
                if processed % batch_size as u64 == 0 {
                    info!(kind = %kind, processed, migrated, "Migration progress");
                }
                Ok(())
            })?;

            info!(kind = %kind, processed, migrated, "Migrated legacy rows");
            match kind {
                LegacyKind::Image => record.images_migrated = migrated,
                LegacyKind::Doc => record.docs_migrated = migrated,
            }
        }
    }

    record.completed_at = Utc::now();
    put_marker_in(txn, &record)?;
    Ok(record)
}

/// Drop the unified table and remove the completion marker in one write
/// transaction. Returns the removed marker.
pub fn revert_migration(db: &Database) -> Result<MigrationRecord, MigrationError> {
    let write_txn = db.begin_write()?;
    let result = revert_in(&write_txn);
    match result {
        Ok(marker) => {
            write_txn.commit().map_err(DatabaseError::from)?;
            info!(completed_at = %marker.completed_at, "Media unification migration rolled back");
            Ok(marker)
        }
        Err(e) => {
            if let Err(abort) = write_txn.abort() {
                warn!(error = %abort, "Failed to abort rollback transaction");
            }
            Err(e)
        }
    }
}

fn revert_in(txn: &WriteTransaction) -> Result<MigrationRecord, MigrationError> {
    let marker = remove_marker_in(txn, MIGRATION_NAME)?.ok_or(MigrationError::NotCompleted)?;
    if !drop_unified_in(txn)? {
        warn!("Unified table was already absent during rollback");
    }
    Ok(marker)
}

/// Runs migrations and rollbacks against the datastore file, wrapped in a
/// backup that is restored automatically if the operation fails.
///
/// The datastore must not be held open by anything else (a running server
/// included) while the engine works.
pub struct MigrationEngine {
    data_dir: PathBuf,
    backups: BackupManager,
    batch_size: usize,
}

impl MigrationEngine {
    pub fn new(config: &Config) -> Self {
        Self::with_paths(
            &config.node.data_dir,
            &config.storage.backup_dir,
            config.migration.batch_size,
        )
    }

    pub fn with_paths(
        data_dir: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        batch_size: usize,
    ) -> Self {
        let data_dir = data_dir.into();
        let backups = BackupManager::new(Database::file_path(&data_dir), backup_dir);
        Self {
            data_dir,
            backups,
            batch_size,
        }
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    fn open(&self) -> Result<Database, MigrationError> {
        Ok(Database::open(&self.data_dir)?)
    }

    pub fn status(&self) -> Result<(MigrationState, Option<MigrationRecord>), MigrationError> {
        let db = self.open()?;
        Ok(migration_state(&db)?)
    }

    /// Back up, migrate, verify. A failed migration restores the backup.
    pub fn run(&self, options: MigrationOptions) -> Result<MigrationSummary, MigrationError> {
        let before = {
            let db = self.open()?;
            let (state, record) = migration_state(&db)?;
            if !state.can_transition_to(MigrationState::Running) {
                return Err(MigrationError::AlreadyCompleted {
                    completed_at: record.map(|r| r.completed_at).unwrap_or_else(Utc::now),
                });
            }
            LegacySnapshot::capture(&db)?
        };

        let backup = self.take_backup(options, "migration")?;
        info!(
            state = %MigrationState::Running,
            legacy_images = before.images.len(),
            legacy_docs = before.docs.len(),
            "Starting media unification migration"
        );

        let result = self.open().and_then(|db| {
            let record = apply_migration(&db, self.batch_size)?;
            let verification = verify_migration(&db, Some(&before))?;
            Ok((record, verification))
        });

        match result {
            Ok((record, verification)) => Ok(MigrationSummary {
                state: MigrationState::Completed,
                record,
                backup,
                verification,
            }),
            Err(e) => Err(self.recover(e, backup.as_ref())),
        }
    }

    /// Back up, drop the unified table, verify. A failed rollback restores
    /// the backup.
    pub fn rollback(&self, options: MigrationOptions) -> Result<MigrationSummary, MigrationError> {
        let before = {
            let db = self.open()?;
            let (state, _) = migration_state(&db)?;
            if !state.can_transition_to(MigrationState::RolledBack) {
                return Err(MigrationError::NotCompleted);
            }
            LegacySnapshot::capture(&db)?
        };

        let backup = self.take_backup(options, "rollback")?;

        let result = self.open().and_then(|db| {
            let record = revert_migration(&db)?;
            let verification = verify_rollback(&db, Some(&before))?;
            Ok((record, verification))
        });

        match result {
            Ok((record, verification)) => Ok(MigrationSummary {
                state: MigrationState::RolledBack,
                record,
                backup,
                verification,
            }),
            Err(e) => Err(self.recover(e, backup.as_ref())),
        }
    }

    /// Verify the datastore as it stands, without creating anything in it.
    pub fn verify(&self, after_rollback: bool) -> Result<VerificationReport, MigrationError> {
        let db = Database::open_existing(Database::file_path(&self.data_dir))?;
        let report = if after_rollback {
            verify_rollback(&db, None)?
        } else {
            verify_migration(&db, None)?
        };
        Ok(report)
    }

    fn take_backup(
        &self,
        options: MigrationOptions,
        operation: &str,
    ) -> Result<Option<BackupInfo>, MigrationError> {
        if options.skip_backup {
            warn!(operation, "Backup skipped, a failure will not be restored automatically");
            return Ok(None);
        }
        Ok(Some(self.backups.create()?))
    }

    /// Restore the pre-operation backup after a failure. The datastore must
    /// already be closed.
    fn recover(&self, error: MigrationError, backup: Option<&BackupInfo>) -> MigrationError {
        let restore = match backup {
            None => RestoreOutcome::Skipped,
            Some(backup) => match self.backups.restore(&backup.name) {
                Ok(report) => RestoreOutcome::Restored(report.restored.name),
                Err(e) => RestoreOutcome::Failed(e.to_string()),
            },
        };
        error!(
            error = %error,
            restore = %restore,
            state = %MigrationState::NotStarted,
            "Migration operation failed"
        );
        MigrationError::Recovered {
            source: Box::new(error),
            restore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions() {
        use MigrationState::*;
        assert!(NotStarted.can_transition_to(Running));
        assert!(RolledBack.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(NotStarted));
        assert!(Completed.can_transition_to(RolledBack));

        assert!(!Completed.can_transition_to(Running));
        assert!(!NotStarted.can_transition_to(RolledBack));
        assert!(!NotStarted.can_transition_to(Completed));
    }
}
