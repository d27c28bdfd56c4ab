//! Point-in-time copies of the datastore file.
//!
//! Backups are named `media-store-<UTC timestamp>[.<seq>].redb`. A copy is
//! written under a `.partial` name, opened and integrity-checked, and only
//! then renamed into place.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use redb::TableHandle;
use thiserror::Error;
use tracing::{info, warn};

const PREFIX: &str = "media-store-";
const SUFFIX: &str = ".redb";
const PARTIAL_SUFFIX: &str = ".partial";
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Datastore not found at {0}")]
    MissingDatastore(PathBuf),
    #[error("Invalid backup name: {0}")]
    InvalidName(String),
    #[error("Backup not found: {0}")]
    NotFound(String),
    #[error("Backup {name} is not a valid datastore: {reason}")]
    Corrupt { name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for BackupInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {}  {} bytes",
            self.name,
            self.created_at.to_rfc3339(),
            self.size
        )
    }
}

/// Result of a restore: the backup that now backs the live datastore, and the
/// snapshot taken of whatever was live before it.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub restored: BackupInfo,
    pub previous_state: Option<BackupInfo>,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    db_path: PathBuf,
    backup_dir: PathBuf,
}

impl BackupManager {
    pub fn new(db_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copy the live datastore to a new timestamped backup.
    pub fn create(&self) -> Result<BackupInfo, BackupError> {
        if !self.db_path.is_file() {
            return Err(BackupError::MissingDatastore(self.db_path.clone()));
        }
        std::fs::create_dir_all(&self.backup_dir)?;

        let name = self.next_name();
        let path = self.backup_dir.join(&name);
        let partial = self.backup_dir.join(format!("{name}{PARTIAL_SUFFIX}"));

        let copied = std::fs::copy(&self.db_path, &partial)
            .map_err(BackupError::from)
            .and_then(|_| verify_datastore(&partial, &name));
        if let Err(e) = copied {
            if let Err(cleanup) = std::fs::remove_file(&partial) {
                warn!(path = %partial.display(), error = %cleanup, "Failed to remove partial backup");
            }
            return Err(e);
        }
        std::fs::rename(&partial, &path)?;

        let info = self.info(&name)?;
        info!(backup = %info.name, size = info.size, "Created datastore backup");
        Ok(info)
    }

    /// Backups in the backup directory, newest first.
    pub fn list(&self) -> Result<Vec<BackupInfo>, BackupError> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut named = Vec::new();
        for entry in std::fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(order) = parse_name(&name) {
                named.push((order, name));
            }
        }
        named.sort_by(|a, b| b.0.cmp(&a.0));
        named
            .into_iter()
            .map(|(_, name)| self.info(&name))
            .collect()
    }

    /// Replace the live datastore with `name`. The current datastore, if any,
    /// is backed up first so a bad restore can itself be undone.
    ///
    /// The datastore must not be open while this runs.
    pub fn restore(&self, name: &str) -> Result<RestoreReport, BackupError> {
        let backup = self.resolve(name)?;
        verify_datastore(&backup, name)?;

        let previous_state = if self.db_path.is_file() {
            Some(self.create()?)
        } else {
            None
        };

        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staging = self.db_path.with_extension("restoring");
        std::fs::copy(&backup, &staging)?;
        std::fs::rename(&staging, &self.db_path)?;

        info!(
            backup = %name,
            previous = previous_state.as_ref().map(|b| b.name.as_str()).unwrap_or("none"),
            "Restored datastore from backup"
        );
        Ok(RestoreReport {
            restored: self.info(name)?,
            previous_state,
        })
    }

    pub fn delete(&self, name: &str) -> Result<(), BackupError> {
        let path = self.resolve(name)?;
        std::fs::remove_file(&path)?;
        info!(backup = %name, "Deleted datastore backup");
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, BackupError> {
        if parse_name(name).is_none() {
            return Err(BackupError::InvalidName(name.to_string()));
        }
        let path = self.backup_dir.join(name);
        if !path.is_file() {
            return Err(BackupError::NotFound(name.to_string()));
        }
        Ok(path)
    }

    fn info(&self, name: &str) -> Result<BackupInfo, BackupError> {
        let path = self.backup_dir.join(name);
        let metadata = std::fs::metadata(&path)?;
        let created_at = parse_name(name)
            .and_then(|(stamp, _)| NaiveDateTime::parse_from_str(&stamp, STAMP_FORMAT).ok())
            .map(|naive| Utc.from_utc_datetime(&naive))
            .or_else(|| metadata.modified().ok().map(DateTime::<Utc>::from))
            .unwrap_or_else(Utc::now);
        Ok(BackupInfo {
            name: name.to_string(),
            path,
            size: metadata.len(),
            created_at,
        })
    }

    fn next_name(&self) -> String {
        let stamp = Utc::now().format(STAMP_FORMAT).to_string();
        let base = format!("{PREFIX}{stamp}{SUFFIX}");
        if !self.backup_dir.join(&base).exists() {
            return base;
        }
        (1u32..)
            .map(|seq| format!("{PREFIX}{stamp}.{seq}{SUFFIX}"))
            .find(|name| !self.backup_dir.join(name).exists())
            .unwrap_or(base)
    }
}

/// Split a backup file name into its timestamp and collision sequence.
/// Returns `None` for anything that is not a backup name, including names
/// carrying path components.
fn parse_name(name: &str) -> Option<(String, u32)> {
    let body = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    if body.contains(['/', '\\']) || body.contains("..") {
        return None;
    }
    // The stamp has its own dot ("…T120000.123Z"); a sequence follows the Z.
    let (stamp, seq) = match body.rsplit_once('.') {
        Some((stamp, seq)) if stamp.ends_with('Z') => (stamp, seq.parse().ok()?),
        _ => (body, 0),
    };
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
    Some((stamp.to_string(), seq))
}

/// Open a datastore copy and confirm redb can read it.
fn verify_datastore(path: &Path, name: &str) -> Result<(), BackupError> {
    let corrupt = |reason: String| BackupError::Corrupt {
        name: name.to_string(),
        reason,
    };
    let mut db = redb::Database::open(path).map_err(|e| corrupt(e.to_string()))?;
    if !db.check_integrity().map_err(|e| corrupt(e.to_string()))? {
        return Err(corrupt("integrity check repaired the file".to_string()));
    }
    let read_txn = db.begin_read().map_err(|e| corrupt(e.to_string()))?;
    let tables = read_txn
        .list_tables()
        .map_err(|e| corrupt(e.to_string()))?
        .map(|t| t.name().to_string())
        .collect::<Vec<_>>();
    tracing::debug!(backup = name, tables = ?tables, "Verified backup");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backup_names() {
        let (stamp, seq) = parse_name("media-store-20261016T120000.123Z.redb").unwrap();
        assert_eq!(stamp, "20261016T120000.123Z");
        assert_eq!(seq, 0);

        let (_, seq) = parse_name("media-store-20261016T120000.123Z.2.redb").unwrap();
        assert_eq!(seq, 2);
    }

    #[test]
    fn rejects_foreign_names() {
        assert!(parse_name("media-store.redb").is_none());
        assert!(parse_name("../media-store-20261016T120000.123Z.redb").is_none());
        assert!(parse_name("media-store-20261016T120000.123Z.redb.partial").is_none());
        assert!(parse_name("media-store-yesterday.redb").is_none());
    }

    #[test]
    fn sequence_orders_after_base() {
        let base = parse_name("media-store-20261016T120000.123Z.redb").unwrap();
        let next = parse_name("media-store-20261016T120000.123Z.1.redb").unwrap();
        assert!(next > base);
    }
}
