//! Read-only comparison of datastore rows against the files on disk.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::migration::{migration_state, MigrationState};
use crate::router::{DirectoryRouter, STAGING_DIR};
use crate::storage::models::{LegacyKind, Media};
use crate::storage::{Database, DatabaseError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Failed to walk storage: {0}")]
    Walk(#[from] walkdir::Error),
}

/// A row whose file is not at any location it may live under.
#[derive(Debug, Clone, Serialize)]
pub struct MissingFile {
    pub id: String,
    pub file_name: String,
    pub media_type: String,
    pub expected: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub rows_checked: usize,
    pub files_checked: usize,
    pub missing_files: Vec<MissingFile>,
    /// Files no row refers to.
    pub orphan_files: Vec<String>,
    /// Leftovers of uploads that never committed.
    pub stale_staging: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.missing_files.is_empty() && self.orphan_files.is_empty() && self.stale_staging.is_empty()
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "checked {} rows and {} files",
            self.rows_checked, self.files_checked
        )?;
        for missing in &self.missing_files {
            writeln!(
                f,
                "missing file: {} '{}' ({}), expected at {}",
                missing.media_type,
                missing.file_name,
                missing.id,
                missing.expected.join(" or ")
            )?;
        }
        for orphan in &self.orphan_files {
            writeln!(f, "orphan file: {orphan}")?;
        }
        for staged in &self.stale_staging {
            writeln!(f, "stale staged upload: {staged}")?;
        }
        write!(f, "{}", if self.is_clean() { "clean" } else { "mismatches found" })
    }
}

/// Storage keys of every file under `root`, with `/` separators.
fn stored_keys(root: &Path) -> Result<Vec<String>, ReconcileError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut keys = Vec::new();
    for entry in WalkDir::new(root).into_iter() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        keys.push(key);
    }
    keys.sort();
    Ok(keys)
}

/// Compare rows against files. Nothing is created, moved or deleted.
///
/// Before the migration has run, rows in the legacy tables are checked as
/// well; afterwards the unified rows cover them.
pub fn reconcile(db: &Database, router: &DirectoryRouter) -> Result<ReconcileReport, ReconcileError> {
    let mut rows: Vec<Media> = db.get_all_media()?;
    let (state, _) = migration_state(db)?;
    if state != MigrationState::Completed {
        for kind in LegacyKind::ALL {
            rows.extend(
                db.get_all_legacy(kind)?
                    .iter()
                    .map(|record| Media::from_legacy(record, kind)),
            );
        }
    }

    let files = stored_keys(router.root())?;
    let present: HashSet<&str> = files.iter().map(String::as_str).collect();

    let mut report = ReconcileReport {
        rows_checked: rows.len(),
        files_checked: files.len(),
        ..Default::default()
    };

    let mut referenced: HashSet<String> = HashSet::new();
    for media in &rows {
        let candidates: Vec<String> = router
            .candidate_keys(media)
            .into_iter()
            .map(|(_, key)| key)
            .collect();
        match candidates.iter().find(|key| present.contains(key.as_str())) {
            Some(key) => {
                referenced.insert(key.clone());
            }
            None => report.missing_files.push(MissingFile {
                id: media.id.clone(),
                file_name: media.file_name.clone(),
                media_type: media.media_type.to_string(),
                expected: candidates,
            }),
        }
    }

    let staging_prefix = format!("{STAGING_DIR}/");
    for key in files {
        if key.starts_with(&staging_prefix) {
            report.stale_staging.push(key);
        } else if !referenced.contains(&key) {
            report.orphan_files.push(key);
        }
    }

    if report.is_clean() {
        tracing::info!(rows = report.rows_checked, files = report.files_checked, "Storage is consistent");
    } else {
        tracing::warn!(
            missing = report.missing_files.len(),
            orphans = report.orphan_files.len(),
            staged = report.stale_staging.len(),
            "Storage mismatches found"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::Checksum;
    use crate::storage::models::{LegacyRecord, MediaType};

    #[test]
    fn reports_missing_orphan_and_staged_files() {
        let data_dir = tempfile::tempdir().unwrap();
        let files = tempfile::tempdir().unwrap();
        let db = Database::open(data_dir.path()).unwrap();
        let router = DirectoryRouter::new(files.path(), "");

        let present = Media::new("here.png", Checksum::compute(b"here"), MediaType::Image, None);
        let absent = Media::new("gone.pdf", Checksum::compute(b"gone"), MediaType::Document, None);
        db.add_media(&present).unwrap();
        db.add_media(&absent).unwrap();

        let legacy = LegacyRecord::new("old.png", Checksum::compute(b"old"));
        db.put_legacy(LegacyKind::Image, &legacy).unwrap();

        let write = |key: &str| {
            let path = router.path_for(key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"x").unwrap();
        };
        write(&format!("media/{}/here.png", present.checksum.to_hex()));
        write("images/old.png");
        write("images/stray.png");
        write(".staging/0000");

        let report = reconcile(&db, &router).unwrap();
        assert_eq!(report.rows_checked, 3);
        assert_eq!(report.files_checked, 4);
        assert_eq!(report.missing_files.len(), 1);
        assert_eq!(report.missing_files[0].file_name, "gone.pdf");
        assert_eq!(report.orphan_files, vec!["images/stray.png".to_string()]);
        assert_eq!(report.stale_staging, vec![".staging/0000".to_string()]);
        assert!(!report.is_clean());
    }

    #[test]
    fn empty_store_is_clean() {
        let data_dir = tempfile::tempdir().unwrap();
        let db = Database::open(data_dir.path()).unwrap();
        let router = DirectoryRouter::new(data_dir.path().join("missing"), "");
        assert!(reconcile(&db, &router).unwrap().is_clean());
    }
}
