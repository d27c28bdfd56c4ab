//! Read-only audits of the datastore after a migration or a rollback.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use redb::TableHandle;
use serde::{Deserialize, Serialize};

use super::engine::MIGRATION_NAME;
use crate::cas::Checksum;
use crate::storage::models::{LegacyKind, LegacyRecord, MediaType, MigrationStatus};
use crate::storage::{decode_rows, open_optional, Database, DatabaseError, MEDIA, MEDIA_CHECKSUMS};
use crate::storage::{LEGACY_DOCS, LEGACY_IMAGES, MIGRATIONS};

/// One named check and the problems it found.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub passed: bool,
    pub problems: Vec<String>,
}

impl CheckOutcome {
    fn new(name: &'static str, problems: Vec<String>) -> Self {
        Self {
            name,
            passed: problems.is_empty(),
            problems,
        }
    }
}

/// Itemized result of a verification pass.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub checks: Vec<CheckOutcome>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn problems(&self) -> impl Iterator<Item = &str> {
        self.checks
            .iter()
            .flat_map(|c| c.problems.iter().map(String::as_str))
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let mark = if check.passed { "PASS" } else { "FAIL" };
            writeln!(f, "[{mark}] {}", check.name)?;
            for problem in &check.problems {
                writeln!(f, "       - {problem}")?;
            }
        }
        let overall = if self.passed() { "PASSED" } else { "FAILED" };
        write!(f, "verification {overall}")
    }
}

/// Legacy rows captured before an operation, compared afterwards to prove the
/// legacy tables were left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacySnapshot {
    pub images: Vec<LegacyRecord>,
    pub docs: Vec<LegacyRecord>,
}

impl LegacySnapshot {
    pub fn capture(db: &Database) -> Result<Self, DatabaseError> {
        Ok(Self {
            images: db.get_all_legacy(LegacyKind::Image)?,
            docs: db.get_all_legacy(LegacyKind::Doc)?,
        })
    }

    fn rows(&self, kind: LegacyKind) -> &[LegacyRecord] {
        match kind {
            LegacyKind::Image => &self.images,
            LegacyKind::Doc => &self.docs,
        }
    }

    /// Differences between `self` (before) and `after`, one line each.
    fn diff(&self, after: &LegacySnapshot) -> Vec<String> {
        let mut problems = Vec::new();
        for kind in LegacyKind::ALL {
            let before: HashMap<&str, &LegacyRecord> =
                self.rows(kind).iter().map(|r| (r.id.as_str(), r)).collect();
            let now: HashMap<&str, &LegacyRecord> =
                after.rows(kind).iter().map(|r| (r.id.as_str(), r)).collect();
            for (id, record) in &before {
                match now.get(id) {
                    None => problems.push(format!(
                        "legacy {kind} '{}' ({id}) disappeared",
                        record.file_name
                    )),
                    Some(current) if current != record => problems.push(format!(
                        "legacy {kind} '{}' ({id}) was modified",
                        record.file_name
                    )),
                    Some(_) => {}
                }
            }
            for (id, record) in &now {
                if !before.contains_key(id) {
                    problems.push(format!(
                        "legacy {kind} '{}' ({id}) appeared",
                        record.file_name
                    ));
                }
            }
        }
        problems
    }
}

/// A unified row with its type left undecoded, so rows carrying a type this
/// build does not know still load and get reported.
#[derive(Debug, Deserialize)]
struct RawMedia {
    id: String,
    file_name: String,
    checksum: Checksum,
    media_type: String,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    updated_at: DateTime<Utc>,
}

fn load_unified(db: &Database) -> Result<Vec<RawMedia>, DatabaseError> {
    let read_txn = db.begin_read()?;
    match open_optional(&read_txn, MEDIA)? {
        Some(table) => decode_rows(&table),
        None => Ok(Vec::new()),
    }
}

fn check_tables(
    db: &Database,
    required: &[&str],
    forbidden: &[&str],
) -> Result<CheckOutcome, DatabaseError> {
    let present: HashSet<String> = db.table_names()?.into_iter().collect();
    let mut problems: Vec<String> = required
        .iter()
        .filter(|name| !present.contains(**name))
        .map(|name| format!("table '{name}' is missing"))
        .collect();
    problems.extend(
        forbidden
            .iter()
            .filter(|name| present.contains(**name))
            .map(|name| format!("table '{name}' should not exist")),
    );
    Ok(CheckOutcome::new("required tables", problems))
}

/// Audit the datastore after a migration run.
///
/// Checks, in order: required tables exist; the unified row count equals the
/// legacy row count; every legacy row has exactly one unified row with the
/// same checksum and derived type (and no dimensions, unless the row has been
/// resized since); no unified row is untraceable or carries an unknown type;
/// the migration marker exists and is completed. With a `before` snapshot,
/// also confirms the legacy rows were left untouched.
pub fn verify_migration(
    db: &Database,
    before: Option<&LegacySnapshot>,
) -> Result<VerificationReport, DatabaseError> {
    let mut checks = Vec::with_capacity(6);

    checks.push(check_tables(
        db,
        &[
            MEDIA.name(),
            MEDIA_CHECKSUMS.name(),
            LEGACY_IMAGES.name(),
            LEGACY_DOCS.name(),
            MIGRATIONS.name(),
        ],
        &[],
    )?);

    let legacy = LegacySnapshot::capture(db)?;
    let unified = load_unified(db)?;

    let legacy_total = legacy.images.len() + legacy.docs.len();
    let mut problems = Vec::new();
    if unified.len() != legacy_total {
        problems.push(format!(
            "unified table holds {} rows, legacy tables hold {} ({} images + {} docs)",
            unified.len(),
            legacy_total,
            legacy.images.len(),
            legacy.docs.len()
        ));
    }
    checks.push(CheckOutcome::new("row counts", problems));

    let mut by_checksum: HashMap<Checksum, Vec<&RawMedia>> = HashMap::new();
    for row in &unified {
        by_checksum.entry(row.checksum).or_default().push(row);
    }

    let mut problems = Vec::new();
    for kind in LegacyKind::ALL {
        let expected_type = kind.media_type();
        for record in legacy.rows(kind) {
            let matches = by_checksum
                .get(&record.checksum)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let [row] = matches else {
                problems.push(format!(
                    "legacy {kind} '{}' has {} unified rows with checksum {}",
                    record.file_name,
                    matches.len(),
                    record.checksum
                ));
                continue;
            };
            if row.media_type != expected_type.as_str() {
                problems.push(format!(
                    "legacy {kind} '{}' migrated as type '{}', expected '{expected_type}'",
                    record.file_name, row.media_type
                ));
            }
            let untouched = row.updated_at == record.updated_at;
            if untouched && (row.width.is_some() || row.height.is_some()) {
                problems.push(format!(
                    "legacy {kind} '{}' migrated with dimensions set",
                    record.file_name
                ));
            }
        }
    }
    checks.push(CheckOutcome::new("legacy rows migrated", problems));

    let legacy_checksums: HashSet<Checksum> = legacy
        .images
        .iter()
        .chain(legacy.docs.iter())
        .map(|r| r.checksum)
        .collect();
    let mut problems = Vec::new();
    for row in &unified {
        if MediaType::ALL.iter().all(|t| t.as_str() != row.media_type) {
            problems.push(format!(
                "unified row '{}' ({}) has unknown type '{}'",
                row.file_name, row.id, row.media_type
            ));
        }
        if !legacy_checksums.contains(&row.checksum) {
            problems.push(format!(
                "unified row '{}' ({}) has no legacy source",
                row.file_name, row.id
            ));
        }
    }
    checks.push(CheckOutcome::new("no orphan unified rows", problems));

    let problems = match db.get_migration_record(MIGRATION_NAME)? {
        Some(record) if record.status == MigrationStatus::Completed => Vec::new(),
        Some(record) => vec![format!(
            "migration marker has status {:?}",
            record.status
        )],
        None => vec![format!("migration marker '{MIGRATION_NAME}' is missing")],
    };
    checks.push(CheckOutcome::new("migration marker", problems));

    if let Some(before) = before {
        checks.push(CheckOutcome::new("legacy rows unchanged", before.diff(&legacy)));
    }

    let report = VerificationReport { checks };
    log_report("migration", &report);
    Ok(report)
}

/// Audit the datastore after a rollback: legacy tables present, unified
/// table gone, marker gone. With a `before` snapshot, also confirms the legacy
/// rows are exactly what they were before the operation.
pub fn verify_rollback(
    db: &Database,
    before: Option<&LegacySnapshot>,
) -> Result<VerificationReport, DatabaseError> {
    let mut checks = Vec::with_capacity(3);

    checks.push(check_tables(
        db,
        &[LEGACY_IMAGES.name(), LEGACY_DOCS.name()],
        &[MEDIA.name(), MEDIA_CHECKSUMS.name()],
    )?);

    let problems = match db.get_migration_record(MIGRATION_NAME)? {
        Some(record) => vec![format!(
            "migration marker still present (completed at {})",
            record.completed_at
        )],
        None => Vec::new(),
    };
    checks.push(CheckOutcome::new("migration marker removed", problems));

    if let Some(before) = before {
        let after = LegacySnapshot::capture(db)?;
        checks.push(CheckOutcome::new("legacy rows unchanged", before.diff(&after)));
    }

    let report = VerificationReport { checks };
    log_report("rollback", &report);
    Ok(report)
}

fn log_report(operation: &str, report: &VerificationReport) {
    if report.passed() {
        tracing::info!(operation, checks = report.checks.len(), "Verification passed");
    } else {
        for problem in report.problems() {
            tracing::warn!(operation, problem, "Verification problem");
        }
        tracing::error!(operation, "Verification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> LegacyRecord {
        LegacyRecord::new(name, Checksum::compute(name.as_bytes()))
    }

    #[test]
    fn snapshot_diff_reports_changes() {
        let kept = record("kept.png");
        let gone = record("gone.png");
        let before = LegacySnapshot {
            images: vec![kept.clone(), gone],
            docs: Vec::new(),
        };

        let mut renamed = kept.clone();
        renamed.file_name = "renamed.png".to_string();
        let after = LegacySnapshot {
            images: vec![renamed],
            docs: vec![record("new.pdf")],
        };

        let problems = before.diff(&after);
        assert_eq!(problems.len(), 3);
        assert!(problems.iter().any(|p| p.contains("disappeared")));
        assert!(problems.iter().any(|p| p.contains("modified")));
        assert!(problems.iter().any(|p| p.contains("appeared")));
        assert!(before.diff(&before).is_empty());
    }

    #[test]
    fn report_fails_when_any_check_fails() {
        let report = VerificationReport {
            checks: vec![
                CheckOutcome::new("a", Vec::new()),
                CheckOutcome::new("b", vec!["broken".to_string()]),
            ],
        };
        assert!(!report.passed());
        assert_eq!(report.problems().collect::<Vec<_>>(), vec!["broken"]);
        assert!(report.to_string().ends_with("verification FAILED"));
    }
}
