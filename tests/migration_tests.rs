use std::path::{Path, PathBuf};

use chrono::Utc;
use media_store::cas::Checksum;
use media_store::migration::{
    LegacySnapshot, MigrationEngine, MigrationError, MigrationOptions, MigrationState,
    RestoreOutcome, MIGRATION_NAME,
};
use media_store::storage::models::{LegacyKind, LegacyRecord, Media, MediaType, MigrationStatus};
use media_store::storage::{Database, MEDIA};
use serde::Serialize;

struct Fixture {
    _dir: tempfile::TempDir,
    data_dir: PathBuf,
    engine: MigrationEngine,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let engine = MigrationEngine::with_paths(&data_dir, dir.path().join("backups"), 2);
    Fixture {
        _dir: dir,
        data_dir,
        engine,
    }
}

/// Seed three legacy images and three legacy docs.
fn seed_legacy(data_dir: &Path) -> LegacySnapshot {
    let db = Database::open(data_dir).unwrap();
    for i in 0..3 {
        let image = LegacyRecord::new(
            format!("image-{i}.png"),
            Checksum::compute(format!("image {i}").as_bytes()),
        );
        db.put_legacy(LegacyKind::Image, &image).unwrap();
        let doc = LegacyRecord::new(
            format!("doc-{i}.pdf"),
            Checksum::compute(format!("doc {i}").as_bytes()),
        );
        db.put_legacy(LegacyKind::Doc, &doc).unwrap();
    }
    LegacySnapshot::capture(&db).unwrap()
}

fn with_db<T>(data_dir: &Path, f: impl FnOnce(&Database) -> T) -> T {
    let db = Database::open(data_dir).unwrap();
    f(&db)
}

#[test]
fn test_migrate_then_rollback() {
    let fx = fixture();
    let before = seed_legacy(&fx.data_dir);

    let summary = fx.engine.run(MigrationOptions::default()).unwrap();
    assert_eq!(summary.state, MigrationState::Completed);
    assert_eq!(summary.record.images_migrated, 3);
    assert_eq!(summary.record.docs_migrated, 3);
    assert_eq!(summary.record.already_present, 0);
    assert!(summary.backup.is_some());
    assert!(summary.verification.passed(), "{}", summary.verification);

    with_db(&fx.data_dir, |db| {
        assert_eq!(db.count_media().unwrap(), 6);
        assert_eq!(db.get_media_by_type(MediaType::Image).unwrap().len(), 3);
        assert_eq!(db.get_media_by_type(MediaType::Document).unwrap().len(), 3);

        let marker = db.get_migration_record(MIGRATION_NAME).unwrap().unwrap();
        assert_eq!(marker.status, MigrationStatus::Completed);

        for legacy in &before.images {
            let media = db.get_media_by_checksum(&legacy.checksum).unwrap().unwrap();
            assert_ne!(media.id, legacy.id);
            assert_eq!(media.file_name, legacy.file_name);
            assert_eq!(media.created_at, legacy.created_at);
            assert_eq!(media.dimensions(), None);
        }
        assert_eq!(LegacySnapshot::capture(db).unwrap(), before);
    });

    let summary = fx.engine.rollback(MigrationOptions::default()).unwrap();
    assert_eq!(summary.state, MigrationState::RolledBack);
    assert!(summary.verification.passed(), "{}", summary.verification);

    with_db(&fx.data_dir, |db| {
        assert!(!db.table_exists("media").unwrap());
        assert!(db.get_migration_record(MIGRATION_NAME).unwrap().is_none());
        assert_eq!(LegacySnapshot::capture(db).unwrap(), before);
    });

    let (state, _) = fx.engine.status().unwrap();
    assert_eq!(state, MigrationState::NotStarted);
}

#[test]
fn test_second_run_is_refused_and_changes_nothing() {
    let fx = fixture();
    seed_legacy(&fx.data_dir);
    fx.engine.run(MigrationOptions::default()).unwrap();
    let backups = fx.engine.backups().list().unwrap().len();

    let err = fx.engine.run(MigrationOptions::default()).unwrap_err();
    assert!(matches!(err, MigrationError::AlreadyCompleted { .. }));

    with_db(&fx.data_dir, |db| assert_eq!(db.count_media().unwrap(), 6));
    assert_eq!(fx.engine.backups().list().unwrap().len(), backups);
}

#[test]
fn test_rollback_without_migration_is_refused() {
    let fx = fixture();
    seed_legacy(&fx.data_dir);

    let err = fx.engine.rollback(MigrationOptions::default()).unwrap_err();
    assert!(matches!(err, MigrationError::NotCompleted));
    assert!(fx.engine.backups().list().unwrap().is_empty());
}

#[test]
fn test_migration_can_rerun_after_rollback() {
    let fx = fixture();
    seed_legacy(&fx.data_dir);

    fx.engine.run(MigrationOptions::default()).unwrap();
    fx.engine.rollback(MigrationOptions::default()).unwrap();
    let summary = fx.engine.run(MigrationOptions::default()).unwrap();

    assert_eq!(summary.record.images_migrated, 3);
    assert!(summary.verification.passed());
}

#[test]
fn test_existing_unified_rows_count_as_already_present() {
    let fx = fixture();
    seed_legacy(&fx.data_dir);

    with_db(&fx.data_dir, |db| {
        let rows = db.get_all_legacy(LegacyKind::Image).unwrap();
        let legacy = &rows[0];
        let uploaded = Media::new(
            legacy.file_name.as_str(),
            legacy.checksum,
            MediaType::Image,
            Some((8, 8)),
        );
        db.add_media(&uploaded).unwrap();
    });

    let summary = fx.engine.run(MigrationOptions::default()).unwrap();
    assert_eq!(summary.record.images_migrated, 2);
    assert_eq!(summary.record.docs_migrated, 3);
    assert_eq!(summary.record.already_present, 1);
    assert!(summary.verification.passed(), "{}", summary.verification);
}

#[test]
fn test_failed_migration_restores_backup() {
    let fx = fixture();
    seed_legacy(&fx.data_dir);

    // A document already stored with the bytes of a legacy image.
    with_db(&fx.data_dir, |db| {
        let rows = db.get_all_legacy(LegacyKind::Image).unwrap();
        let legacy = &rows[0];
        let clash = Media::new("clash.pdf", legacy.checksum, MediaType::Document, None);
        db.add_media(&clash).unwrap();
    });

    let err = fx.engine.run(MigrationOptions::default()).unwrap_err();
    match &err {
        MigrationError::Recovered { source, restore } => {
            assert!(matches!(**source, MigrationError::ChecksumCollision { .. }));
            assert!(matches!(restore, RestoreOutcome::Restored(_)));
        }
        other => panic!("expected Recovered, got {other:?}"),
    }
    assert!(matches!(err.root(), MigrationError::ChecksumCollision { .. }));

    with_db(&fx.data_dir, |db| {
        assert!(db.get_migration_record(MIGRATION_NAME).unwrap().is_none());
        assert_eq!(db.count_media().unwrap(), 1);
        assert_eq!(db.count_legacy(LegacyKind::Image).unwrap(), 3);
    });

    // The pre-run backup plus the snapshot taken before restoring it.
    assert_eq!(fx.engine.backups().list().unwrap().len(), 2);
}

#[test]
fn test_skip_backup() {
    let fx = fixture();
    seed_legacy(&fx.data_dir);

    let summary = fx
        .engine
        .run(MigrationOptions { skip_backup: true })
        .unwrap();
    assert!(summary.backup.is_none());
    assert!(fx.engine.backups().list().unwrap().is_empty());

    let summary = fx
        .engine
        .rollback(MigrationOptions { skip_backup: true })
        .unwrap();
    assert!(summary.backup.is_none());
    assert!(fx.engine.backups().list().unwrap().is_empty());
}

#[test]
fn test_failure_without_backup_reports_skipped_restore() {
    let fx = fixture();
    seed_legacy(&fx.data_dir);
    with_db(&fx.data_dir, |db| {
        let rows = db.get_all_legacy(LegacyKind::Doc).unwrap();
        let legacy = &rows[0];
        let clash = Media::new("clash.png", legacy.checksum, MediaType::Image, None);
        db.add_media(&clash).unwrap();
    });

    let err = fx
        .engine
        .run(MigrationOptions { skip_backup: true })
        .unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Recovered {
            restore: RestoreOutcome::Skipped,
            ..
        }
    ));
    // The transaction never committed.
    with_db(&fx.data_dir, |db| assert_eq!(db.count_media().unwrap(), 1));
}

#[test]
fn test_verify_flags_rows_added_after_migration() {
    let fx = fixture();
    seed_legacy(&fx.data_dir);
    fx.engine.run(MigrationOptions::default()).unwrap();
    assert!(fx.engine.verify(false).unwrap().passed());

    with_db(&fx.data_dir, |db| {
        let extra = Media::new("late.mp3", Checksum::compute(b"late"), MediaType::Audio, None);
        db.add_media(&extra).unwrap();
    });

    let report = fx.engine.verify(false).unwrap();
    assert!(!report.passed());
    let failed: Vec<&str> = report
        .checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.name)
        .collect();
    assert_eq!(failed, vec!["row counts", "no orphan unified rows"]);

    // Verification is read-only.
    with_db(&fx.data_dir, |db| assert_eq!(db.count_media().unwrap(), 7));
}

#[test]
fn test_verify_flags_unknown_types() {
    #[derive(Serialize)]
    struct FutureRow {
        id: String,
        file_name: String,
        checksum: Checksum,
        media_type: String,
        width: Option<u32>,
        height: Option<u32>,
        created_at: chrono::DateTime<Utc>,
        updated_at: chrono::DateTime<Utc>,
    }

    let fx = fixture();
    let legacy = LegacyRecord::new("sticker.png", Checksum::compute(b"sticker"));
    with_db(&fx.data_dir, |db| db.put_legacy(LegacyKind::Image, &legacy).unwrap());
    fx.engine
        .run(MigrationOptions { skip_backup: true })
        .unwrap();

    // Rewrite the migrated row with a type this build does not know.
    with_db(&fx.data_dir, |db| {
        let media = db.get_media_by_checksum(&legacy.checksum).unwrap().unwrap();
        let row = FutureRow {
            id: media.id.clone(),
            file_name: media.file_name,
            checksum: media.checksum,
            media_type: "sticker".to_string(),
            width: None,
            height: None,
            created_at: media.created_at,
            updated_at: media.updated_at,
        };
        let data = rmp_serde::to_vec_named(&row).unwrap();
        let txn = db.begin_write().unwrap();
        {
            let mut table = txn.open_table(MEDIA).unwrap();
            table.insert(media.id.as_str(), data.as_slice()).unwrap();
        }
        txn.commit().unwrap();
    });

    let report = fx.engine.verify(false).unwrap();
    assert!(!report.passed());
    assert!(report.problems().any(|p| p.contains("unknown type 'sticker'")));
}

#[test]
fn test_verify_after_rollback() {
    let fx = fixture();
    seed_legacy(&fx.data_dir);
    fx.engine.run(MigrationOptions::default()).unwrap();

    // Not rolled back yet: the unified table is still there.
    assert!(!fx.engine.verify(true).unwrap().passed());

    fx.engine.rollback(MigrationOptions::default()).unwrap();
    assert!(fx.engine.verify(true).unwrap().passed());
    assert!(!fx.engine.verify(false).unwrap().passed());
}
