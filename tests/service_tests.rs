use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use media_store::error::MediaError;
use media_store::object_store::LocalStore;
use media_store::router::DirectoryRouter;
use media_store::service::MediaService;
use media_store::storage::models::{LegacyKind, MediaType};
use media_store::storage::Database;

fn test_service() -> (tempfile::TempDir, MediaService) {
    let dir = tempfile::tempdir().unwrap();
    let files = dir.path().join("files");
    let db = Database::open(dir.path().join("data")).unwrap();
    let store = LocalStore::new(&files).unwrap();
    let router = DirectoryRouter::new(&files, "http://localhost:8080");
    let service = MediaService::new(db, Arc::new(store), router);
    (dir, service)
}

fn png(width: u32, height: u32, shade: u8) -> Bytes {
    let img = RgbImage::from_pixel(width, height, Rgb([shade, 64, 200]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    Bytes::from(buf)
}

fn staged_files(root: &Path) -> usize {
    match std::fs::read_dir(root.join(".staging")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn test_upload_stores_file_and_row() {
    let (_dir, service) = test_service();
    let data = png(4, 3, 1);

    let stored = service.upload("cat.png", data.clone()).await.unwrap();
    assert_eq!(stored.media.media_type, MediaType::Image);
    assert_eq!(stored.media.dimensions(), Some((4, 3)));
    assert_eq!(
        stored.key,
        format!("media/{}/cat.png", stored.media.checksum.to_hex())
    );
    assert_eq!(stored.url, format!("http://localhost:8080/files/{}", stored.key));

    let on_disk = std::fs::read(service.router().path_for(&stored.key)).unwrap();
    assert_eq!(on_disk, data.to_vec());
    assert_eq!(staged_files(service.router().root()), 0);
}

#[tokio::test]
async fn test_duplicate_content_is_rejected() {
    let (_dir, service) = test_service();
    let data = png(4, 4, 2);
    service.upload("a.png", data.clone()).await.unwrap();

    let err = service.upload("b.png", data).await.unwrap_err();
    match err {
        MediaError::Conflict { existing_file, .. } => assert_eq!(existing_file, "a.png"),
        other => panic!("expected Conflict, got {other:?}"),
    }

    assert_eq!(service.list(None).unwrap().len(), 1);
    assert_eq!(staged_files(service.router().root()), 0);
}

#[tokio::test]
async fn test_same_name_different_content() {
    let (_dir, service) = test_service();
    let mut keys = Vec::new();
    for shade in 0..3 {
        let stored = service.upload("a.png", png(2, 2, shade)).await.unwrap();
        keys.push(stored.key);
    }

    assert_eq!(service.list(Some(MediaType::Image)).unwrap().len(), 3);
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 3, "each copy gets its own key");
}

#[tokio::test]
async fn test_rejects_bad_uploads() {
    let (_dir, service) = test_service();

    assert!(matches!(
        service.upload("empty.png", Bytes::new()).await,
        Err(MediaError::Validation(_))
    ));
    assert!(matches!(
        service.upload("../evil.png", png(1, 1, 0)).await,
        Err(MediaError::Validation(_))
    ));
    assert!(matches!(
        service.upload("tool.exe", Bytes::from_static(b"MZ\x90\x00")).await,
        Err(MediaError::Validation(_))
    ));
}

#[tokio::test]
async fn test_resize_rewrites_file_in_place() {
    let (_dir, service) = test_service();
    let stored = service.upload("cat.png", png(40, 20, 3)).await.unwrap();

    let resized = service.resize("cat.png", 10, 5).await.unwrap();
    assert_eq!(resized.id, stored.media.id);
    assert_eq!(resized.dimensions(), Some((10, 5)));
    assert_eq!(resized.checksum, stored.media.checksum);

    let on_disk = std::fs::read(service.router().path_for(&stored.key)).unwrap();
    let decoded = image::load_from_memory(&on_disk).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (10, 5));
    assert_eq!(staged_files(service.router().root()), 0);
}

#[tokio::test]
async fn test_resize_rejects_non_images() {
    let (_dir, service) = test_service();
    let notes = Bytes::from_static(b"meeting notes");
    let stored = service.upload("notes.txt", notes.clone()).await.unwrap();
    assert_eq!(stored.media.media_type, MediaType::Document);

    assert!(matches!(
        service.resize("notes.txt", 10, 10).await,
        Err(MediaError::NotResizable(_))
    ));
    assert!(matches!(
        service.resize("nope.png", 10, 10).await,
        Err(MediaError::NotFound(_))
    ));
    assert!(matches!(
        service.resize("notes.txt", 0, 10).await,
        Err(MediaError::Validation(_))
    ));

    let on_disk = std::fs::read(service.router().path_for(&stored.key)).unwrap();
    assert_eq!(on_disk, notes.to_vec());
}

#[tokio::test]
async fn test_rename_moves_file() {
    let (_dir, service) = test_service();
    let stored = service.upload("a.png", png(2, 2, 4)).await.unwrap();

    let renamed = service.rename(MediaType::Image, "a.png", "b.png").await.unwrap();
    assert_eq!(renamed.media.file_name, "b.png");
    assert_eq!(renamed.media.id, stored.media.id);
    assert!(!service.router().path_for(&stored.key).exists());
    assert!(service.router().path_for(&renamed.key).is_file());

    service.upload("c.png", png(2, 2, 5)).await.unwrap();
    let err = service
        .rename(MediaType::Image, "b.png", "c.png")
        .await
        .unwrap_err();
    assert!(matches!(err, MediaError::Conflict { existing_file, .. } if existing_file == "c.png"));
    assert!(service.router().path_for(&renamed.key).is_file());

    assert!(matches!(
        service.rename(MediaType::Document, "b.png", "d.png").await,
        Err(MediaError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_removes_row_and_file() {
    let (_dir, service) = test_service();
    let stored = service.upload("a.png", png(2, 2, 6)).await.unwrap();

    let outcome = service.delete("a.png", MediaType::Image).await.unwrap();
    assert_eq!(outcome.media.id, stored.media.id);
    assert!(outcome.warning.is_none());
    assert!(!service.router().path_for(&stored.key).exists());
    assert!(service.list(None).unwrap().is_empty());

    assert!(matches!(
        service.delete("a.png", MediaType::Image).await,
        Err(MediaError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_with_missing_file_warns() {
    let (_dir, service) = test_service();
    let stored = service.upload("a.png", png(2, 2, 7)).await.unwrap();
    std::fs::remove_file(service.router().path_for(&stored.key)).unwrap();

    let outcome = service.delete("a.png", MediaType::Image).await.unwrap();
    assert!(outcome.warning.is_some());
    assert!(service.list(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_metadata() {
    let (_dir, service) = test_service();
    let data = png(6, 2, 8);
    let stored = service.upload("a.png", data.clone()).await.unwrap();

    let meta = service.metadata("a.png", MediaType::Image).await.unwrap();
    assert_eq!(meta.media.id, stored.media.id);
    assert_eq!(meta.file_size, data.len() as u64);
    assert_eq!(meta.download_url, stored.url);

    assert!(matches!(
        service.metadata("a.png", MediaType::Document).await,
        Err(MediaError::Validation(_))
    ));
    assert!(matches!(
        service.metadata("b.png", MediaType::Image).await,
        Err(MediaError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_double_dot_inside_a_name_round_trips() {
    let (_dir, service) = test_service();
    let data = png(3, 3, 13);

    let stored = service.upload("holiday..final.png", data.clone()).await.unwrap();
    assert!(service.router().path_for(&stored.key).is_file());
    assert_eq!(service.read(&stored.key).await.unwrap(), data);

    let meta = service
        .metadata("holiday..final.png", MediaType::Image)
        .await
        .unwrap();
    assert_eq!(meta.file_size, data.len() as u64);

    service.delete("holiday..final.png", MediaType::Image).await.unwrap();
    assert!(!service.router().path_for(&stored.key).exists());
}

#[tokio::test]
async fn test_read_rejects_escaping_keys() {
    let (_dir, service) = test_service();

    assert!(matches!(
        service.read("media/../../secret").await,
        Err(MediaError::NotFound(_))
    ));
}

// ============================================================================
// Legacy-compatible operations
// ============================================================================

#[tokio::test]
async fn test_legacy_upload_uses_legacy_directory() {
    let (_dir, service) = test_service();
    let stored = service
        .upload_legacy(LegacyKind::Image, "cat.png", png(5, 5, 9))
        .await
        .unwrap();
    assert_eq!(stored.key, "images/cat.png");
    assert_eq!(stored.media.dimensions(), Some((5, 5)));
    assert!(service.router().path_for("images/cat.png").is_file());

    let doc = service
        .upload_legacy(LegacyKind::Doc, "notes.txt", Bytes::from_static(b"notes"))
        .await
        .unwrap();
    assert_eq!(doc.key, "docs/notes.txt");

    // Files in legacy directories are still found by the unified lookups.
    let meta = service.metadata("cat.png", MediaType::Image).await.unwrap();
    assert_eq!(meta.download_url, "http://localhost:8080/files/images/cat.png");
}

#[tokio::test]
async fn test_legacy_upload_rejects_name_reuse() {
    let (_dir, service) = test_service();
    service
        .upload_legacy(LegacyKind::Image, "cat.png", png(2, 2, 10))
        .await
        .unwrap();

    let err = service
        .upload_legacy(LegacyKind::Image, "cat.png", png(2, 2, 11))
        .await
        .unwrap_err();
    assert!(matches!(err, MediaError::Conflict { existing_file, .. } if existing_file == "cat.png"));
    assert_eq!(service.list(None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_legacy_upload_checks_type() {
    let (_dir, service) = test_service();

    assert!(matches!(
        service
            .upload_legacy(LegacyKind::Image, "notes.txt", Bytes::from_static(b"notes"))
            .await,
        Err(MediaError::Validation(_))
    ));
    assert!(matches!(
        service
            .upload_legacy(LegacyKind::Doc, "cat.png", png(2, 2, 12))
            .await,
        Err(MediaError::Validation(_))
    ));
    assert!(service.list(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_legacy_rename_and_delete() {
    let (_dir, service) = test_service();
    service
        .upload_legacy(LegacyKind::Doc, "a.txt", Bytes::from_static(b"aaa"))
        .await
        .unwrap();

    let renamed = service
        .rename_legacy(LegacyKind::Doc, "a.txt", "b.txt")
        .await
        .unwrap();
    assert_eq!(renamed.key, "docs/b.txt");
    assert!(!service.router().path_for("docs/a.txt").exists());

    let outcome = service.delete_legacy(LegacyKind::Doc, "b.txt").await.unwrap();
    assert!(outcome.warning.is_none());
    assert!(!service.router().path_for("docs/b.txt").exists());
}
