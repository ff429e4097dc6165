//! Package upload, replacement and cleanup

mod common;

use std::time::Duration;

use bytes::Bytes;
use lamad_progress::{LearningError, Services};
use tempfile::TempDir;

async fn wait_until_gone(path: &std::path::Path) -> bool {
    for _ in 0..100 {
        if !path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_rejects_malformed_archives() {
    let dir = TempDir::new().unwrap();
    let services = common::services(&dir);
    common::seed(&services, common::workshop_course());
    let packages = &services.packages;

    let empty = packages.upload("safety-sco", Bytes::new(), false).await;
    assert!(matches!(empty, Err(LearningError::InvalidArchive(_))));

    let not_zip = packages
        .upload("safety-sco", Bytes::from_static(b"definitely not a zip"), false)
        .await;
    assert!(matches!(not_zip, Err(LearningError::InvalidArchive(_))));

    let no_manifest = common::zip_of(&[("index.html", "<html></html>")]);
    let no_manifest = packages.upload("safety-sco", Bytes::from(no_manifest), false).await;
    assert!(matches!(no_manifest, Err(LearningError::InvalidArchive(_))));

    // Rejected uploads leave nothing behind
    assert!(packages.get("safety-sco").unwrap().is_none());
    let report = packages.garbage_collect().await.unwrap();
    assert!(report.removed.is_empty());

    let wrong_kind = packages
        .upload("intro-video", Bytes::from(common::package_12()), false)
        .await;
    assert!(matches!(wrong_kind, Err(LearningError::InvalidInput(_))));
}

#[tokio::test]
async fn test_replace_serves_new_content_and_cleans_old() {
    let dir = TempDir::new().unwrap();
    let services = common::services(&dir);
    common::seed(&services, common::workshop_course());
    let packages = &services.packages;

    let first = packages
        .upload("safety-sco", Bytes::from(common::package_12()), false)
        .await
        .unwrap();
    assert_eq!(first.runtime_version, "scorm_1.2");
    assert_eq!(first.title.as_deref(), Some("Workshop Safety"));
    let file = packages.read_file("safety-sco", "index.html").await.unwrap();
    assert_eq!(file.content_type, "text/html; charset=utf-8");
    assert_eq!(file.body, b"<html><body>lesson</body></html>");

    // Second upload without replace is refused
    let updated = common::zip_of(&[
        ("imsmanifest.xml", common::MANIFEST_12),
        ("index.html", "<html><body>lesson v2</body></html>"),
    ]);
    let conflict = packages
        .upload("safety-sco", Bytes::from(updated.clone()), false)
        .await;
    assert!(matches!(conflict, Err(LearningError::Conflict(_))));

    let second = packages
        .upload("safety-sco", Bytes::from(updated), true)
        .await
        .unwrap();
    assert_ne!(second.storage_locator, first.storage_locator);
    assert_eq!(second.id, first.id);
    assert_eq!(second.uploaded_at, first.uploaded_at);

    let file = packages.read_file("safety-sco", "index.html").await.unwrap();
    assert_eq!(file.body, b"<html><body>lesson v2</body></html>");

    let old_dir = services.config.packages_dir().join(&first.storage_locator);
    assert!(wait_until_gone(&old_dir).await);
    assert!(services
        .config
        .packages_dir()
        .join(&second.storage_locator)
        .exists());
}

#[tokio::test]
async fn test_read_file_rejects_escaping_paths() {
    let dir = TempDir::new().unwrap();
    let services = common::services(&dir);
    common::seed(&services, common::workshop_course());
    services
        .packages
        .upload("safety-sco", Bytes::from(common::package_12()), false)
        .await
        .unwrap();

    let escaped = services.packages.read_file("safety-sco", "../../progress.db").await;
    assert!(matches!(escaped, Err(LearningError::InvalidInput(_))));

    let missing = services.packages.read_file("safety-sco", "missing.js").await;
    assert!(matches!(missing, Err(LearningError::NotFound(_))));
}

#[tokio::test]
async fn test_garbage_collect_keeps_current_package() {
    let dir = TempDir::new().unwrap();
    let services = common::services(&dir);
    common::seed(&services, common::workshop_course());
    let current = services
        .packages
        .upload("safety-sco", Bytes::from(common::package_12()), false)
        .await
        .unwrap();

    let root = services.config.packages_dir();
    let stray = root.join("safety-sco").join("0000stray");
    std::fs::create_dir_all(&stray).unwrap();
    let abandoned = root.join(".staging").join("abandoned");
    std::fs::create_dir_all(&abandoned).unwrap();

    let report = services.packages.garbage_collect().await.unwrap();
    assert_eq!(report.removed.len(), 2);
    assert!(report.failed.is_empty());
    assert!(!stray.exists());
    assert!(!abandoned.exists());
    assert!(root.join(&current.storage_locator).exists());
}

fn lesson_package(body: &str) -> Bytes {
    Bytes::from(common::zip_of(&[
        ("imsmanifest.xml", common::MANIFEST_12),
        ("index.html", body),
    ]))
}

async fn assert_serves(services: &Services, body: &str) {
    let file = services.packages.read_file("safety-sco", "index.html").await.unwrap();
    assert_eq!(file.body, body.as_bytes());
}

#[tokio::test]
async fn test_reverting_to_an_earlier_archive_keeps_it_servable() {
    let dir = TempDir::new().unwrap();
    let services = common::services(&dir);
    common::seed(&services, common::workshop_course());
    let packages = &services.packages;

    let (a, b) = ("<html>A</html>", "<html>B</html>");
    packages.upload("safety-sco", lesson_package(a), false).await.unwrap();

    // Flip between two byte-identical archives while cleanups of the
    // previous round are still in flight
    let mut locators = std::collections::HashSet::new();
    for round in 0..10 {
        let body = if round % 2 == 0 { b } else { a };
        let stored = packages.upload("safety-sco", lesson_package(body), true).await.unwrap();
        assert!(locators.insert(stored.storage_locator.clone()));
        assert_serves(&services, body).await;
    }

    // Once every cleanup has run, only the live directory is left
    let live = packages.get("safety-sco").unwrap().unwrap();
    let item_dir = services.config.packages_dir().join("safety-sco");
    let mut left = Vec::new();
    for _ in 0..100 {
        left = std::fs::read_dir(&item_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        if left.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(left.len(), 1);
    assert_eq!(format!("safety-sco/{}", left[0]), live.storage_locator);
    assert_serves(&services, a).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_garbage_collect_during_uploads_spares_new_packages() {
    let dir = TempDir::new().unwrap();
    let services = common::services(&dir);
    common::seed(&services, common::workshop_course());

    let sweeper = {
        let services = services.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                let report = services.packages.garbage_collect().await.unwrap();
                assert!(report.failed.is_empty());
                tokio::task::yield_now().await;
            }
        })
    };

    for round in 0..10 {
        let body = format!("<html>round {}</html>", round);
        let stored = services
            .packages
            .upload("safety-sco", lesson_package(&body), round > 0)
            .await
            .unwrap();
        assert!(services
            .config
            .packages_dir()
            .join(&stored.storage_locator)
            .exists());
        assert_serves(&services, &body).await;
    }
    sweeper.await.unwrap();

    let report = services.packages.garbage_collect().await.unwrap();
    assert!(report.failed.is_empty());
    assert_serves(&services, "<html>round 9</html>").await;
}

