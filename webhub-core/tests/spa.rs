use std::sync::Arc;

use webhub_core::fs::{Filesystem, RealFilesystem};
use webhub_core::routing::PathPrefix;
use webhub_core::spa::{cache_control_for, content_type_for, resolve_storage_path, SpaConfig};

fn cfg() -> SpaConfig {
    SpaConfig {
        mount_url: "/".to_string(),
        default_route: "index".to_string(),
        virtual_segment: "p".to_string(),
        listener_prefix: PathPrefix::new(""),
        cache_max_age: 120,
        auth_skip: Vec::new(),
        login_path: "/login".to_string(),
    }
}

#[tokio::test]
async fn serves_app_index_from_real_filesystem() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("about")).expect("mkdir");
    std::fs::write(dir.path().join("about/index.html"), b"<html>about</html>").expect("write fixture");
    let fs: Arc<dyn Filesystem> = Arc::new(RealFilesystem::new(dir.path()));

    let storage = resolve_storage_path("/about", &cfg()).expect("resolve ok");
    assert_eq!(storage, "about/index.html");
    assert!(fs.exists(&storage).await);
    assert!(!fs.is_dir(&storage).await);

    let bytes = fs.read(&storage).await.expect("read ok");
    assert_eq!(bytes, b"<html>about</html>");
    assert_eq!(content_type_for(&storage), "text/html; charset=utf-8");
    assert_eq!(cache_control_for(&storage, &cfg()), "no-cache, no-store, must-revalidate");
}

#[tokio::test]
async fn serves_static_asset_with_cache_headers() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("about/assets")).expect("mkdir");
    std::fs::write(dir.path().join("about/assets/app.js"), b"console.log(1)").expect("write fixture");
    let fs: Arc<dyn Filesystem> = Arc::new(RealFilesystem::new(dir.path()));

    let storage = resolve_storage_path("/about/assets/app.js", &cfg()).expect("resolve ok");
    assert_eq!(storage, "about/assets/app.js");
    let bytes = fs.read(&storage).await.expect("read ok");
    assert_eq!(bytes, b"console.log(1)");
    assert_eq!(content_type_for(&storage), "application/javascript; charset=utf-8");
    assert_eq!(cache_control_for(&storage, &cfg()), "public, max-age=120");
}

#[tokio::test]
async fn rejects_traversal_before_touching_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fs: Arc<dyn Filesystem> = Arc::new(RealFilesystem::new(dir.path()));

    let err = resolve_storage_path("/about/../../etc/passwd", &cfg()).unwrap_err();
    assert!(matches!(err, webhub_core::error::ProxyError::Engine(webhub_core::error::ErrorKind::BadRequest(_))));
    assert!(!fs.exists("etc/passwd").await);
}

#[tokio::test]
async fn missing_app_directory_reports_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fs: Arc<dyn Filesystem> = Arc::new(RealFilesystem::new(dir.path()));

    let storage = resolve_storage_path("/ghost", &cfg()).expect("resolve ok");
    assert_eq!(storage, "ghost/index.html");
    assert!(!fs.exists(&storage).await);
}
