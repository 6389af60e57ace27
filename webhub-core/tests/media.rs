use std::sync::Arc;

use http::Method;
use http_body_util::BodyExt;

use webhub_core::engines::media::{serve, MediaConfig};
use webhub_core::fs::{Filesystem, RealFilesystem};

fn cfg() -> MediaConfig {
    MediaConfig { allowed_extensions: vec!["mp4".to_string()], buffer_size: 4, caching_enabled: true, cache_max_age: 60 }
}

#[tokio::test]
async fn serves_full_file_from_real_filesystem() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("clip.mp4"), b"0123456789").expect("write fixture");
    let fs: Arc<dyn Filesystem> = Arc::new(RealFilesystem::new(dir.path()));

    let resp = serve(&Method::GET, None, "clip.mp4", &fs, &cfg()).await.expect("serve ok");
    assert_eq!(resp.status(), http::StatusCode::OK);
    assert_eq!(resp.headers().get(http::header::ACCEPT_RANGES).unwrap(), "bytes");

    let body = resp.into_body().collect().await.expect("collect").to_bytes();
    assert_eq!(&body[..], b"0123456789");
}

#[tokio::test]
async fn serves_byte_range_from_real_filesystem() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("clip.mp4"), b"0123456789").expect("write fixture");
    let fs: Arc<dyn Filesystem> = Arc::new(RealFilesystem::new(dir.path()));

    let resp = serve(&Method::GET, Some("bytes=2-4"), "clip.mp4", &fs, &cfg()).await.expect("serve ok");
    assert_eq!(resp.status(), http::StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers().get(http::header::CONTENT_RANGE).unwrap(), "bytes 2-4/10");

    let body = resp.into_body().collect().await.expect("collect").to_bytes();
    assert_eq!(&body[..], b"234");
}

#[tokio::test]
async fn rejects_disallowed_extension() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("notes.txt"), b"hello").expect("write fixture");
    let fs: Arc<dyn Filesystem> = Arc::new(RealFilesystem::new(dir.path()));

    let err = serve(&Method::GET, None, "notes.txt", &fs, &cfg()).await.unwrap_err();
    assert!(matches!(err, webhub_core::error::ProxyError::Engine(webhub_core::error::ErrorKind::Forbidden)));
}

#[tokio::test]
async fn missing_file_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fs: Arc<dyn Filesystem> = Arc::new(RealFilesystem::new(dir.path()));

    let err = serve(&Method::GET, None, "ghost.mp4", &fs, &cfg()).await.unwrap_err();
    assert!(matches!(err, webhub_core::error::ProxyError::Engine(webhub_core::error::ErrorKind::NotFound)));
}
