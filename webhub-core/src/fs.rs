//! The filesystem adapter: a capability trait consumed by every
//! content-serving engine (SPA resolver, range media engine) so they never
//! touch `std::fs`/`tokio::fs` directly. This is the seam that lets tests
//! substitute an in-memory filesystem (grounded in the teacher's preference
//! for trait-based I/O boundaries, e.g. its `CryptoSource` abstraction).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;

/// Metadata about a single filesystem entry.
#[derive(Debug, Clone)]
pub struct Stat {
    pub size: u64,
    pub modified: SystemTime,
    pub is_dir: bool,
}

#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Read an entire file's contents.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Read `len` bytes starting at `offset`. Implementations may read the
    /// whole file and slice, or seek; seeking is preferred for large files.
    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Overwrite (or create) a file with the given contents.
    async fn write(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Whether an entry exists at `path`.
    async fn exists(&self, path: &str) -> bool;

    /// Metadata for `path`; fails if the entry does not exist.
    async fn stat(&self, path: &str) -> Result<Stat>;

    /// List the immediate children of a directory, as path-relative names.
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    /// Whether `path` names a directory. `false` for non-existent paths.
    async fn is_dir(&self, path: &str) -> bool;

    /// The root the adapter resolves relative paths against.
    fn base_path(&self) -> &Path;
}

/// A [`Filesystem`] backed by the real OS filesystem, rooted at `base`.
/// Every path is joined under `base` before use; callers are expected to
/// have already validated the path is relative and does not escape (see
/// `crate::spa::validate_storage_path`).
pub struct RealFilesystem {
    base: PathBuf,
}

impl RealFilesystem {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.base.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Filesystem for RealFilesystem {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.resolve(path)).await?)
    }

    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        let mut file = tokio::fs::File::open(self.resolve(path)).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::write(full, contents).await?)
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(self.resolve(path)).await.is_ok()
    }

    async fn stat(&self, path: &str) -> Result<Stat> {
        let meta = tokio::fs::metadata(self.resolve(path)).await?;
        Ok(Stat {
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_dir: meta.is_dir(),
        })
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(self.resolve(path)).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn is_dir(&self, path: &str) -> bool {
        tokio::fs::metadata(self.resolve(path))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    fn base_path(&self) -> &Path {
        &self.base
    }
}

#[cfg(test)]
pub mod memory {
    //! An in-memory [`Filesystem`] used throughout the engine test suites so
    //! range/SPA behavior can be exercised without touching disk.
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub struct MemoryFilesystem {
        files: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemoryFilesystem {
        pub fn new() -> Self {
            Self { files: Mutex::new(HashMap::new()) }
        }

        pub fn with_file(self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
            self.files.lock().unwrap().insert(normalize(path), contents.into());
            self
        }
    }

    impl Default for MemoryFilesystem {
        fn default() -> Self {
            Self::new()
        }
    }

    fn normalize(path: &str) -> String {
        path.trim_start_matches('/').to_string()
    }

    #[async_trait]
    impl Filesystem for MemoryFilesystem {
        async fn read(&self, path: &str) -> Result<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(&normalize(path))
                .cloned()
                .ok_or_else(|| crate::error::ErrorKind::NotFound.into())
        }

        async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
            let data = self.read(path).await?;
            let start = offset as usize;
            let end = (start + len as usize).min(data.len());
            Ok(data[start..end].to_vec())
        }

        async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
            self.files.lock().unwrap().insert(normalize(path), contents.to_vec());
            Ok(())
        }

        async fn exists(&self, path: &str) -> bool {
            let key = normalize(path);
            let files = self.files.lock().unwrap();
            files.contains_key(&key) || files.keys().any(|k| k.starts_with(&format!("{key}/")))
        }

        async fn stat(&self, path: &str) -> Result<Stat> {
            let files = self.files.lock().unwrap();
            let key = normalize(path);
            if let Some(data) = files.get(&key) {
                return Ok(Stat { size: data.len() as u64, modified: SystemTime::UNIX_EPOCH, is_dir: false });
            }
            if files.keys().any(|k| k.starts_with(&format!("{key}/"))) {
                return Ok(Stat { size: 0, modified: SystemTime::UNIX_EPOCH, is_dir: true });
            }
            Err(crate::error::ErrorKind::NotFound.into())
        }

        async fn list(&self, path: &str) -> Result<Vec<String>> {
            let prefix = format!("{}/", normalize(path));
            Ok(self
                .files
                .lock()
                .unwrap()
                .keys()
                .filter_map(|k| k.strip_prefix(&prefix))
                .map(|s| s.to_string())
                .collect())
        }

        async fn is_dir(&self, path: &str) -> bool {
            self.stat(path).await.map(|s| s.is_dir).unwrap_or(false)
        }

        fn base_path(&self) -> &Path {
            Path::new("/")
        }
    }
}
