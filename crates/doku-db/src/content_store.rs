//! Filesystem-backed content store.
//!
//! Objects are stored at `{base_path}/{key}`. Writes go to a temp file that is
//! renamed into place, so readers never observe a partially written object.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use doku_core::{ContentStore, Error, Result};

/// Content store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FilesystemContentStore {
    base_path: PathBuf,
}

impl FilesystemContentStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Build from `CONTENT_STORE_PATH`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("CONTENT_STORE_PATH")
            .map_err(|_| Error::Config("CONTENT_STORE_PATH is not set".to_string()))?;
        Ok(Self::new(path))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a key below the base path, rejecting absolute keys and `..`.
    fn full_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::Storage(format!("invalid object key: {}", key)));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl ContentStore for FilesystemContentStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(key)?;
        fs::read(&full_path).await.map_err(|e| {
            debug!(
                subsystem = "db",
                component = "content_store",
                object_key = %key,
                error = %e,
                "content_store: read failed"
            );
            Error::Storage(format!("read {}: {}", key, e))
        })
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let full_path = self.full_path(key)?;
        debug!(
            subsystem = "db",
            component = "content_store",
            object_key = %key,
            byte_len = bytes.len(),
            "content_store: write"
        );

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "content_store: create_dir_all failed");
                Error::Storage(format!("create {}: {}", parent.display(), e))
            })?;
        }

        // Unique temp name so concurrent writers of one key never share a file
        let temp_path = full_path.with_file_name(format!(
            ".{}.{}.tmp",
            full_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Uuid::new_v4()
        ));

        let write = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &full_path).await
        };

        if let Err(e) = write.await {
            warn!(
                subsystem = "db",
                component = "content_store",
                object_key = %key,
                error = %e,
                "content_store: atomic write failed"
            );
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::Storage(format!("write {}: {}", key, e)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemContentStore::new(dir.path());

        store.put("uploads/2024/a.jpg", b"jpeg-bytes").await.unwrap();
        assert_eq!(store.get("uploads/2024/a.jpg").await.unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemContentStore::new(dir.path());

        store.put("a.jpg", b"one").await.unwrap();
        store.put("a.jpg", b"two").await.unwrap();
        assert_eq!(store.get("a.jpg").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_put_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemContentStore::new(dir.path());

        store.put("x/b.jpg", b"data").await.unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path().join("x"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_object_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemContentStore::new(dir.path());

        let err = store.get("nope.jpg").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemContentStore::new(dir.path());

        assert!(store.put("../escape.jpg", b"x").await.is_err());
        assert!(store.put("/etc/passwd", b"x").await.is_err());
        assert!(store.get("a/../../b").await.is_err());
        assert!(store.get("").await.is_err());
    }
}
