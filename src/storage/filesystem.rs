//! Filesystem storage backend.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{sha256_hex, PutResult, StorageGateway, StorageUsage};
use crate::error::{AppError, Result};

/// Filesystem-based storage backend.
pub struct FilesystemGateway {
    base_path: PathBuf,
    capacity_bytes: Option<i64>,
}

impl FilesystemGateway {
    pub fn new(base_path: impl Into<PathBuf>, capacity_bytes: Option<i64>) -> Self {
        Self {
            base_path: base_path.into(),
            capacity_bytes,
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() || path.split('/').any(|part| part == ".." || part == "") {
            return Err(AppError::Validation(format!(
                "invalid storage path: {path}"
            )));
        }
        Ok(self.base_path.join(path))
    }
}

#[async_trait]
impl StorageGateway for FilesystemGateway {
    async fn put(&self, path: &str, content: Bytes) -> Result<PutResult> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write through a temp file so a crash never leaves a half-written
        // artifact at the final path.
        let temp = target.with_extension("tmp");
        let mut file = fs::File::create(&temp).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, &target).await?;

        Ok(PutResult {
            checksum: sha256_hex(&content),
            size_bytes: content.len() as i64,
        })
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let target = self.resolve(path)?;
        let content = fs::read(&target).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("artifact not found: {path}"))
            } else {
                AppError::Storage(format!("failed to read {path}: {e}"))
            }
        })?;
        Ok(Bytes::from(content))
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(AppError::Storage(format!("failed to delete {path}: {e}"))),
        }
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let start = match prefix {
            Some(p) => self.resolve(p)?,
            None => self.base_path.clone(),
        };

        let mut paths = Vec::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if !current.exists() {
                continue;
            }
            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.base_path) {
                    paths.push(relative.to_string_lossy().to_string());
                }
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn usage(&self) -> Result<StorageUsage> {
        let mut used: i64 = 0;
        let mut stack = vec![self.base_path.clone()];
        while let Some(current) = stack.pop() {
            if !current.exists() {
                continue;
            }
            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    used += entry.metadata().await?.len() as i64;
                }
            }
        }
        Ok(StorageUsage {
            used_bytes: used,
            capacity_bytes: self.capacity_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(dir: &tempfile::TempDir) -> FilesystemGateway {
        FilesystemGateway::new(dir.path(), Some(1 << 30))
    }

    #[tokio::test]
    async fn put_get_roundtrip_with_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);

        let result = gw
            .put("chains/c1/00000", Bytes::from_static(b"full backup"))
            .await
            .unwrap();
        assert_eq!(result.size_bytes, 11);
        assert_eq!(result.checksum, sha256_hex(b"full backup"));

        let fetched = gw.get("chains/c1/00000").await.unwrap();
        assert_eq!(fetched.as_ref(), b"full backup");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        gw.put("a/b", Bytes::from_static(b"x")).await.unwrap();

        assert!(gw.delete("a/b").await.unwrap());
        // Already absent: still true, never an error.
        assert!(gw.delete("a/b").await.unwrap());
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        assert!(matches!(
            gw.get("nope").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        assert!(matches!(
            gw.put("../escape", Bytes::from_static(b"x")).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn usage_counts_stored_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(&dir);
        gw.put("a/one", Bytes::from_static(b"12345")).await.unwrap();
        gw.put("b/two", Bytes::from_static(b"123")).await.unwrap();

        let usage = gw.usage().await.unwrap();
        assert_eq!(usage.used_bytes, 8);
        assert_eq!(usage.capacity_bytes, Some(1 << 30));

        let listed = gw.list(None).await.unwrap();
        assert_eq!(listed, vec!["a/one".to_string(), "b/two".to_string()]);
    }
}
