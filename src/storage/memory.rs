//! In-memory storage backend.
//!
//! Backs tests and ephemeral deployments; artifacts do not survive a
//! process restart.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{sha256_hex, PutResult, StorageGateway, StorageUsage};
use crate::error::{AppError, Result};

/// Process-local storage backend.
#[derive(Default)]
pub struct MemoryGateway {
    objects: RwLock<BTreeMap<String, Bytes>>,
    capacity_bytes: Option<i64>,
}

impl MemoryGateway {
    pub fn new(capacity_bytes: Option<i64>) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            capacity_bytes,
        }
    }

    fn objects(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Bytes>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn objects_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Bytes>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StorageGateway for MemoryGateway {
    async fn put(&self, path: &str, content: Bytes) -> Result<PutResult> {
        let result = PutResult {
            checksum: sha256_hex(&content),
            size_bytes: content.len() as i64,
        };
        self.objects_mut().insert(path.to_owned(), content);
        Ok(result)
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        self.objects()
            .get(path)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("artifact not found: {path}")))
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        self.objects_mut().remove(path);
        Ok(true)
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let prefix = prefix.unwrap_or("");
        Ok(self
            .objects()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn usage(&self) -> Result<StorageUsage> {
        let used: i64 = self.objects().values().map(|v| v.len() as i64).sum();
        Ok(StorageUsage {
            used_bytes: used,
            capacity_bytes: self.capacity_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_and_usage() {
        let gw = MemoryGateway::new(Some(100));
        let put = gw.put("x/y", Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(put.size_bytes, 3);

        assert_eq!(gw.get("x/y").await.unwrap().as_ref(), b"abc");
        assert_eq!(
            gw.usage().await.unwrap(),
            StorageUsage {
                used_bytes: 3,
                capacity_bytes: Some(100)
            }
        );

        assert!(gw.delete("x/y").await.unwrap());
        assert!(gw.delete("x/y").await.unwrap());
        assert!(matches!(
            gw.get("x/y").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let gw = MemoryGateway::new(None);
        gw.put("chains/a/0", Bytes::new()).await.unwrap();
        gw.put("chains/b/0", Bytes::new()).await.unwrap();
        let listed = gw.list(Some("chains/a/")).await.unwrap();
        assert_eq!(listed, vec!["chains/a/0".to_string()]);
    }
}
