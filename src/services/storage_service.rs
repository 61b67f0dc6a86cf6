//! Storage service: named-backend registry and facade.
//!
//! Routes gateway calls by backend id and wraps them in bounded retry so
//! transient backend trouble surfaces as `StorageUnavailable` only after
//! the attempt budget is spent.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::storage_backend::StorageBackendRow;
use crate::storage::filesystem::FilesystemGateway;
use crate::storage::memory::MemoryGateway;
use crate::storage::retry::{with_backoff, RetryPolicy};
use crate::storage::{PutResult, StorageGateway, StorageUsage};

pub struct StorageService {
    gateways: RwLock<HashMap<Uuid, Arc<dyn StorageGateway>>>,
    retry: RetryPolicy,
}

impl StorageService {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            gateways: RwLock::new(HashMap::new()),
            retry,
        }
    }

    /// Build the registry from persisted backend rows. Rows whose kind has
    /// no in-process driver are skipped with a warning; external drivers
    /// register themselves later via [`StorageService::register`].
    pub fn from_rows(rows: &[StorageBackendRow], retry: RetryPolicy) -> Self {
        let service = Self::new(retry);
        for row in rows {
            if !row.enabled {
                continue;
            }
            match build_gateway(row) {
                Ok(Some(gateway)) => service.register(row.id, gateway),
                Ok(None) => {
                    tracing::warn!(
                        backend = %row.name,
                        kind = %row.kind,
                        "no in-process driver for storage backend kind, skipping"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        backend = %row.name,
                        kind = %row.kind,
                        error = %e,
                        "failed to configure storage backend, skipping"
                    );
                }
            }
        }
        service
    }

    pub fn register(&self, backend_id: Uuid, gateway: Arc<dyn StorageGateway>) {
        self.gateways
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(backend_id, gateway);
    }

    fn gateway(&self, backend_id: Uuid) -> Result<Arc<dyn StorageGateway>> {
        self.gateways
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&backend_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Storage backend {backend_id} not registered")))
    }

    pub async fn put(&self, backend_id: Uuid, path: &str, content: Bytes) -> Result<PutResult> {
        let gateway = self.gateway(backend_id)?;
        with_backoff(self.retry, "storage.put", || {
            let gateway = gateway.clone();
            let content = content.clone();
            async move { gateway.put(path, content).await }
        })
        .await
    }

    pub async fn get(&self, backend_id: Uuid, path: &str) -> Result<Bytes> {
        let gateway = self.gateway(backend_id)?;
        with_backoff(self.retry, "storage.get", || {
            let gateway = gateway.clone();
            async move { gateway.get(path).await }
        })
        .await
    }

    /// Returns true when the artifact was removed or was already absent.
    pub async fn delete(&self, backend_id: Uuid, path: &str) -> Result<bool> {
        let gateway = self.gateway(backend_id)?;
        with_backoff(self.retry, "storage.delete", || {
            let gateway = gateway.clone();
            async move { gateway.delete(path).await }
        })
        .await
    }

    pub async fn list(&self, backend_id: Uuid, prefix: Option<&str>) -> Result<Vec<String>> {
        let gateway = self.gateway(backend_id)?;
        with_backoff(self.retry, "storage.list", || {
            let gateway = gateway.clone();
            async move { gateway.list(prefix).await }
        })
        .await
    }

    pub async fn usage(&self, backend_id: Uuid) -> Result<StorageUsage> {
        let gateway = self.gateway(backend_id)?;
        with_backoff(self.retry, "storage.usage", || {
            let gateway = gateway.clone();
            async move { gateway.usage().await }
        })
        .await
    }
}

fn build_gateway(row: &StorageBackendRow) -> Result<Option<Arc<dyn StorageGateway>>> {
    let capacity = row
        .config
        .get("capacity_bytes")
        .and_then(|v| v.as_i64());
    match row.kind.as_str() {
        "filesystem" => {
            let path = row
                .config
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    AppError::Validation("filesystem backend requires 'path' in config".into())
                })?;
            Ok(Some(Arc::new(FilesystemGateway::new(path, capacity))))
        }
        "memory" => Ok(Some(Arc::new(MemoryGateway::new(capacity)))),
        _ => Ok(None),
    }
}
