//! Storage gateway boundary and backends.
//!
//! The engine consumes storage through the [`StorageGateway`] trait; the
//! concrete S3/SMB drivers live outside this crate and register themselves
//! by kind. The filesystem and in-memory backends here are the reference
//! implementations.

pub mod filesystem;
pub mod memory;
pub mod retry;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Result of storing an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutResult {
    /// SHA-256 of the stored content, lowercase hex.
    pub checksum: String,
    pub size_bytes: i64,
}

/// Space accounting for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub used_bytes: i64,
    /// `None` when the backend has no configured cap.
    pub capacity_bytes: Option<i64>,
}

/// Uniform operations against one named backend.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Store an artifact, returning its size and content checksum.
    async fn put(&self, path: &str, content: Bytes) -> Result<PutResult>;

    /// Retrieve an artifact.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Delete an artifact. Returns true when it was removed or was
    /// already absent, so retention sweeps can re-run safely.
    async fn delete(&self, path: &str) -> Result<bool>;

    /// List artifact paths, optionally under a prefix.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>>;

    /// Current space accounting.
    async fn usage(&self) -> Result<StorageUsage>;
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
