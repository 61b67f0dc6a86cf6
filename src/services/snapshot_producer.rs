//! Snapshot producer boundary.
//!
//! The actual capture mechanics (libvirt block jobs, Podman exports) live
//! outside this crate; the engine only consumes this trait. Tests drive it
//! with a scripted implementation.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::Result;
use crate::models::backup::{BackupMode, SourceType};
use crate::models::schedule::Schedule;

/// The source a snapshot is taken of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotSource {
    pub source_type: SourceType,
    pub source_id: Uuid,
}

impl SnapshotSource {
    pub fn from_schedule(schedule: &Schedule) -> Self {
        Self {
            source_type: schedule.source_type,
            source_id: schedule.source_id,
        }
    }
}

/// Result of a capture.
#[derive(Debug, Clone)]
pub struct Capture {
    pub data: Bytes,
    pub size_bytes: i64,
    pub compressed_size_bytes: Option<i64>,
    /// SHA-256 of the captured data, lowercase hex.
    pub checksum: String,
    /// Opaque change-tracking state for the next incremental capture.
    pub new_checkpoint_token: Option<String>,
}

/// Performs the actual full/incremental data capture.
#[async_trait]
pub trait SnapshotProducer: Send + Sync {
    /// Whether this source supports incremental capture at all.
    async fn probe_incremental_capability(&self, source: &SnapshotSource) -> Result<bool>;

    /// Capture the source. For incrementals, `checkpoint_token` is the
    /// baseline to diff against; the returned token is the next baseline.
    async fn capture(
        &self,
        source: &SnapshotSource,
        mode: BackupMode,
        checkpoint_token: Option<&str>,
    ) -> Result<Capture>;
}
