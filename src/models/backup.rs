//! Backup model: one captured artifact inside a chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Backup mode enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "backup_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BackupMode {
    Full,
    Incremental,
}

impl std::fmt::Display for BackupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupMode::Full => write!(f, "full"),
            BackupMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Backup status enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "backup_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupStatus::Pending => write!(f, "pending"),
            BackupStatus::Running => write!(f, "running"),
            BackupStatus::Completed => write!(f, "completed"),
            BackupStatus::Failed => write!(f, "failed"),
            BackupStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Backed-up source kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "source_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Vm,
    Container,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Vm => write!(f, "vm"),
            SourceType::Container => write!(f, "container"),
        }
    }
}

/// Backup entity.
///
/// A chain groups one full backup (`sequence_number = 0`) with its
/// descendant incrementals under a shared `chain_id`. Once a row reaches
/// `completed`, its chain-identity fields (`chain_id`, `sequence_number`,
/// `parent_backup_id`) never change; only the protection fields may be
/// mutated afterwards, and only to become more protective.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Backup {
    pub id: Uuid,
    pub chain_id: Uuid,
    pub sequence_number: i32,
    pub parent_backup_id: Option<Uuid>,
    pub backup_mode: BackupMode,
    pub size_bytes: Option<i64>,
    pub compressed_size_bytes: Option<i64>,
    pub checksum: Option<String>,
    pub storage_path: Option<String>,
    pub storage_backend_id: Uuid,
    pub status: BackupStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub verified: bool,
    pub immutable: bool,
    pub retention_until: Option<DateTime<Utc>>,
    pub legal_hold_enabled: bool,
    pub source_type: SourceType,
    pub source_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub checkpoint_token: Option<String>,
    pub error_message: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Backup {
    /// Hard deletion veto: immutability, legal hold, or an unexpired
    /// retention lock, independent of retention-bucket outcome.
    pub fn is_protected(&self, now: DateTime<Utc>) -> bool {
        if self.immutable || self.legal_hold_enabled {
            return true;
        }
        matches!(self.retention_until, Some(until) if until > now)
    }

    /// Whether this row can anchor or extend a restorable chain.
    pub fn is_live_completed(&self) -> bool {
        self.status == BackupStatus::Completed && !self.is_deleted
    }
}
