//! Schedule model: recurring backup trigger configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::chain::retention::RetentionConfig;
use crate::models::backup::SourceType;

/// How the chain builder picks between full and incremental backups.
///
/// `max_chain_length` and `full_backup_day` are hard overrides that force a
/// full regardless of policy. `Auto` and `IncrementalPreferred` differ only
/// in how a failed incremental-capability probe is handled: `Auto` downgrades
/// to full immediately, `IncrementalPreferred` retries the probe once first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "backup_mode_policy", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BackupModePolicy {
    Auto,
    FullOnly,
    IncrementalPreferred,
}

/// Schedule entity.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Schedule {
    pub id: Uuid,
    pub name: String,
    pub source_type: SourceType,
    pub source_id: Uuid,
    pub storage_backend_id: Uuid,
    pub backup_mode_policy: BackupModePolicy,
    /// Maximum sequence number a chain may reach before the next
    /// incremental is forced to start a new chain.
    pub max_chain_length: i32,
    /// Optional calendar anchor (day of month) that forces a new chain.
    pub full_backup_day: Option<i32>,
    pub last_full_backup_id: Option<Uuid>,
    /// Change-tracking baseline carried to the snapshot producer.
    pub checkpoint_name: Option<String>,
    pub retention_config: Json<RetentionConfig>,
    pub cron_expression: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn retention(&self) -> &RetentionConfig {
        &self.retention_config.0
    }
}
