//! Backup row lifecycle: creation, status transitions, protection, and
//! lookup queries shared by the chain, retention, and restore services.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::chain::builder::ChainDecision;
use crate::error::{AppError, Result};
use crate::models::backup::{Backup, BackupStatus, SourceType};

const BACKUP_COLUMNS: &str = "\
    id, chain_id, sequence_number, parent_backup_id, backup_mode, \
    size_bytes, compressed_size_bytes, checksum, storage_path, \
    storage_backend_id, status, started_at, completed_at, verified, \
    immutable, retention_until, legal_hold_enabled, source_type, source_id, \
    schedule_id, checkpoint_token, error_message, is_deleted, deleted_at, \
    created_at";

/// Facts recorded when a capture-and-upload finishes.
#[derive(Debug, Clone)]
pub struct CompletionFacts {
    pub size_bytes: i64,
    pub compressed_size_bytes: Option<i64>,
    pub checksum: String,
    pub storage_path: String,
    pub verified: bool,
    pub checkpoint_token: Option<String>,
}

/// Protection changes; each field may only move toward more protection.
#[derive(Debug, Clone, Default)]
pub struct ProtectionUpdate {
    pub immutable: Option<bool>,
    pub retention_until: Option<DateTime<Utc>>,
    pub legal_hold_enabled: Option<bool>,
}

pub struct BackupService {
    db: PgPool,
}

impl BackupService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Get backup by ID (including soft-deleted rows).
    pub async fn get_by_id(&self, id: Uuid) -> Result<Backup> {
        let sql = format!("SELECT {BACKUP_COLUMNS} FROM backups WHERE id = $1");
        sqlx::query_as::<_, Backup>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backup {id} not found")))
    }

    /// List backups with optional filters, newest first.
    pub async fn list(
        &self,
        source: Option<(SourceType, Uuid)>,
        status: Option<BackupStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Backup>, i64)> {
        let (source_type, source_id) = match source {
            Some((t, id)) => (Some(t), Some(id)),
            None => (None, None),
        };

        let sql = format!(
            "SELECT {BACKUP_COLUMNS} FROM backups \
             WHERE is_deleted = false \
               AND ($1::source_type IS NULL OR source_type = $1) \
               AND ($2::UUID IS NULL OR source_id = $2) \
               AND ($3::backup_status IS NULL OR status = $3) \
             ORDER BY created_at DESC \
             OFFSET $4 LIMIT $5"
        );
        let backups = sqlx::query_as::<_, Backup>(&sql)
            .bind(source_type)
            .bind(source_id)
            .bind(status)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.db)
            .await?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM backups \
             WHERE is_deleted = false \
               AND ($1::source_type IS NULL OR source_type = $1) \
               AND ($2::UUID IS NULL OR source_id = $2) \
               AND ($3::backup_status IS NULL OR status = $3)",
        )
        .bind(source_type)
        .bind(source_id)
        .bind(status)
        .fetch_one(&self.db)
        .await?;

        Ok((backups, total))
    }

    /// All non-deleted rows of one chain, in sequence order.
    pub async fn list_chain(&self, chain_id: Uuid) -> Result<Vec<Backup>> {
        let sql = format!(
            "SELECT {BACKUP_COLUMNS} FROM backups \
             WHERE chain_id = $1 AND is_deleted = false \
             ORDER BY sequence_number, created_at"
        );
        Ok(sqlx::query_as::<_, Backup>(&sql)
            .bind(chain_id)
            .fetch_all(&self.db)
            .await?)
    }

    /// All non-deleted rows for one source across chains.
    pub async fn list_source(
        &self,
        source_type: SourceType,
        source_id: Uuid,
    ) -> Result<Vec<Backup>> {
        let sql = format!(
            "SELECT {BACKUP_COLUMNS} FROM backups \
             WHERE source_type = $1 AND source_id = $2 AND is_deleted = false \
             ORDER BY created_at"
        );
        Ok(sqlx::query_as::<_, Backup>(&sql)
            .bind(source_type)
            .bind(source_id)
            .fetch_all(&self.db)
            .await?)
    }

    /// The most recent completed backup for a source. Failed and cancelled
    /// rows never qualify, so chain derivation walks past them implicitly.
    pub async fn latest_completed(
        &self,
        source_type: SourceType,
        source_id: Uuid,
    ) -> Result<Option<Backup>> {
        let sql = format!(
            "SELECT {BACKUP_COLUMNS} FROM backups \
             WHERE source_type = $1 AND source_id = $2 \
               AND status = 'completed' AND is_deleted = false \
             ORDER BY completed_at DESC NULLS LAST, sequence_number DESC \
             LIMIT 1"
        );
        Ok(sqlx::query_as::<_, Backup>(&sql)
            .bind(source_type)
            .bind(source_id)
            .fetch_optional(&self.db)
            .await?)
    }

    /// Insert a pending row carrying a chain decision. Fails with the
    /// database's unique violation when another trigger claimed the same
    /// (chain, sequence) slot first; the chain service retries derivation.
    pub async fn create_from_decision(
        &self,
        decision: &ChainDecision,
        source_type: SourceType,
        source_id: Uuid,
        storage_backend_id: Uuid,
        schedule_id: Option<Uuid>,
    ) -> Result<Backup> {
        let sql = format!(
            "INSERT INTO backups \
                (chain_id, sequence_number, parent_backup_id, backup_mode, \
                 storage_backend_id, status, source_type, source_id, \
                 schedule_id, checkpoint_token) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8, $9) \
             RETURNING {BACKUP_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Backup>(&sql)
            .bind(decision.chain_id)
            .bind(decision.sequence_number)
            .bind(decision.parent_backup_id)
            .bind(decision.backup_mode)
            .bind(storage_backend_id)
            .bind(source_type)
            .bind(source_id)
            .bind(schedule_id)
            .bind(decision.checkpoint_token.as_deref())
            .fetch_one(&self.db)
            .await?)
    }

    /// pending -> running. Errors with Conflict when the row moved on
    /// (e.g. was cancelled before capture started).
    pub async fn mark_running(&self, id: Uuid) -> Result<Backup> {
        let sql = format!(
            "UPDATE backups SET status = 'running', started_at = NOW() \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {BACKUP_COLUMNS}"
        );
        sqlx::query_as::<_, Backup>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::Conflict(format!("Backup {id} is not pending")))
    }

    /// running -> completed. The guard on the current status means a row
    /// cancelled mid-capture can never become completed.
    pub async fn complete(&self, id: Uuid, facts: &CompletionFacts) -> Result<Option<Backup>> {
        let sql = format!(
            "UPDATE backups \
             SET status = 'completed', completed_at = NOW(), \
                 size_bytes = $2, compressed_size_bytes = $3, checksum = $4, \
                 storage_path = $5, verified = $6, checkpoint_token = $7 \
             WHERE id = $1 AND status = 'running' \
             RETURNING {BACKUP_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Backup>(&sql)
            .bind(id)
            .bind(facts.size_bytes)
            .bind(facts.compressed_size_bytes)
            .bind(&facts.checksum)
            .bind(&facts.storage_path)
            .bind(facts.verified)
            .bind(facts.checkpoint_token.as_deref())
            .fetch_optional(&self.db)
            .await?)
    }

    /// pending/running -> failed, recording the capture error.
    pub async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE backups \
             SET status = 'failed', completed_at = NOW(), error_message = $2 \
             WHERE id = $1 AND status IN ('pending', 'running')",
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Cancel a pending or running backup.
    pub async fn cancel(&self, id: Uuid) -> Result<Backup> {
        let sql = format!(
            "UPDATE backups SET status = 'cancelled', completed_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'running') \
             RETURNING {BACKUP_COLUMNS}"
        );
        sqlx::query_as::<_, Backup>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| {
                AppError::Validation("Only pending or running backups can be cancelled".into())
            })
    }

    /// Mark the row deleted after the storage gateway confirmed artifact
    /// removal. Safe to repeat.
    pub async fn mark_deleted(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE backups SET is_deleted = true, deleted_at = NOW() \
             WHERE id = $1 AND is_deleted = false",
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Apply a protection update. Protection only ratchets up: immutability
    /// and legal hold cannot be cleared here, and a retention lock can only
    /// be extended.
    pub async fn set_protection(&self, id: Uuid, update: ProtectionUpdate) -> Result<Backup> {
        let current = self.get_by_id(id).await?;

        if update.immutable == Some(false) && current.immutable {
            return Err(AppError::Validation(
                "Immutability cannot be removed from a backup".into(),
            ));
        }
        if update.legal_hold_enabled == Some(false) && current.legal_hold_enabled {
            return Err(AppError::Validation(
                "Legal hold cannot be released through this interface".into(),
            ));
        }
        if let (Some(new_until), Some(existing)) = (update.retention_until, current.retention_until)
        {
            if new_until < existing {
                return Err(AppError::Validation(
                    "A retention lock can only be extended, not shortened".into(),
                ));
            }
        }

        let immutable = update.immutable.unwrap_or(current.immutable);
        let retention_until = update.retention_until.or(current.retention_until);
        let legal_hold = update
            .legal_hold_enabled
            .unwrap_or(current.legal_hold_enabled);

        if immutable && retention_until.is_none() {
            return Err(AppError::Validation(
                "An immutable backup requires retention_until".into(),
            ));
        }

        let sql = format!(
            "UPDATE backups \
             SET immutable = $2, retention_until = $3, legal_hold_enabled = $4 \
             WHERE id = $1 \
             RETURNING {BACKUP_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Backup>(&sql)
            .bind(id)
            .bind(immutable)
            .bind(retention_until)
            .bind(legal_hold)
            .fetch_one(&self.db)
            .await?)
    }
}

/// Whether a database error is the unique violation raised when two
/// triggers race for the same (chain, sequence) slot.
pub fn is_chain_slot_conflict(err: &AppError) -> bool {
    match err {
        AppError::Database(sqlx::Error::Database(db)) => {
            db.constraint() == Some("backups_chain_seq_active_idx")
        }
        _ => false,
    }
}
