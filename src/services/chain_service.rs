//! Chain service: locked chain derivation and backup job execution.
//!
//! The decision step ("find the most recent completed backup, derive the
//! next slot, insert the row") is exclusive per source; the long-running
//! capture and upload run outside the lock, so concurrent sources proceed
//! freely and a second trigger for the same source only waits for the
//! brief identity-assignment step.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::chain::builder::{self, ChainDecision, ChainPolicy, FullBackupReason};
use crate::chain::integrity;
use crate::error::{AppError, Result};
use crate::models::backup::{Backup, BackupMode, BackupStatus};
use crate::models::schedule::{BackupModePolicy, Schedule};
use crate::services::backup_service::{is_chain_slot_conflict, BackupService, CompletionFacts};
use crate::services::schedule_service::ScheduleService;
use crate::services::snapshot_producer::{SnapshotProducer, SnapshotSource};
use crate::services::storage_service::StorageService;

/// Attempts to claim a (chain, sequence) slot before giving up; each
/// conflict re-derives against the winner's freshly persisted state.
const MAX_SLOT_ATTEMPTS: u32 = 3;

pub struct ChainService {
    backups: BackupService,
    schedules: ScheduleService,
    storage: Arc<StorageService>,
    producer: Arc<dyn SnapshotProducer>,
    source_locks: Mutex<HashMap<SnapshotSource, Arc<Mutex<()>>>>,
}

impl ChainService {
    pub fn new(
        db: PgPool,
        storage: Arc<StorageService>,
        producer: Arc<dyn SnapshotProducer>,
    ) -> Self {
        Self {
            backups: BackupService::new(db.clone()),
            schedules: ScheduleService::new(db),
            storage,
            producer,
            source_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn source_lock(&self, source: SnapshotSource) -> Arc<Mutex<()>> {
        let mut locks = self.source_locks.lock().await;
        locks
            .entry(source)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Capability probe with the policy's patience: `incremental_preferred`
    /// retries a failed probe once before accepting the downgrade.
    async fn probe_incremental(&self, schedule: &Schedule, source: &SnapshotSource) -> bool {
        match self.producer.probe_incremental_capability(source).await {
            Ok(true) => true,
            Ok(false) => false,
            Err(e) => {
                if schedule.backup_mode_policy == BackupModePolicy::IncrementalPreferred {
                    tracing::warn!(
                        source_id = %source.source_id,
                        error = %e,
                        "capability probe failed, retrying once"
                    );
                    self.producer
                        .probe_incremental_capability(source)
                        .await
                        .unwrap_or(false)
                } else {
                    tracing::debug!(
                        source_id = %source.source_id,
                        error = %e,
                        "capability probe failed, falling back to full"
                    );
                    false
                }
            }
        }
    }

    /// Compute the chain decision for a schedule without claiming a slot.
    pub async fn build_chain_decision(&self, schedule: &Schedule) -> Result<ChainDecision> {
        let source = SnapshotSource::from_schedule(schedule);
        let incremental_supported = self.probe_incremental(schedule, &source).await;
        let prior = self
            .backups
            .latest_completed(source.source_type, source.source_id)
            .await?;

        // A broken chain never auto-repairs: when the prior chain fails
        // its integrity check, derivation ignores it and starts fresh.
        let mut prior_broken = false;
        let effective_prior = match prior.as_ref() {
            Some(p) => {
                let chain_rows = self.backups.list_chain(p.chain_id).await?;
                let report = integrity::check(p.chain_id, &chain_rows);
                if report.restorable {
                    Some(p)
                } else {
                    tracing::warn!(
                        chain_id = %p.chain_id,
                        last_restorable = ?report.last_restorable_sequence,
                        "prior chain is not restorable, forcing a new chain"
                    );
                    prior_broken = true;
                    None
                }
            }
            None => None,
        };

        let mut decision = builder::decide(
            &ChainPolicy::from_schedule(schedule),
            effective_prior,
            Utc::now().date_naive(),
            incremental_supported,
            schedule.checkpoint_name.as_deref(),
        );
        if prior_broken {
            decision.full_reason = Some(FullBackupReason::PriorChainBroken);
        }
        if let Some(reason) = decision.full_reason {
            tracing::info!(
                schedule = %schedule.name,
                source_id = %source.source_id,
                reason = ?reason,
                "starting a new backup chain"
            );
        }
        Ok(decision)
    }

    /// Derive the next chain slot for the schedule's source and insert the
    /// pending row. Exclusive per source; the unique index on
    /// (chain_id, sequence_number) backstops racing processes, and the
    /// loser re-derives against the updated state.
    pub async fn begin_backup(&self, schedule: &Schedule) -> Result<Backup> {
        let source = SnapshotSource::from_schedule(schedule);
        let lock = self.source_lock(source).await;
        let _guard = lock.lock().await;

        for attempt in 1..=MAX_SLOT_ATTEMPTS {
            let decision = self.build_chain_decision(schedule).await?;
            match self
                .backups
                .create_from_decision(
                    &decision,
                    source.source_type,
                    source.source_id,
                    schedule.storage_backend_id,
                    Some(schedule.id),
                )
                .await
            {
                Ok(backup) => return Ok(backup),
                Err(e) if is_chain_slot_conflict(&e) => {
                    tracing::warn!(
                        schedule = %schedule.name,
                        chain_id = %decision.chain_id,
                        sequence_number = decision.sequence_number,
                        attempt,
                        "lost the chain slot race, re-deriving"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(AppError::Conflict(format!(
            "could not claim a chain slot for source {} after {} attempts",
            source.source_id, MAX_SLOT_ATTEMPTS
        )))
    }

    /// Run a pending backup job to completion: capture, upload, record.
    /// Holds no source lock; capture may take hours.
    pub async fn run_backup(&self, schedule: &Schedule, backup: Backup) -> Result<Backup> {
        let source = SnapshotSource::from_schedule(schedule);
        let backup = match self.backups.mark_running(backup.id).await {
            Ok(row) => row,
            Err(AppError::Conflict(_)) => {
                // The row moved on before capture started; a cancellation
                // in that window simply ends the job.
                let current = self.backups.get_by_id(backup.id).await?;
                if current.status == BackupStatus::Cancelled {
                    tracing::info!(backup_id = %backup.id, "backup cancelled before capture");
                    return Ok(current);
                }
                return Err(AppError::Conflict(format!(
                    "backup {} is {}, expected pending",
                    current.id, current.status
                )));
            }
            Err(e) => return Err(e),
        };

        let capture = match self
            .producer
            .capture(
                &source,
                backup.backup_mode,
                backup.checkpoint_token.as_deref(),
            )
            .await
        {
            Ok(capture) => capture,
            Err(e) => {
                self.backups.mark_failed(backup.id, &e.to_string()).await?;
                return Err(AppError::SnapshotCaptureFailed(e.to_string()));
            }
        };

        let storage_path = format!(
            "chains/{}/{:05}-{}",
            backup.chain_id, backup.sequence_number, backup.id
        );
        let put = match self
            .storage
            .put(backup.storage_backend_id, &storage_path, capture.data.clone())
            .await
        {
            Ok(put) => put,
            Err(e) => {
                self.backups.mark_failed(backup.id, &e.to_string()).await?;
                return Err(e);
            }
        };

        let verified = put.checksum == capture.checksum;
        if !verified {
            tracing::warn!(
                backup_id = %backup.id,
                produced = %capture.checksum,
                stored = %put.checksum,
                "stored artifact checksum does not match capture"
            );
        }

        let facts = CompletionFacts {
            size_bytes: capture.size_bytes,
            compressed_size_bytes: capture.compressed_size_bytes.or(Some(put.size_bytes)),
            checksum: capture.checksum,
            storage_path: storage_path.clone(),
            verified,
            checkpoint_token: capture.new_checkpoint_token.clone(),
        };
        let Some(completed) = self.backups.complete(backup.id, &facts).await? else {
            // Cancelled mid-capture: the status guard refused the
            // transition. Drop the uploaded artifact, keep the row as-is.
            let current = self.backups.get_by_id(backup.id).await?;
            tracing::info!(
                backup_id = %backup.id,
                status = %current.status,
                "backup did not finish as running, discarding artifact"
            );
            if let Err(e) = self
                .storage
                .delete(backup.storage_backend_id, &storage_path)
                .await
            {
                tracing::warn!(backup_id = %backup.id, error = %e, "failed to discard artifact");
            }
            return Ok(current);
        };

        let last_full = (completed.backup_mode == BackupMode::Full).then_some(completed.id);
        self.schedules
            .advance_chain_state(
                schedule.id,
                last_full,
                capture.new_checkpoint_token.as_deref(),
            )
            .await?;

        tracing::info!(
            backup_id = %completed.id,
            chain_id = %completed.chain_id,
            sequence_number = completed.sequence_number,
            mode = %completed.backup_mode,
            size_bytes = completed.size_bytes,
            "backup completed"
        );
        Ok(completed)
    }

    /// Claim a slot and run the job: the full trigger path.
    pub async fn execute(&self, schedule: &Schedule) -> Result<Backup> {
        let pending = self.begin_backup(schedule).await?;
        self.run_backup(schedule, pending).await
    }

    /// Cancel a pending or running backup. The job notices at its next
    /// status-guarded transition and never reaches `completed`.
    pub async fn cancel(&self, backup_id: Uuid) -> Result<Backup> {
        self.backups.cancel(backup_id).await
    }
}
