//! Restoration service: plan computation and re-validated execution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::PgPool;
use uuid::Uuid;

use crate::chain::restore::{self, RestorationPlan, RestoreStep, ThroughputEstimate};
use crate::error::{AppError, Result};
use crate::models::backup::Backup;
use crate::services::backup_service::BackupService;
use crate::services::storage_service::StorageService;
use crate::storage::sha256_hex;

/// Receives fetched artifacts in apply order. The actual application
/// (writing disks back into a hypervisor or container runtime) lives
/// outside this crate.
#[async_trait]
pub trait RestoreSink: Send + Sync {
    async fn apply(&self, step: &RestoreStep, data: Bytes) -> Result<()>;
}

pub struct RestoreService {
    backups: BackupService,
    storage: Arc<StorageService>,
    throughput: ThroughputEstimate,
}

impl RestoreService {
    pub fn new(db: PgPool, storage: Arc<StorageService>, throughput: ThroughputEstimate) -> Self {
        Self {
            backups: BackupService::new(db),
            storage,
            throughput,
        }
    }

    /// Compute the ordered restoration plan for a target backup.
    /// Read-only and side-effect free; safe to compute speculatively.
    pub async fn plan_restoration(&self, target_backup_id: Uuid) -> Result<RestorationPlan> {
        let target = self.backups.get_by_id(target_backup_id).await?;
        let chain = self.backups.list_chain(target.chain_id).await?;
        Ok(restore::plan(&chain, target_backup_id, self.throughput)?)
    }

    /// Fetch and hand each step to the sink, in plan order.
    ///
    /// Chain state may have changed between planning and execution, so the
    /// plan is recomputed against live state first; a mismatch aborts
    /// before any artifact is fetched. Each artifact is checksummed before
    /// it reaches the sink.
    pub async fn execute(&self, plan: &RestorationPlan, sink: &dyn RestoreSink) -> Result<()> {
        let fresh = self.plan_restoration(plan.target_backup_id).await?;
        if fresh.steps != plan.steps {
            return Err(AppError::Conflict(
                "chain state changed since the plan was computed; re-plan the restore".into(),
            ));
        }

        let chain = self.backups.list_chain(fresh.chain_id).await?;
        let by_id: HashMap<Uuid, &Backup> = chain.iter().map(|b| (b.id, b)).collect();

        for step in &fresh.steps {
            let row = by_id.get(&step.backup_id).ok_or_else(|| {
                AppError::NotFound(format!("Backup {} not found", step.backup_id))
            })?;
            let data = self
                .storage
                .get(row.storage_backend_id, &step.storage_path)
                .await?;

            if let Some(expected) = &row.checksum {
                let actual = sha256_hex(&data);
                if &actual != expected {
                    return Err(AppError::Storage(format!(
                        "artifact checksum mismatch for backup {} (sequence {}): \
                         expected {expected}, got {actual}",
                        step.backup_id, step.sequence_number
                    )));
                }
            }

            tracing::debug!(
                backup_id = %step.backup_id,
                sequence_number = step.sequence_number,
                action = ?step.action,
                "applying restore step"
            );
            sink.apply(step, data).await?;
        }

        tracing::info!(
            target_backup_id = %plan.target_backup_id,
            steps = fresh.steps.len(),
            total_bytes = fresh.total_bytes,
            "restore applied"
        );
        Ok(())
    }
}
