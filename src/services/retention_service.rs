//! Retention sweeps: evaluate GFS retention per source and delete the
//! eligible artifacts without ever stranding a kept descendant.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::chain::retention::{self, RetentionConfig, RetentionEvaluation};
use crate::error::Result;
use crate::models::backup::{Backup, SourceType};
use crate::models::schedule::Schedule;
use crate::services::backup_service::BackupService;
use crate::services::schedule_service::ScheduleService;
use crate::services::storage_service::StorageService;

/// Outcome of sweeping one source.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub schedule_id: Uuid,
    pub source_id: Uuid,
    pub kept: usize,
    pub deleted: usize,
    pub vetoed: usize,
    pub bytes_freed: i64,
    pub errors: Vec<String>,
}

impl SweepReport {
    fn empty(schedule: &Schedule) -> Self {
        Self {
            schedule_id: schedule.id,
            source_id: schedule.source_id,
            kept: 0,
            deleted: 0,
            vetoed: 0,
            bytes_freed: 0,
            errors: Vec::new(),
        }
    }
}

pub struct RetentionService {
    backups: BackupService,
    schedules: ScheduleService,
    storage: Arc<StorageService>,
}

impl RetentionService {
    pub fn new(db: PgPool, storage: Arc<StorageService>) -> Self {
        Self {
            backups: BackupService::new(db.clone()),
            schedules: ScheduleService::new(db),
            storage,
        }
    }

    /// Evaluate retention for one source without deleting anything.
    pub async fn evaluate_source(
        &self,
        source_type: SourceType,
        source_id: Uuid,
        config: &RetentionConfig,
    ) -> Result<RetentionEvaluation> {
        let rows = self.backups.list_source(source_type, source_id).await?;
        Ok(retention::evaluate(&rows, config, Utc::now()))
    }

    /// Evaluate and delete for one schedule's source. Re-running after a
    /// partial sweep only touches what is still present; per-candidate
    /// failures are collected, never fatal to the rest of the sweep.
    pub async fn sweep_schedule(&self, schedule: &Schedule) -> Result<SweepReport> {
        let config = schedule.retention();
        if config.is_disabled() {
            tracing::debug!(schedule = %schedule.name, "all retention tiers disabled, skipping");
            return Ok(SweepReport::empty(schedule));
        }

        let rows = self
            .backups
            .list_source(schedule.source_type, schedule.source_id)
            .await?;
        let now = Utc::now();
        let evaluation = retention::evaluate(&rows, config, now);

        for veto in &evaluation.vetoes {
            tracing::info!(
                schedule = %schedule.name,
                backup_id = %veto.backup_id,
                reason = ?veto.reason,
                "retention veto"
            );
        }

        let by_id: HashMap<Uuid, &Backup> = rows.iter().map(|b| (b.id, b)).collect();
        let mut report = SweepReport {
            schedule_id: schedule.id,
            source_id: schedule.source_id,
            kept: evaluation.keep.len(),
            deleted: 0,
            vetoed: evaluation.vetoes.len(),
            bytes_freed: 0,
            errors: Vec::new(),
        };

        // The evaluation already ordered deletions deepest-first per chain.
        for backup_id in &evaluation.delete {
            let Some(listed) = by_id.get(backup_id) else {
                continue;
            };

            // Protection may have been raised since the listing; check the
            // live row before touching the artifact.
            let fresh = match self.backups.get_by_id(*backup_id).await {
                Ok(row) => row,
                Err(e) => {
                    report.errors.push(format!("{backup_id}: {e}"));
                    continue;
                }
            };
            if fresh.is_deleted {
                continue;
            }
            if fresh.is_protected(now) {
                tracing::info!(
                    backup_id = %backup_id,
                    "retention veto: protection raised since evaluation"
                );
                report.vetoed += 1;
                continue;
            }

            // Artifact first, row second: a crash in between leaves the row
            // visible for the next sweep, and the gateway treats an
            // already-absent artifact as deleted.
            if let Some(path) = &fresh.storage_path {
                if let Err(e) = self.storage.delete(fresh.storage_backend_id, path).await {
                    tracing::warn!(
                        backup_id = %backup_id,
                        path = %path,
                        error = %e,
                        "failed to delete backup artifact, leaving row for next sweep"
                    );
                    report.errors.push(format!("{backup_id}: {e}"));
                    continue;
                }
            }
            if let Err(e) = self.backups.mark_deleted(*backup_id).await {
                report.errors.push(format!("{backup_id}: {e}"));
                continue;
            }

            report.deleted += 1;
            report.bytes_freed += listed.size_bytes.unwrap_or(0);
        }

        if report.deleted > 0 || !report.errors.is_empty() {
            tracing::info!(
                schedule = %schedule.name,
                deleted = report.deleted,
                bytes_freed = report.bytes_freed,
                errors = report.errors.len(),
                "retention sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every enabled schedule. One source's failure never aborts the
    /// sweeps of the others.
    pub async fn sweep_all(&self) -> Result<Vec<SweepReport>> {
        let schedules = self.schedules.list_enabled().await?;
        let mut reports = Vec::with_capacity(schedules.len());
        for schedule in &schedules {
            match self.sweep_schedule(schedule).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(
                        schedule = %schedule.name,
                        error = %e,
                        "retention sweep failed for source"
                    );
                    let mut report = SweepReport::empty(schedule);
                    report.errors.push(e.to_string());
                    reports.push(report);
                }
            }
        }
        Ok(reports)
    }
}
