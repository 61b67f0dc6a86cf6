//! Background task scheduler.
//!
//! Two independent loops: due-schedule backup triggering and periodic
//! retention sweeps. The sweeper needs no snapshot producer and is what
//! the shipped daemon runs; the trigger loop is spawned by an embedding
//! application that supplies a producer.

use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::config::Config;
use crate::services::chain_service::ChainService;
use crate::services::retention_service::RetentionService;
use crate::services::schedule_service::ScheduleService;
use crate::services::snapshot_producer::SnapshotProducer;
use crate::services::storage_service::StorageService;

/// Spawn the periodic retention sweep loop.
pub fn spawn_retention_sweeper(db: PgPool, config: &Config, storage: Arc<StorageService>) {
    let sweep_interval = Duration::from_secs(config.retention_sweep_interval_secs.max(60));
    tokio::spawn(async move {
        // Initial delay to let the process settle before the first sweep.
        tokio::time::sleep(Duration::from_secs(30)).await;
        let service = RetentionService::new(db, storage);
        let mut ticker = interval(sweep_interval);

        loop {
            ticker.tick().await;
            tracing::info!("running scheduled retention sweep");

            match service.sweep_all().await {
                Ok(reports) => {
                    let deleted: usize = reports.iter().map(|r| r.deleted).sum();
                    let freed: i64 = reports.iter().map(|r| r.bytes_freed).sum();
                    let failed = reports.iter().filter(|r| !r.errors.is_empty()).count();
                    if deleted > 0 || failed > 0 {
                        tracing::info!(
                            sources = reports.len(),
                            deleted,
                            bytes_freed = freed,
                            sources_with_errors = failed,
                            "retention sweep cycle finished"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!("retention sweep cycle failed: {}", e);
                }
            }
        }
    });
}

/// Spawn the due-schedule backup trigger loop.
pub fn spawn_backup_trigger(
    db: PgPool,
    config: &Config,
    storage: Arc<StorageService>,
    producer: Arc<dyn SnapshotProducer>,
) {
    let poll_interval = Duration::from_secs(config.schedule_poll_interval_secs.max(10));
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        let schedules = ScheduleService::new(db.clone());
        let chains = ChainService::new(db, storage, producer);
        let mut ticker = interval(poll_interval);

        loop {
            ticker.tick().await;
            let now = Utc::now();
            let due = match schedules.due(now).await {
                Ok(due) => due,
                Err(e) => {
                    tracing::warn!("due-schedule query failed: {}", e);
                    continue;
                }
            };

            for schedule in due {
                // Claim the run before executing so a long capture is not
                // re-triggered by the next poll tick.
                if let Err(e) = schedules.record_run(schedule.id, now).await {
                    tracing::warn!(
                        schedule = %schedule.name,
                        error = %e,
                        "failed to record schedule run"
                    );
                    continue;
                }
                match chains.execute(&schedule).await {
                    Ok(backup) => {
                        tracing::info!(
                            schedule = %schedule.name,
                            backup_id = %backup.id,
                            status = %backup.status,
                            "scheduled backup finished"
                        );
                    }
                    Err(e) => {
                        // The row already carries the failure; the next
                        // trigger starts a fresh attempt.
                        tracing::warn!(
                            schedule = %schedule.name,
                            error = %e,
                            "scheduled backup failed"
                        );
                    }
                }
            }
        }
    });
}
