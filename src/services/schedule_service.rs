//! Schedule management: recurring trigger configuration and the run state
//! the chain builder derives from.

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use sqlx::types::Json;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::chain::retention::RetentionConfig;
use crate::error::{AppError, Result};
use crate::models::backup::SourceType;
use crate::models::schedule::{BackupModePolicy, Schedule};

const SCHEDULE_COLUMNS: &str = "\
    id, name, source_type, source_id, storage_backend_id, \
    backup_mode_policy, max_chain_length, full_backup_day, \
    last_full_backup_id, checkpoint_name, retention_config, \
    cron_expression, enabled, last_run_at, next_run_at, created_at, \
    updated_at";

/// Request to create a schedule.
#[derive(Debug, Clone)]
pub struct CreateScheduleRequest {
    pub name: String,
    pub source_type: SourceType,
    pub source_id: Uuid,
    pub storage_backend_id: Uuid,
    pub backup_mode_policy: BackupModePolicy,
    pub max_chain_length: i32,
    pub full_backup_day: Option<i32>,
    pub retention_config: RetentionConfig,
    pub cron_expression: String,
}

pub struct ScheduleService {
    db: PgPool,
}

impl ScheduleService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Schedule> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1");
        sqlx::query_as::<_, Schedule>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schedule {id} not found")))
    }

    pub async fn list_enabled(&self) -> Result<Vec<Schedule>> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules \
             WHERE enabled = true ORDER BY name"
        );
        Ok(sqlx::query_as::<_, Schedule>(&sql)
            .fetch_all(&self.db)
            .await?)
    }

    /// Enabled schedules whose next run is due. A schedule that has never
    /// run (no `next_run_at` yet) is due immediately.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules \
             WHERE enabled = true \
               AND (next_run_at IS NULL OR next_run_at <= $1) \
             ORDER BY next_run_at NULLS FIRST"
        );
        Ok(sqlx::query_as::<_, Schedule>(&sql)
            .bind(now)
            .fetch_all(&self.db)
            .await?)
    }

    pub async fn create(&self, req: CreateScheduleRequest) -> Result<Schedule> {
        validate_cron(&req.cron_expression)?;
        if req.max_chain_length < 0 {
            return Err(AppError::Validation(
                "max_chain_length must not be negative".into(),
            ));
        }
        if let Some(day) = req.full_backup_day {
            if !(1..=31).contains(&day) {
                return Err(AppError::Validation(
                    "full_backup_day must be between 1 and 31".into(),
                ));
            }
        }

        let next_run = next_fire_time(&req.cron_expression, Utc::now())?;
        let sql = format!(
            "INSERT INTO schedules \
                (name, source_type, source_id, storage_backend_id, \
                 backup_mode_policy, max_chain_length, full_backup_day, \
                 retention_config, cron_expression, next_run_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {SCHEDULE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Schedule>(&sql)
            .bind(&req.name)
            .bind(req.source_type)
            .bind(req.source_id)
            .bind(req.storage_backend_id)
            .bind(req.backup_mode_policy)
            .bind(req.max_chain_length)
            .bind(req.full_backup_day)
            .bind(Json(req.retention_config))
            .bind(&req.cron_expression)
            .bind(next_run)
            .fetch_one(&self.db)
            .await?)
    }

    /// Record that a trigger fired and when the next one is expected.
    pub async fn record_run(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let schedule = self.get_by_id(id).await?;
        let next_run = next_fire_time(&schedule.cron_expression, now)?;
        sqlx::query(
            "UPDATE schedules \
             SET last_run_at = $2, next_run_at = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .bind(next_run)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Advance the change-tracking state after a completed backup: the new
    /// checkpoint baseline, and the chain anchor when the backup was full.
    pub async fn advance_chain_state(
        &self,
        id: Uuid,
        last_full_backup_id: Option<Uuid>,
        checkpoint_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE schedules \
             SET last_full_backup_id = COALESCE($2, last_full_backup_id), \
                 checkpoint_name = COALESCE($3, checkpoint_name), \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(last_full_backup_id)
        .bind(checkpoint_name)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

fn validate_cron(expression: &str) -> Result<()> {
    CronSchedule::from_str(expression)
        .map(|_| ())
        .map_err(|e| AppError::Validation(format!("invalid cron expression '{expression}': {e}")))
}

/// Next fire time strictly after `now`.
pub fn next_fire_time(expression: &str, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let schedule = CronSchedule::from_str(expression)
        .map_err(|e| AppError::Validation(format!("invalid cron expression '{expression}': {e}")))?;
    Ok(schedule.after(&now).next())
}
