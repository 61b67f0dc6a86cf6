//! Restoration planning: the ordered sequence of artifacts to fetch and
//! apply to reach a target backup.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::chain::{integrity, ChainError};
use crate::models::backup::{Backup, BackupMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreAction {
    RestoreFull,
    ApplyIncremental,
}

/// One fetch-and-apply step of a restoration plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreStep {
    pub backup_id: Uuid,
    pub backup_mode: BackupMode,
    pub sequence_number: i32,
    pub storage_path: String,
    pub size_bytes: i64,
    pub action: RestoreAction,
}

/// Ordered restoration plan: the full backup first, then each incremental
/// in ascending sequence up to and including the target.
#[derive(Debug, Clone, Serialize)]
pub struct RestorationPlan {
    pub target_backup_id: Uuid,
    pub chain_id: Uuid,
    pub steps: Vec<RestoreStep>,
    /// Total download estimate across all steps.
    pub total_bytes: i64,
    /// Advisory duration estimate; no network measurement behind it.
    pub estimated_seconds: Option<u64>,
}

/// Advisory restore-time divisor.
#[derive(Debug, Clone, Copy)]
pub struct ThroughputEstimate {
    pub bytes_per_second: u64,
}

impl ThroughputEstimate {
    pub fn from_mibs(mibs: u64) -> Self {
        Self {
            bytes_per_second: mibs.saturating_mul(1024 * 1024),
        }
    }
}

/// Compute the restoration plan for `target_backup_id`.
///
/// `backups` must contain the target's chain (other rows are ignored). The
/// backward walk from the target enforces the chain invariants: every link
/// must step down exactly one sequence number to a completed parent, and
/// reach sequence 0 without a missing link. Any violation fails with
/// [`ChainError::Broken`] naming the first broken link and the last
/// sequence number that is still safely restorable.
pub fn plan(
    backups: &[Backup],
    target_backup_id: Uuid,
    throughput: ThroughputEstimate,
) -> Result<RestorationPlan, ChainError> {
    let target = backups
        .iter()
        .find(|b| b.id == target_backup_id)
        .ok_or(ChainError::TargetNotFound(target_backup_id))?;
    if !target.is_live_completed() {
        return Err(ChainError::TargetNotRestorable {
            backup_id: target.id,
            status: if target.is_deleted {
                "deleted".into()
            } else {
                target.status.to_string()
            },
        });
    }

    let chain_id = target.chain_id;
    let report = integrity::check(chain_id, backups);
    let last_restorable = report.last_restorable_sequence;
    let broken = |broken_at: i32, reason: String| ChainError::Broken {
        chain_id,
        broken_at,
        reason,
        last_restorable_sequence: last_restorable,
    };

    let by_id: HashMap<Uuid, &Backup> = backups
        .iter()
        .filter(|b| b.chain_id == chain_id && !b.is_deleted)
        .map(|b| (b.id, b))
        .collect();

    // Walk parent links backward from the target, collecting the path.
    let mut path: Vec<&Backup> = vec![target];
    let mut current = target;
    while current.sequence_number > 0 {
        let parent_id = current.parent_backup_id.ok_or_else(|| {
            broken(
                current.sequence_number,
                format!(
                    "incremental at sequence number {} has no parent link",
                    current.sequence_number
                ),
            )
        })?;
        let parent = by_id.get(&parent_id).copied().ok_or_else(|| {
            broken(
                current.sequence_number,
                format!("parent backup {} is gone", parent_id),
            )
        })?;
        if parent.chain_id != chain_id {
            return Err(broken(
                current.sequence_number,
                format!("parent backup {} belongs to a different chain", parent_id),
            ));
        }
        if parent.sequence_number != current.sequence_number - 1 {
            return Err(broken(
                current.sequence_number,
                format!(
                    "parent has sequence number {}, expected {}",
                    parent.sequence_number,
                    current.sequence_number - 1
                ),
            ));
        }
        if !parent.is_live_completed() {
            return Err(broken(
                parent.sequence_number,
                format!(
                    "backup at sequence number {} is {}",
                    parent.sequence_number, parent.status
                ),
            ));
        }
        path.push(parent);
        current = parent;
    }

    // A second completed row sharing a sequence number with the path makes
    // the chain ambiguous even when the parent links themselves line up.
    for step in &path {
        let duplicates = backups.iter().filter(|b| {
            b.chain_id == chain_id
                && b.is_live_completed()
                && b.sequence_number == step.sequence_number
        });
        if duplicates.count() > 1 {
            return Err(broken(
                step.sequence_number,
                format!(
                    "duplicate completed backups at sequence number {}",
                    step.sequence_number
                ),
            ));
        }
    }

    path.reverse();
    let steps: Vec<RestoreStep> = path
        .iter()
        .map(|b| {
            let storage_path = b.storage_path.clone().ok_or_else(|| {
                broken(
                    b.sequence_number,
                    format!(
                        "completed backup at sequence number {} has no storage path",
                        b.sequence_number
                    ),
                )
            })?;
            Ok(RestoreStep {
                backup_id: b.id,
                backup_mode: b.backup_mode,
                sequence_number: b.sequence_number,
                storage_path,
                size_bytes: b.size_bytes.unwrap_or(0),
                action: if b.sequence_number == 0 {
                    RestoreAction::RestoreFull
                } else {
                    RestoreAction::ApplyIncremental
                },
            })
        })
        .collect::<Result<_, ChainError>>()?;

    let total_bytes: i64 = steps.iter().map(|s| s.size_bytes).sum();
    let estimated_seconds = (throughput.bytes_per_second > 0)
        .then(|| (total_bytes.max(0) as u64).div_ceil(throughput.bytes_per_second));

    Ok(RestorationPlan {
        target_backup_id,
        chain_id,
        steps,
        total_bytes,
        estimated_seconds,
    })
}
