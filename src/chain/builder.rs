//! Chain building: decide whether a triggered job is full or incremental
//! and assign its chain identity.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use crate::models::backup::{Backup, BackupMode};
use crate::models::schedule::{BackupModePolicy, Schedule};

/// The schedule fields the decision depends on, detached from the row.
#[derive(Debug, Clone)]
pub struct ChainPolicy {
    pub mode_policy: BackupModePolicy,
    /// Maximum sequence number a chain may reach.
    pub max_chain_length: i32,
    /// Day of month that forces a new chain.
    pub full_backup_day: Option<i32>,
}

impl ChainPolicy {
    pub fn from_schedule(schedule: &Schedule) -> Self {
        Self {
            mode_policy: schedule.backup_mode_policy,
            max_chain_length: schedule.max_chain_length,
            full_backup_day: schedule.full_backup_day,
        }
    }
}

/// Why a decision came out as a full backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FullBackupReason {
    NoPriorBackup,
    PolicyFullOnly,
    ChainLengthReached,
    CalendarAnchor,
    IncrementalUnsupported,
    /// The prior chain failed its integrity check; broken chains never
    /// auto-repair, a fresh full starts over.
    PriorChainBroken,
}

/// Chain identity assigned to a new backup job.
#[derive(Debug, Clone, Serialize)]
pub struct ChainDecision {
    pub backup_mode: BackupMode,
    pub chain_id: Uuid,
    pub sequence_number: i32,
    pub parent_backup_id: Option<Uuid>,
    /// Change-tracking baseline handed to the snapshot producer.
    /// Always `None` for a full backup (tracking restarts from zero).
    pub checkpoint_token: Option<String>,
    /// Set whenever the decision is a full backup.
    pub full_reason: Option<FullBackupReason>,
}

impl ChainDecision {
    fn new_chain(reason: FullBackupReason) -> Self {
        Self {
            backup_mode: BackupMode::Full,
            chain_id: Uuid::new_v4(),
            sequence_number: 0,
            parent_backup_id: None,
            checkpoint_token: None,
            full_reason: Some(reason),
        }
    }
}

/// Decide the mode and chain identity for the next backup of a source.
///
/// `prior` is the most recent completed, non-deleted backup for the source
/// (failed and cancelled rows must already be skipped by the caller).
/// `incremental_supported` is the snapshot producer's capability probe
/// result. Hard overrides (`full_only` policy, chain length, calendar
/// anchor) win over everything; a capability gap downgrades whatever is
/// left to a full.
pub fn decide(
    policy: &ChainPolicy,
    prior: Option<&Backup>,
    today: NaiveDate,
    incremental_supported: bool,
    schedule_checkpoint: Option<&str>,
) -> ChainDecision {
    let Some(prior) = prior else {
        return ChainDecision::new_chain(FullBackupReason::NoPriorBackup);
    };

    if policy.mode_policy == BackupModePolicy::FullOnly {
        return ChainDecision::new_chain(FullBackupReason::PolicyFullOnly);
    }

    let next_sequence = prior.sequence_number + 1;
    if next_sequence > policy.max_chain_length {
        return ChainDecision::new_chain(FullBackupReason::ChainLengthReached);
    }

    if let Some(anchor_day) = policy.full_backup_day {
        if today.day() as i32 == anchor_day {
            return ChainDecision::new_chain(FullBackupReason::CalendarAnchor);
        }
    }

    if !incremental_supported {
        return ChainDecision::new_chain(FullBackupReason::IncrementalUnsupported);
    }

    ChainDecision {
        backup_mode: BackupMode::Incremental,
        chain_id: prior.chain_id,
        sequence_number: next_sequence,
        parent_backup_id: Some(prior.id),
        checkpoint_token: prior
            .checkpoint_token
            .clone()
            .or_else(|| schedule_checkpoint.map(str::to_owned)),
        full_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_support::{at, chain_member};

    fn policy(mode: BackupModePolicy) -> ChainPolicy {
        ChainPolicy {
            mode_policy: mode,
            max_chain_length: 6,
            full_backup_day: None,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn no_prior_backup_starts_a_chain() {
        let decision = decide(
            &policy(BackupModePolicy::Auto),
            None,
            day(2026, 3, 10),
            true,
            None,
        );
        assert_eq!(decision.backup_mode, BackupMode::Full);
        assert_eq!(decision.sequence_number, 0);
        assert!(decision.parent_backup_id.is_none());
        assert!(decision.checkpoint_token.is_none());
        assert_eq!(decision.full_reason, Some(FullBackupReason::NoPriorBackup));
    }

    #[test]
    fn prior_completed_backup_extends_its_chain() {
        let prior = chain_member(Uuid::new_v4(), 2, Some(Uuid::new_v4()), at(2026, 3, 9, 2));
        let decision = decide(
            &policy(BackupModePolicy::Auto),
            Some(&prior),
            day(2026, 3, 10),
            true,
            None,
        );
        assert_eq!(decision.backup_mode, BackupMode::Incremental);
        assert_eq!(decision.chain_id, prior.chain_id);
        assert_eq!(decision.sequence_number, 3);
        assert_eq!(decision.parent_backup_id, Some(prior.id));
        assert_eq!(decision.checkpoint_token, prior.checkpoint_token);
        assert!(decision.full_reason.is_none());
    }

    #[test]
    fn full_only_policy_always_starts_a_chain() {
        let prior = chain_member(Uuid::new_v4(), 1, Some(Uuid::new_v4()), at(2026, 3, 9, 2));
        let decision = decide(
            &policy(BackupModePolicy::FullOnly),
            Some(&prior),
            day(2026, 3, 10),
            true,
            None,
        );
        assert_eq!(decision.full_reason, Some(FullBackupReason::PolicyFullOnly));
        assert_ne!(decision.chain_id, prior.chain_id);
    }

    #[test]
    fn chain_length_cap_forces_a_new_chain() {
        // max_chain_length = 6, prior at sequence 6: the chain is exhausted.
        let prior = chain_member(Uuid::new_v4(), 6, Some(Uuid::new_v4()), at(2026, 3, 9, 2));
        let decision = decide(
            &policy(BackupModePolicy::IncrementalPreferred),
            Some(&prior),
            day(2026, 3, 10),
            true,
            None,
        );
        assert_eq!(
            decision.full_reason,
            Some(FullBackupReason::ChainLengthReached)
        );

        // One below the cap still extends the chain.
        let prior = chain_member(Uuid::new_v4(), 5, Some(Uuid::new_v4()), at(2026, 3, 9, 2));
        let decision = decide(
            &policy(BackupModePolicy::IncrementalPreferred),
            Some(&prior),
            day(2026, 3, 10),
            true,
            None,
        );
        assert_eq!(decision.sequence_number, 6);
        assert_eq!(decision.backup_mode, BackupMode::Incremental);
    }

    #[test]
    fn calendar_anchor_forces_a_new_chain() {
        let mut p = policy(BackupModePolicy::Auto);
        p.full_backup_day = Some(1);
        let prior = chain_member(Uuid::new_v4(), 1, Some(Uuid::new_v4()), at(2026, 2, 28, 2));

        let on_anchor = decide(&p, Some(&prior), day(2026, 3, 1), true, None);
        assert_eq!(on_anchor.full_reason, Some(FullBackupReason::CalendarAnchor));

        let off_anchor = decide(&p, Some(&prior), day(2026, 3, 2), true, None);
        assert_eq!(off_anchor.backup_mode, BackupMode::Incremental);
    }

    #[test]
    fn unsupported_capture_downgrades_to_full() {
        let prior = chain_member(Uuid::new_v4(), 1, Some(Uuid::new_v4()), at(2026, 3, 9, 2));
        let decision = decide(
            &policy(BackupModePolicy::Auto),
            Some(&prior),
            day(2026, 3, 10),
            false,
            None,
        );
        assert_eq!(
            decision.full_reason,
            Some(FullBackupReason::IncrementalUnsupported)
        );
        assert_eq!(decision.backup_mode, BackupMode::Full);
    }

    #[test]
    fn checkpoint_falls_back_to_schedule_state() {
        let mut prior = chain_member(Uuid::new_v4(), 0, None, at(2026, 3, 9, 2));
        prior.checkpoint_token = None;
        let decision = decide(
            &policy(BackupModePolicy::Auto),
            Some(&prior),
            day(2026, 3, 10),
            true,
            Some("cp-from-schedule"),
        );
        assert_eq!(
            decision.checkpoint_token.as_deref(),
            Some("cp-from-schedule")
        );
    }
}
