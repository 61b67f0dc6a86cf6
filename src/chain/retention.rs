//! Grandfather-father-son retention: bucket completed backups into
//! daily/weekly/monthly/yearly tiers and plan deletions that never strand
//! a kept descendant.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain::integrity;
use crate::models::backup::{Backup, BackupStatus};

/// Per-tier keep counts. Zero disables a tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub daily: u32,
    #[serde(default)]
    pub weekly: u32,
    #[serde(default)]
    pub monthly: u32,
    #[serde(default)]
    pub yearly: u32,
}

impl RetentionConfig {
    pub fn is_disabled(&self) -> bool {
        self.daily == 0 && self.weekly == 0 && self.monthly == 0 && self.yearly == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionTier {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Why an otherwise-eligible deletion candidate was kept anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoReason {
    Immutable,
    LegalHold,
    RetentionLock,
    LoadBearing,
}

/// A deliberate no-op, logged by the sweep, never surfaced as failure.
#[derive(Debug, Clone, Serialize)]
pub struct RetentionVeto {
    pub backup_id: Uuid,
    pub reason: VetoReason,
}

/// Outcome of evaluating a retention config against a source's history.
#[derive(Debug, Clone, Serialize)]
pub struct RetentionEvaluation {
    /// Backups to keep, ordered by chain then sequence number.
    pub keep: Vec<Uuid>,
    /// Backups eligible for deletion, in safe deletion order: within each
    /// chain the deepest incrementals come first, the full backup last.
    pub delete: Vec<Uuid>,
    /// Candidates that were rescued by a protection or dependency veto.
    pub vetoes: Vec<RetentionVeto>,
    /// Which tiers matched each kept backup (empty for rescued candidates).
    pub tiers: BTreeMap<Uuid, Vec<RetentionTier>>,
}

/// Evaluate GFS retention over all backups of one source.
///
/// Only completed, non-deleted rows participate; rows in other states are
/// neither kept nor deletion candidates. Bucketing uses `completed_at`,
/// the moment the recovery point became valid. Completed rows that lack
/// the timestamp cannot be bucketed and are conservatively kept.
pub fn evaluate(
    backups: &[Backup],
    config: &RetentionConfig,
    now: DateTime<Utc>,
) -> RetentionEvaluation {
    let mut dated: Vec<&Backup> = Vec::new();
    let mut keep: HashSet<Uuid> = HashSet::new();
    for b in backups {
        if b.status != BackupStatus::Completed || b.is_deleted {
            continue;
        }
        match b.completed_at {
            Some(_) => dated.push(b),
            None => {
                keep.insert(b.id);
            }
        }
    }
    dated.sort_by_key(|b| (b.completed_at, b.id));

    let mut tiers: BTreeMap<Uuid, Vec<RetentionTier>> = BTreeMap::new();
    let mut mark = |id: Uuid, tier: RetentionTier| {
        tiers.entry(id).or_default().push(tier);
    };

    // Daily: latest backup of each calendar day, most recent `daily` days.
    if config.daily > 0 {
        let mut by_day: BTreeMap<NaiveDate, &Backup> = BTreeMap::new();
        for &b in &dated {
            by_day.insert(completed_date(b), b);
        }
        for b in by_day.values().rev().take(config.daily as usize) {
            mark(b.id, RetentionTier::Daily);
        }
    }

    // Weekly/monthly/yearly: the *first* backup of each period, most
    // recent N periods.
    if config.weekly > 0 {
        first_of_period(&dated, |d| {
            let week = d.iso_week();
            (week.year(), week.week())
        })
        .values()
        .rev()
        .take(config.weekly as usize)
        .for_each(|b| mark(b.id, RetentionTier::Weekly));
    }
    if config.monthly > 0 {
        first_of_period(&dated, |d| (d.year(), d.month()))
            .values()
            .rev()
            .take(config.monthly as usize)
            .for_each(|b| mark(b.id, RetentionTier::Monthly));
    }
    if config.yearly > 0 {
        first_of_period(&dated, |d| (d.year(), 0))
            .values()
            .rev()
            .take(config.yearly as usize)
            .for_each(|b| mark(b.id, RetentionTier::Yearly));
    }

    keep.extend(tiers.keys().copied());

    // Protection vetoes rescue candidates before dependency analysis, so
    // their ancestors are counted as load-bearing too.
    let mut vetoes: Vec<RetentionVeto> = Vec::new();
    for b in &dated {
        if keep.contains(&b.id) {
            continue;
        }
        let reason = if b.immutable {
            Some(VetoReason::Immutable)
        } else if b.legal_hold_enabled {
            Some(VetoReason::LegalHold)
        } else if matches!(b.retention_until, Some(until) if until > now) {
            Some(VetoReason::RetentionLock)
        } else {
            None
        };
        if let Some(reason) = reason {
            keep.insert(b.id);
            vetoes.push(RetentionVeto {
                backup_id: b.id,
                reason,
            });
        }
    }

    // A backup with a kept completed descendant is never deleted, even when
    // it falls outside every tier: removing it would break the descendant's
    // restore path.
    let bearing = integrity::load_bearing_ids(backups, &keep);
    for b in &dated {
        if keep.contains(&b.id) || !bearing.contains(&b.id) {
            continue;
        }
        keep.insert(b.id);
        vetoes.push(RetentionVeto {
            backup_id: b.id,
            reason: VetoReason::LoadBearing,
        });
    }

    let mut keep_rows: Vec<&Backup> = backups
        .iter()
        .filter(|b| keep.contains(&b.id))
        .collect();
    keep_rows.sort_by_key(|b| (b.chain_id, b.sequence_number, b.id));

    let mut delete_rows: Vec<&Backup> = dated
        .iter()
        .filter(|b| !keep.contains(&b.id))
        .copied()
        .collect();
    // Deepest incrementals first, fulls last: a crash mid-sweep must never
    // leave an incremental whose parent is already gone.
    delete_rows.sort_by(|a, b| {
        a.chain_id
            .cmp(&b.chain_id)
            .then(b.sequence_number.cmp(&a.sequence_number))
            .then(a.id.cmp(&b.id))
    });

    RetentionEvaluation {
        keep: keep_rows.iter().map(|b| b.id).collect(),
        delete: delete_rows.iter().map(|b| b.id).collect(),
        vetoes,
        tiers,
    }
}

fn completed_date(b: &Backup) -> NaiveDate {
    // Callers only pass rows with the timestamp present.
    b.completed_at.map(|t| t.date_naive()).unwrap_or_default()
}

fn first_of_period<'a, K: Ord>(
    dated: &[&'a Backup],
    period: impl Fn(NaiveDate) -> K,
) -> BTreeMap<K, &'a Backup> {
    let mut firsts: BTreeMap<K, &'a Backup> = BTreeMap::new();
    for &b in dated {
        firsts.entry(period(completed_date(b))).or_insert(b);
    }
    firsts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_support::{at, chain_member, completed_chain};
    use chrono::Duration;
    use std::collections::HashMap;

    fn daily_only(n: u32) -> RetentionConfig {
        RetentionConfig {
            daily: n,
            ..Default::default()
        }
    }

    /// One single-member chain completed at each given instant.
    fn full_per_day(times: &[DateTime<Utc>]) -> Vec<Backup> {
        times
            .iter()
            .map(|t| chain_member(Uuid::new_v4(), 0, None, *t))
            .collect()
    }

    #[test]
    fn daily_tier_keeps_most_recent_days() {
        let days: Vec<_> = (1..=5).map(|d| at(2026, 3, d, 2)).collect();
        let backups = full_per_day(&days);
        let eval = evaluate(&backups, &daily_only(2), at(2026, 3, 6, 0));

        assert_eq!(eval.keep.len(), 2);
        assert_eq!(eval.delete.len(), 3);
        assert!(eval.keep.contains(&backups[3].id));
        assert!(eval.keep.contains(&backups[4].id));
        for b in &backups[..3] {
            assert!(eval.delete.contains(&b.id));
        }
    }

    #[test]
    fn same_day_backups_collapse_to_latest() {
        let chain_a = chain_member(Uuid::new_v4(), 0, None, at(2026, 3, 1, 2));
        let chain_b = chain_member(Uuid::new_v4(), 0, None, at(2026, 3, 1, 22));
        let backups = vec![chain_a.clone(), chain_b.clone()];
        let eval = evaluate(&backups, &daily_only(5), at(2026, 3, 2, 0));

        // Only the latest of the day matches the daily tier; the earlier
        // one becomes a candidate.
        assert!(eval.keep.contains(&chain_b.id));
        assert!(eval.delete.contains(&chain_a.id));
        assert_eq!(eval.tiers[&chain_b.id], vec![RetentionTier::Daily]);
    }

    #[test]
    fn weekly_tier_keeps_first_backup_of_week() {
        // Mon 2026-03-02 .. Sun 2026-03-08 is ISO week 10.
        let in_week = full_per_day(&[
            at(2026, 3, 2, 2),
            at(2026, 3, 4, 2),
            at(2026, 3, 9, 2), // week 11
        ]);
        let config = RetentionConfig {
            weekly: 2,
            ..Default::default()
        };
        let eval = evaluate(&in_week, &config, at(2026, 3, 10, 0));
        // First of week 10 and first of week 11.
        assert!(eval.keep.contains(&in_week[0].id));
        assert!(eval.keep.contains(&in_week[2].id));
        assert!(eval.delete.contains(&in_week[1].id));
    }

    #[test]
    fn monthly_and_yearly_tiers_keep_first_of_period() {
        let backups = full_per_day(&[
            at(2025, 12, 3, 2),
            at(2025, 12, 20, 2),
            at(2026, 1, 2, 2),
            at(2026, 1, 15, 2),
        ]);
        let config = RetentionConfig {
            monthly: 1,
            yearly: 1,
            ..Default::default()
        };
        let eval = evaluate(&backups, &config, at(2026, 2, 1, 0));
        // Monthly keeps the first of the most recent month (Jan 2); yearly
        // keeps the first of the most recent year (also Jan 2).
        assert!(eval.keep.contains(&backups[2].id));
        assert_eq!(
            eval.tiers[&backups[2].id],
            vec![RetentionTier::Monthly, RetentionTier::Yearly]
        );
        assert!(eval.delete.contains(&backups[0].id));
        assert!(eval.delete.contains(&backups[1].id));
        assert!(eval.delete.contains(&backups[3].id));
    }

    #[test]
    fn protected_backups_never_appear_in_delete() {
        let now = at(2026, 3, 6, 0);
        let days: Vec<_> = (1..=4).map(|d| at(2026, 3, d, 2)).collect();
        let mut backups = full_per_day(&days);
        backups[0].immutable = true;
        backups[0].retention_until = Some(now + Duration::days(365));
        backups[1].legal_hold_enabled = true;

        let eval = evaluate(&backups, &daily_only(1), now);
        assert!(!eval.delete.contains(&backups[0].id));
        assert!(!eval.delete.contains(&backups[1].id));
        assert!(eval.delete.contains(&backups[2].id));
        assert_eq!(eval.vetoes.len(), 2);
        assert!(eval
            .vetoes
            .iter()
            .any(|v| v.backup_id == backups[0].id && v.reason == VetoReason::Immutable));
        assert!(eval
            .vetoes
            .iter()
            .any(|v| v.backup_id == backups[1].id && v.reason == VetoReason::LegalHold));
    }

    #[test]
    fn expired_retention_lock_no_longer_vetoes() {
        let now = at(2026, 3, 6, 0);
        let mut backups = full_per_day(&[at(2026, 3, 1, 2), at(2026, 3, 5, 2)]);
        backups[0].retention_until = Some(now - Duration::days(1));
        let eval = evaluate(&backups, &daily_only(1), now);
        assert!(eval.delete.contains(&backups[0].id));
    }

    #[test]
    fn full_with_kept_descendant_is_load_bearing() {
        // full(seq 0) -> incr(seq 1) -> incr(seq 2), one day apart; a
        // single daily slot keeps only seq 2.
        let chain = completed_chain(3, at(2026, 3, 1, 2));
        let eval = evaluate(&chain, &daily_only(1), at(2026, 3, 4, 0));

        assert!(eval.keep.contains(&chain[2].id));
        assert!(eval.keep.contains(&chain[0].id));
        assert!(eval.keep.contains(&chain[1].id));
        assert!(eval.delete.is_empty());
        assert!(eval
            .vetoes
            .iter()
            .any(|v| v.backup_id == chain[0].id && v.reason == VetoReason::LoadBearing));
    }

    #[test]
    fn ancestors_of_vetoed_candidates_are_rescued_too() {
        let now = at(2026, 3, 10, 0);
        // Chain of three; nothing matches any tier (all counts zero except
        // one daily slot taken by a separate fresh chain).
        let old_chain = completed_chain(3, at(2026, 3, 1, 2));
        let fresh = chain_member(Uuid::new_v4(), 0, None, at(2026, 3, 9, 2));
        let mut backups = old_chain.clone();
        backups.push(fresh);
        // Legal hold on the chain tip only.
        backups[2].legal_hold_enabled = true;

        let eval = evaluate(&backups, &daily_only(1), now);
        // The held tip is rescued, and with it every ancestor.
        assert!(eval.delete.is_empty());
        assert!(eval
            .vetoes
            .iter()
            .any(|v| v.backup_id == backups[0].id && v.reason == VetoReason::LoadBearing));
    }

    #[test]
    fn delete_order_is_deepest_first() {
        // Two stale chains, no tier slots at all.
        let chain_a = completed_chain(3, at(2026, 1, 1, 2));
        let chain_b = completed_chain(2, at(2026, 1, 10, 2));
        let mut backups = chain_a.clone();
        backups.extend(chain_b.clone());

        let eval = evaluate(&backups, &RetentionConfig::default(), at(2026, 3, 1, 0));
        assert_eq!(eval.delete.len(), 5);
        // Within each chain, sequence numbers strictly descend.
        let seq_of = |id: &Uuid| {
            backups
                .iter()
                .find(|b| b.id == *id)
                .map(|b| (b.chain_id, b.sequence_number))
                .unwrap()
        };
        let mut last_seen: HashMap<Uuid, i32> = HashMap::new();
        for id in &eval.delete {
            let (chain, seq) = seq_of(id);
            if let Some(prev) = last_seen.insert(chain, seq) {
                assert!(seq < prev, "incremental deleted after its ancestor");
            }
        }
    }

    #[test]
    fn evaluation_is_idempotent_on_unchanged_state() {
        let days: Vec<_> = (1..=6).map(|d| at(2026, 3, d, 2)).collect();
        let backups = full_per_day(&days);
        let config = RetentionConfig {
            daily: 2,
            weekly: 1,
            ..Default::default()
        };
        let now = at(2026, 3, 7, 0);
        let first = evaluate(&backups, &config, now);
        let second = evaluate(&backups, &config, now);
        assert_eq!(first.delete, second.delete);
        assert_eq!(first.keep, second.keep);
    }

    #[test]
    fn non_completed_rows_are_ignored() {
        let mut backups = full_per_day(&[at(2026, 3, 1, 2), at(2026, 3, 2, 2)]);
        backups[0].status = BackupStatus::Failed;
        let eval = evaluate(&backups, &daily_only(1), at(2026, 3, 3, 0));
        assert!(!eval.keep.contains(&backups[0].id));
        assert!(!eval.delete.contains(&backups[0].id));
    }

    #[test]
    fn completed_row_without_timestamp_is_kept() {
        let mut backups = full_per_day(&[at(2026, 3, 1, 2), at(2026, 3, 2, 2)]);
        backups[0].completed_at = None;
        let eval = evaluate(&backups, &daily_only(1), at(2026, 3, 3, 0));
        assert!(eval.keep.contains(&backups[0].id));
        assert!(eval.delete.is_empty());
    }
}
