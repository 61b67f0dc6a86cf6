//! Chain integrity checking.
//!
//! Validates a chain's structural consistency before it is trusted for
//! restore or before any member is deleted, and answers which backups are
//! load-bearing for the retention evaluator.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::models::backup::{Backup, BackupStatus};

/// Issue severity: critical blocks restore past the issue, warning means
/// degraded but restorable to an earlier point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityIssue {
    pub severity: IssueSeverity,
    pub sequence_number: Option<i32>,
    pub backup_id: Option<Uuid>,
    pub message: String,
}

/// Result of a chain integrity check.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub chain_id: Uuid,
    /// No critical issues found.
    pub valid: bool,
    /// The chain is restorable to its latest completed member.
    pub restorable: bool,
    pub total_backups: usize,
    pub completed_backups: usize,
    /// Last sequence number reachable through an unbroken run of completed
    /// backups starting at 0. `None` when not even the full backup is usable.
    pub last_restorable_sequence: Option<i32>,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn has_critical(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Critical)
    }
}

/// Check the structural consistency of one chain.
///
/// `backups` may contain rows from other chains; only non-deleted rows of
/// `chain_id` are considered. Cancelled rows are counted but never take
/// part in contiguity or linkage checks (invariant: sequence numbers are
/// contiguous among non-cancelled backups).
pub fn check(chain_id: Uuid, backups: &[Backup]) -> IntegrityReport {
    let members: Vec<&Backup> = backups
        .iter()
        .filter(|b| b.chain_id == chain_id && !b.is_deleted)
        .collect();
    let by_id: HashMap<Uuid, &Backup> = members.iter().map(|b| (b.id, *b)).collect();
    let active: Vec<&Backup> = members
        .iter()
        .filter(|b| b.status != BackupStatus::Cancelled)
        .copied()
        .collect();

    let mut issues = Vec::new();

    let mut completed_by_seq: BTreeMap<i32, Vec<&Backup>> = BTreeMap::new();
    for &b in &active {
        if b.status == BackupStatus::Completed {
            completed_by_seq.entry(b.sequence_number).or_default().push(b);
        }
    }
    let completed_count: usize = completed_by_seq.values().map(Vec::len).sum();
    let max_completed_seq = completed_by_seq.keys().next_back().copied();

    // Duplicate sequence numbers in the completed set.
    for (seq, rows) in &completed_by_seq {
        if rows.len() > 1 {
            issues.push(IntegrityIssue {
                severity: IssueSeverity::Critical,
                sequence_number: Some(*seq),
                backup_id: None,
                message: format!(
                    "{} completed backups share sequence number {}",
                    rows.len(),
                    seq
                ),
            });
        }
    }

    // Gaps in the completed set below its maximum.
    if let Some(max_seq) = max_completed_seq {
        for expected in 0..=max_seq {
            if !completed_by_seq.contains_key(&expected) {
                issues.push(IntegrityIssue {
                    severity: IssueSeverity::Critical,
                    sequence_number: Some(expected),
                    backup_id: None,
                    message: format!("missing completed backup at sequence number {}", expected),
                });
            }
        }
    }

    // In-flight rows below the completed frontier.
    if let Some(max_seq) = max_completed_seq {
        for b in &active {
            if matches!(b.status, BackupStatus::Pending | BackupStatus::Running)
                && b.sequence_number < max_seq
            {
                issues.push(IntegrityIssue {
                    severity: IssueSeverity::Warning,
                    sequence_number: Some(b.sequence_number),
                    backup_id: Some(b.id),
                    message: format!(
                        "backup at sequence number {} is still {} mid-chain",
                        b.sequence_number, b.status
                    ),
                });
            }
        }
    }

    // Recorded but unverified checksums.
    for b in &active {
        if b.status == BackupStatus::Completed && b.checksum.is_some() && !b.verified {
            issues.push(IntegrityIssue {
                severity: IssueSeverity::Warning,
                sequence_number: Some(b.sequence_number),
                backup_id: Some(b.id),
                message: "checksum recorded but not verified against the stored artifact".into(),
            });
        }
    }

    // Parent linkage of incrementals.
    for b in &active {
        if b.sequence_number == 0 {
            continue;
        }
        match b.parent_backup_id {
            None => issues.push(IntegrityIssue {
                severity: IssueSeverity::Critical,
                sequence_number: Some(b.sequence_number),
                backup_id: Some(b.id),
                message: format!(
                    "incremental at sequence number {} has no parent link",
                    b.sequence_number
                ),
            }),
            Some(parent_id) => match by_id.get(&parent_id) {
                None => issues.push(IntegrityIssue {
                    severity: IssueSeverity::Critical,
                    sequence_number: Some(b.sequence_number),
                    backup_id: Some(b.id),
                    message: format!("orphaned incremental: parent backup {} is gone", parent_id),
                }),
                Some(parent) => {
                    if parent.sequence_number != b.sequence_number - 1 {
                        issues.push(IntegrityIssue {
                            severity: IssueSeverity::Critical,
                            sequence_number: Some(b.sequence_number),
                            backup_id: Some(b.id),
                            message: format!(
                                "parent of sequence number {} has sequence number {}, expected {}",
                                b.sequence_number,
                                parent.sequence_number,
                                b.sequence_number - 1
                            ),
                        });
                    }
                }
            },
        }
    }

    let last_restorable = last_restorable_sequence(&completed_by_seq);
    let restorable = match (last_restorable, max_completed_seq) {
        (Some(last), Some(max)) => last == max,
        _ => false,
    };
    let valid = !issues
        .iter()
        .any(|i| i.severity == IssueSeverity::Critical);

    IntegrityReport {
        chain_id,
        valid,
        restorable,
        total_backups: members.len(),
        completed_backups: completed_count,
        last_restorable_sequence: last_restorable,
        issues,
    }
}

/// Walk the completed set upward from sequence 0, following parent links,
/// and return the last sequence number reached.
fn last_restorable_sequence(completed_by_seq: &BTreeMap<i32, Vec<&Backup>>) -> Option<i32> {
    let mut last = None;
    let mut prev_id: Option<Uuid> = None;
    for expected in 0.. {
        let Some(rows) = completed_by_seq.get(&expected) else {
            break;
        };
        if rows.len() != 1 {
            break;
        }
        let row = rows[0];
        if expected > 0 && row.parent_backup_id != prev_id {
            break;
        }
        last = Some(expected);
        prev_id = Some(row.id);
    }
    last
}

/// Backups that a still-kept, completed backup depends on.
///
/// Walks `parent_backup_id` upward from every kept completed backup and
/// collects every ancestor id. Deleting any of these would make a kept
/// descendant unrestorable.
pub fn load_bearing_ids(backups: &[Backup], kept: &HashSet<Uuid>) -> HashSet<Uuid> {
    let by_id: HashMap<Uuid, &Backup> = backups.iter().map(|b| (b.id, b)).collect();
    let mut bearing = HashSet::new();
    for id in kept {
        let Some(mut current) = by_id.get(id).copied() else {
            continue;
        };
        if current.status != BackupStatus::Completed || current.is_deleted {
            continue;
        }
        while let Some(parent_id) = current.parent_backup_id {
            if !bearing.insert(parent_id) {
                // Already walked from this ancestor upward.
                break;
            }
            match by_id.get(&parent_id) {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }
    bearing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_support::{at, chain_member, completed_chain};
    use crate::models::backup::BackupStatus;

    #[test]
    fn healthy_chain_is_valid_and_restorable() {
        let chain = completed_chain(4, at(2026, 1, 1, 3));
        let report = check(chain[0].chain_id, &chain);
        assert!(report.valid);
        assert!(report.restorable);
        assert_eq!(report.total_backups, 4);
        assert_eq!(report.completed_backups, 4);
        assert_eq!(report.last_restorable_sequence, Some(3));
        assert!(report.issues.is_empty());
    }

    #[test]
    fn sequence_gap_is_critical_and_caps_restorability() {
        let mut chain = completed_chain(5, at(2026, 1, 1, 3));
        // Hard-remove sequence 2 entirely.
        let removed = chain.remove(2);
        let report = check(removed.chain_id, &chain);
        assert!(!report.valid);
        assert!(!report.restorable);
        assert_eq!(report.last_restorable_sequence, Some(1));
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Critical
                && i.message.contains("missing completed backup")));
        // Sequence 3's parent row is gone too.
        assert!(report
            .issues
            .iter()
            .any(|i| i.message.contains("orphaned incremental")));
    }

    #[test]
    fn duplicate_sequence_is_critical() {
        let mut chain = completed_chain(3, at(2026, 1, 1, 3));
        let dup = chain_member(
            chain[0].chain_id,
            1,
            Some(chain[0].id),
            at(2026, 1, 5, 3),
        );
        chain.push(dup);
        let report = check(chain[0].chain_id, &chain);
        assert!(!report.valid);
        assert_eq!(report.last_restorable_sequence, Some(0));
        assert!(report
            .issues
            .iter()
            .any(|i| i.message.contains("share sequence number 1")));
    }

    #[test]
    fn in_flight_row_mid_chain_is_a_warning() {
        let mut chain = completed_chain(4, at(2026, 1, 1, 3));
        chain[1].status = BackupStatus::Running;
        let report = check(chain[0].chain_id, &chain);
        // Sequence 1 dropped out of the completed set, so the gap is also
        // critical; the in-flight row itself only warns.
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Warning
                && i.message.contains("still running mid-chain")));
        assert_eq!(report.last_restorable_sequence, Some(0));
    }

    #[test]
    fn in_flight_tail_does_not_warn() {
        let mut chain = completed_chain(3, at(2026, 1, 1, 3));
        let tail = {
            let parent = &chain[2];
            let mut b = chain_member(parent.chain_id, 3, Some(parent.id), at(2026, 1, 4, 3));
            b.status = BackupStatus::Running;
            b.completed_at = None;
            b
        };
        chain.push(tail);
        let report = check(chain[0].chain_id, &chain);
        assert!(report.valid);
        assert!(report.restorable);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn unverified_checksum_is_a_warning() {
        let mut chain = completed_chain(2, at(2026, 1, 1, 3));
        chain[1].verified = false;
        let report = check(chain[0].chain_id, &chain);
        assert!(report.valid);
        assert!(report.restorable);
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Warning && i.message.contains("not verified")));
    }

    #[test]
    fn cancelled_rows_do_not_break_contiguity() {
        let mut chain = completed_chain(3, at(2026, 1, 1, 3));
        let cancelled = {
            let mut b = chain_member(chain[0].chain_id, 3, Some(chain[2].id), at(2026, 1, 4, 3));
            b.status = BackupStatus::Cancelled;
            b.completed_at = None;
            b
        };
        chain.push(cancelled);
        let report = check(chain[0].chain_id, &chain);
        assert!(report.valid);
        assert!(report.restorable);
        assert_eq!(report.total_backups, 4);
        assert_eq!(report.completed_backups, 3);
    }

    #[test]
    fn load_bearing_walks_all_ancestors() {
        let chain = completed_chain(4, at(2026, 1, 1, 3));
        let kept: HashSet<Uuid> = [chain[3].id].into_iter().collect();
        let bearing = load_bearing_ids(&chain, &kept);
        assert_eq!(
            bearing,
            [chain[0].id, chain[1].id, chain[2].id].into_iter().collect()
        );
    }

    #[test]
    fn non_completed_kept_rows_bear_no_load() {
        let mut chain = completed_chain(3, at(2026, 1, 1, 3));
        chain[2].status = BackupStatus::Failed;
        let kept: HashSet<Uuid> = [chain[2].id].into_iter().collect();
        assert!(load_bearing_ids(&chain, &kept).is_empty());
    }
}
