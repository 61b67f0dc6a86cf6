//! Shared test helpers: in-memory backup history builders.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use virtvault_backend::models::backup::{Backup, BackupMode, BackupStatus, SourceType};

pub fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

/// Fluent builder over a completed chain member.
pub struct BackupBuilder {
    inner: Backup,
}

pub fn backup(chain_id: Uuid, sequence_number: i32) -> BackupBuilder {
    let completed = at(2026, 1, 1, 2);
    let mode = if sequence_number == 0 {
        BackupMode::Full
    } else {
        BackupMode::Incremental
    };
    BackupBuilder {
        inner: Backup {
            id: Uuid::new_v4(),
            chain_id,
            sequence_number,
            parent_backup_id: None,
            backup_mode: mode,
            size_bytes: Some(1_000),
            compressed_size_bytes: Some(600),
            checksum: Some(format!("{:0>64}", sequence_number)),
            storage_path: Some(format!("chains/{chain_id}/{sequence_number:05}")),
            storage_backend_id: Uuid::nil(),
            status: BackupStatus::Completed,
            started_at: Some(completed),
            completed_at: Some(completed),
            verified: true,
            immutable: false,
            retention_until: None,
            legal_hold_enabled: false,
            source_type: SourceType::Vm,
            source_id: Uuid::nil(),
            schedule_id: None,
            checkpoint_token: Some(format!("cp-{sequence_number}")),
            error_message: None,
            is_deleted: false,
            deleted_at: None,
            created_at: completed,
        },
    }
}

impl BackupBuilder {
    pub fn parent(mut self, parent_backup_id: Uuid) -> Self {
        self.inner.parent_backup_id = Some(parent_backup_id);
        self
    }

    pub fn completed_at(mut self, ts: DateTime<Utc>) -> Self {
        self.inner.started_at = Some(ts);
        self.inner.completed_at = Some(ts);
        self.inner.created_at = ts;
        self
    }

    pub fn status(mut self, status: BackupStatus) -> Self {
        self.inner.status = status;
        if status != BackupStatus::Completed {
            self.inner.completed_at = None;
        }
        self
    }

    pub fn size(mut self, size_bytes: i64) -> Self {
        self.inner.size_bytes = Some(size_bytes);
        self
    }

    pub fn immutable_until(mut self, until: DateTime<Utc>) -> Self {
        self.inner.immutable = true;
        self.inner.retention_until = Some(until);
        self
    }

    pub fn legal_hold(mut self) -> Self {
        self.inner.legal_hold_enabled = true;
        self
    }

    pub fn source(mut self, source_type: SourceType, source_id: Uuid) -> Self {
        self.inner.source_type = source_type;
        self.inner.source_id = source_id;
        self
    }

    pub fn build(self) -> Backup {
        self.inner
    }
}

/// A linked chain of `len` completed members, one day apart, completing
/// at `start`.
pub fn completed_chain(len: usize, start: DateTime<Utc>) -> Vec<Backup> {
    let chain_id = Uuid::new_v4();
    let mut members: Vec<Backup> = Vec::with_capacity(len);
    for seq in 0..len {
        let completed = start + chrono::Duration::days(seq as i64);
        let mut builder = backup(chain_id, seq as i32).completed_at(completed);
        if let Some(parent) = members.last() {
            builder = builder.parent(parent.id);
        }
        members.push(builder.build());
    }
    members
}
