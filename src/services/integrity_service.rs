//! Chain integrity reports over persisted state.

use sqlx::PgPool;
use uuid::Uuid;

use crate::chain::integrity::{self, IntegrityReport};
use crate::error::{AppError, Result};
use crate::services::backup_service::BackupService;

pub struct IntegrityService {
    backups: BackupService,
}

impl IntegrityService {
    pub fn new(db: PgPool) -> Self {
        Self {
            backups: BackupService::new(db),
        }
    }

    /// Structural consistency report for one chain.
    pub async fn check_integrity(&self, chain_id: Uuid) -> Result<IntegrityReport> {
        let rows = self.backups.list_chain(chain_id).await?;
        if rows.is_empty() {
            return Err(AppError::NotFound(format!("Chain {chain_id} not found")));
        }
        Ok(integrity::check(chain_id, &rows))
    }
}
