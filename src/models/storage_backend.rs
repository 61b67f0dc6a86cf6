//! Storage backend registration rows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A named storage backend the gateway registry is built from.
///
/// `kind` selects the driver ("filesystem", "memory", or a kind registered
/// by an external driver); `config` is driver-specific.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StorageBackendRow {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub config: serde_json::Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}
