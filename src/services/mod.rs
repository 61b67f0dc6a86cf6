//! Business logic services.

pub mod backup_service;
pub mod chain_service;
pub mod integrity_service;
pub mod restore_service;
pub mod retention_service;
pub mod schedule_service;
pub mod scheduler_service;
pub mod snapshot_producer;
pub mod storage_service;
