//! Backup chain engine.
//!
//! The four pieces with real algorithmic weight live here as pure functions
//! over explicit input structs, so they are unit-testable without a
//! database: full-versus-incremental decisions ([`builder`]), GFS retention
//! bucketing ([`retention`]), restoration planning ([`restore`]), and chain
//! integrity checking ([`integrity`]). The `services` layer wires them to
//! the persistence and storage layers.

pub mod builder;
pub mod integrity;
pub mod restore;
pub mod retention;

use thiserror::Error;
use uuid::Uuid;

/// Chain-structure violations surfaced by planning and validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("backup {0} not found")]
    TargetNotFound(Uuid),

    #[error("backup {backup_id} has status {status} and cannot be restored")]
    TargetNotRestorable { backup_id: Uuid, status: String },

    /// The requested target lies beyond a broken link. `last_restorable_sequence`
    /// is the last contiguous completed sequence number before the break
    /// (`None` when not even the full backup is usable).
    #[error(
        "chain {chain_id} is broken at sequence {broken_at}: {reason} \
         (last restorable sequence: {last_restorable_sequence:?})"
    )]
    Broken {
        chain_id: Uuid,
        broken_at: i32,
        reason: String,
        last_restorable_sequence: Option<i32>,
    },
}
