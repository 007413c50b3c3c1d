//! OneMount Cache - Local state persistence
//!
//! SQLite-based implementation of `onemount_core::ports::IStateRepository`,
//! backing every named bucket from the data model (`metadata`, `delta`,
//! `offline_changes`, `uploads`, `version`) plus accounts, the audit trail,
//! and conflicts in a single on-disk database.

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteStateRepository;

/// Errors produced by the cache adapter.
///
/// Kept separate from `onemount_core::domain::DomainError`: these are
/// storage-layer failures (connection, migration, row decoding), not
/// violations of a domain invariant.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to open or configure the SQLite connection pool.
    #[error("database connection failed: {0}")]
    ConnectionFailed(String),

    /// A schema migration did not apply cleanly.
    #[error("database migration failed: {0}")]
    MigrationFailed(String),

    /// A row could not be decoded into its domain type.
    #[error("failed to serialize/deserialize cached data: {0}")]
    SerializationError(String),

    /// A query referenced a row that does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}
