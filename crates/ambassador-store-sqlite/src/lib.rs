// ambassador-store-sqlite/src/lib.rs
// ============================================================================
// Module: Ambassador SQLite Store
// Description: Crate root wiring schema, row mapping, and the CRUD store.
// Purpose: Give the CLI crate a single persistence backend implementing every
//          lookup trait the pipeline and providers crates depend on.
// Dependencies: ambassador-core, ambassador-providers, rusqlite
// ============================================================================

//! ## Overview
//! This crate is the only place that knows `SQLite` exists. Everything above
//! it — `ambassador-core`, `ambassador-providers`, `ambassador-orchestrator` —
//! talks to domain types and narrow lookup traits; this crate maps those
//! types onto rows and wraps a single [`rusqlite::Connection`] behind a
//! blocking mutex, offloading every call through [`tokio::task::spawn_blocking`]
//! (spec.md §5: rusqlite has no async story, and the reference store takes
//! the same approach rather than pulling in a second async SQLite binding).

// ============================================================================
// SECTION: Modules
// ============================================================================

mod rows;
mod schema;
mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use schema::SqliteStoreConfig;
pub use schema::SqliteStoreMode;
pub use schema::SqliteSyncMode;
pub use schema::open_connection;
pub use schema::open_in_memory;
pub use schema::validate_store_path;
pub use store::Store;
pub use store::StoreAuditSink;

use thiserror::Error;

// ============================================================================
// SECTION: Store Error
// ============================================================================

/// Errors raised by the `SQLite`-backed store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying `SQLite` call failed.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A row's encoded column contents could not be decoded into a domain type.
    #[error("stored row is corrupt: {0}")]
    Corrupt(String),
    /// The requested entity does not exist.
    #[error("entity not found")]
    NotFound,
    /// The operation conflicts with an existing row (unique constraint, etc).
    #[error("conflicting row: {0}")]
    Conflict(String),
    /// The blocking task running the query panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(String),
}

impl StoreError {
    /// Maps a `SQLite` error to [`StoreError::Conflict`] when it reports a
    /// uniqueness or foreign-key violation, otherwise wraps it untouched.
    #[must_use]
    pub fn from_sqlite(error: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, ref detail) = error {
            if matches!(
                failure.code,
                rusqlite::ErrorCode::ConstraintViolation
            ) {
                return Self::Conflict(detail.clone().unwrap_or_else(|| error.to_string()));
            }
        }
        Self::Sqlite(error)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Join(error.to_string())
    }
}
