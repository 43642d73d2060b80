// ambassador-store-sqlite/src/schema.rs
// ============================================================================
// Module: SQLite Schema Initialization
// Description: Connection setup, pragmas, and version-gated schema migration.
// Purpose: Open a durable, WAL-backed SQLite database matching the full
//          Ambassador entity model (spec.md §3) behind a single schema_meta
//          version row.
// Dependencies: rusqlite
// ============================================================================

//! ## Overview
//! Every table owning a `user_id` or `client_id` carries an explicit
//! `ON DELETE CASCADE` foreign key so that removing a user tears down every
//! client, session, credential, and subscription beneath it in one
//! transaction (I-1). Schema changes bump [`SCHEMA_VERSION`] and are applied
//! inside [`initialize_schema`] the same way the reference store does it:
//! read the current version from `store_meta`, migrate forward one step at a
//! time, and reject anything newer than what this build understands.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Current schema version understood by this build.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout, in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy, single-writer deployments).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced, safe under WAL).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite`-backed store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: std::path::PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Opens an `SQLite` connection and applies pragmas and schema migration.
///
/// # Errors
///
/// Returns a [`rusqlite::Error`] when the database cannot be opened, or when
/// pragma application or schema initialization fails.
pub fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, rusqlite::Error> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|error| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(error.to_string()),
                )
            })?;
        }
    }

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let mut connection = Connection::open_with_flags(&config.path, flags)?;
    apply_pragmas(&connection, config)?;
    initialize_schema(&mut connection)?;
    Ok(connection)
}

/// Opens an in-memory connection, used by tests that need no durability.
///
/// # Errors
///
/// Returns a [`rusqlite::Error`] when initialization fails.
pub fn open_in_memory() -> Result<Connection, rusqlite::Error> {
    let mut connection = Connection::open_in_memory()?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    initialize_schema(&mut connection)?;
    Ok(connection)
}

fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), rusqlite::Error> {
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    connection.execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection.execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}

/// Initializes the schema or migrates forward from whatever version is on
/// disk, matching the whole entity model (spec.md §3).
fn initialize_schema(connection: &mut Connection) -> Result<(), rusqlite::Error> {
    let tx = connection.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;

    let version: Option<i64> =
        tx.query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0)).optional()?;

    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            tx.execute_batch(SCHEMA_DDL)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_SCHEMA),
                Some(format!("unsupported ambassador schema version: {value}")),
            ));
        }
    }

    tx.commit()
}

/// Returns the path `:memory:` uses for test stores.
#[must_use]
pub fn validate_store_path(path: &Path) -> bool {
    !path.is_dir()
}

const SCHEMA_DDL: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    is_admin INTEGER NOT NULL,
    status TEXT NOT NULL,
    vault_salt BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tool_profiles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    allow TEXT NOT NULL,
    deny TEXT NOT NULL,
    rate_limit TEXT NOT NULL,
    parent_id TEXT REFERENCES tool_profiles(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    key_prefix TEXT NOT NULL UNIQUE,
    secret_hash TEXT NOT NULL,
    profile_id TEXT REFERENCES tool_profiles(id) ON DELETE SET NULL,
    status TEXT NOT NULL,
    expires_at TEXT,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_clients_user_id ON clients (user_id);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
    token_hash TEXT NOT NULL,
    token_nonce TEXT NOT NULL,
    status TEXT NOT NULL,
    profile_id TEXT REFERENCES tool_profiles(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    last_activity_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    idle_timeout_seconds INTEGER NOT NULL,
    spindown_delay_seconds INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions (user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions (status);

CREATE TABLE IF NOT EXISTS connections (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    friendly_name TEXT NOT NULL,
    last_heartbeat_at TEXT NOT NULL,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_connections_session_id ON connections (session_id);

CREATE TABLE IF NOT EXISTS groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS user_groups (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    PRIMARY KEY (user_id, group_id)
);

CREATE TABLE IF NOT EXISTS mcp_catalog (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    transport TEXT NOT NULL,
    config TEXT NOT NULL,
    isolation TEXT NOT NULL,
    requires_user_credentials INTEGER NOT NULL,
    credential_schema TEXT,
    auth_type TEXT NOT NULL,
    oauth_config TEXT,
    publication_status TEXT NOT NULL,
    validated INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS mcp_group_access (
    catalog_entry_id TEXT NOT NULL REFERENCES mcp_catalog(id) ON DELETE CASCADE,
    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    PRIMARY KEY (catalog_entry_id, group_id)
);

CREATE TABLE IF NOT EXISTS client_mcp_subscriptions (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
    catalog_entry_id TEXT NOT NULL REFERENCES mcp_catalog(id) ON DELETE CASCADE,
    tool_names TEXT NOT NULL,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_subscriptions_client_id ON client_mcp_subscriptions (client_id);

CREATE TABLE IF NOT EXISTS user_mcp_credentials (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    catalog_entry_id TEXT NOT NULL REFERENCES mcp_catalog(id) ON DELETE CASCADE,
    ciphertext BLOB NOT NULL,
    iv BLOB NOT NULL,
    credential_type TEXT NOT NULL,
    expires_at TEXT,
    oauth_status TEXT,
    UNIQUE (user_id, catalog_entry_id)
);

CREATE TABLE IF NOT EXISTS oauth_states (
    state TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    catalog_entry_id TEXT NOT NULL REFERENCES mcp_catalog(id) ON DELETE CASCADE,
    code_verifier TEXT NOT NULL,
    redirect_uri TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_oauth_states_expires_at ON oauth_states (expires_at);

CREATE TABLE IF NOT EXISTS admin_keys (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    admin_key_hash TEXT NOT NULL,
    recovery_token_hash TEXT NOT NULL,
    rotated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_events (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    user_id TEXT,
    client_id TEXT,
    event_type TEXT NOT NULL,
    detail TEXT NOT NULL,
    outcome TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events (timestamp);
";

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_initializes_schema_version() {
        let connection = open_in_memory().expect("opens");
        let version: i64 = connection
            .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
            .expect("reads version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn reopening_an_initialized_schema_is_a_no_op() {
        let mut connection = open_in_memory().expect("opens");
        initialize_schema(&mut connection).expect("idempotent re-init");
    }
}
