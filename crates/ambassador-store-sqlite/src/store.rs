// ambassador-store-sqlite/src/store.rs
// ============================================================================
// Module: Store
// Description: CRUD operations over every table in SCHEMA_DDL, plus the
//              lookup-trait and audit-sink implementations the rest of the
//              workspace depends on.
// Purpose: Give the orchestrator and CLI crates one persistence handle for
//          the full entity model (spec.md §3).
// Dependencies: ambassador-core, ambassador-providers, rusqlite, tokio
// ============================================================================

//! ## Overview
//! [`Store`] wraps a single [`rusqlite::Connection`] behind a
//! [`std::sync::Mutex`] and runs every query inside
//! [`tokio::task::spawn_blocking`]. `SQLite`'s own file lock already
//! serializes writers, so the in-process mutex exists only to satisfy
//! `Connection`'s `!Sync` bound, not to add a second layer of contention.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use ambassador_core::AdminKey;
use ambassador_core::AuditError;
use ambassador_core::AuditEvent;
use ambassador_core::AuditEventId;
use ambassador_core::AuditSink;
use ambassador_core::CatalogEntry;
use ambassador_core::CatalogEntryId;
use ambassador_core::Client;
use ambassador_core::ClientId;
use ambassador_core::ClientStatus;
use ambassador_core::Connection as DomainConnection;
use ambassador_core::ConnectionId;
use ambassador_core::ConnectionStatus;
use ambassador_core::CredentialId;
use ambassador_core::Group;
use ambassador_core::GroupId;
use ambassador_core::PublicationStatus;
use ambassador_core::Session;
use ambassador_core::SessionId;
use ambassador_core::SessionStatus;
use ambassador_core::Subscription;
use ambassador_core::Timestamp;
use ambassador_core::ToolProfile;
use ambassador_core::ToolProfileId;
use ambassador_core::User;
use ambassador_core::UserCredential;
use ambassador_core::UserId;
use ambassador_core::UserStatus;
use ambassador_providers::ClientLookup;
use ambassador_providers::ClientLookupError;
use ambassador_providers::ProfileLookup;
use ambassador_providers::ProfileLookupError;
use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::StoreError;
use crate::rows;
use crate::schema::SqliteStoreConfig;
use crate::schema::open_connection;
use crate::schema::open_in_memory;

// ============================================================================
// SECTION: Store
// ============================================================================

/// A `SQLite`-backed handle onto the full Ambassador entity model.
#[derive(Clone)]
pub struct Store {
    /// Shared handle onto the single underlying connection.
    connection: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens a durable store at the path in `config`, applying pragmas and
    /// running schema migration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the connection cannot be opened or the
    /// schema cannot be initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, StoreError> {
        let connection = open_connection(config)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Opens an in-memory store, used by tests that need no durability.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when schema initialization fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = open_in_memory()?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Runs `f` against the connection on a blocking worker thread.
    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let guard = connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            f(&guard)
        })
        .await?
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Inserts a new user row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the username is already taken.
    pub async fn create_user(&self, user: User) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute(
                    "INSERT INTO users (id, username, is_admin, status, vault_salt, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        user.id.as_str(),
                        user.username,
                        i64::from(user.is_admin),
                        rows::user_status_text(user.status),
                        user.vault_salt.map(|salt| salt.to_vec()),
                        rows::encode_timestamp(user.created_at),
                        rows::encode_timestamp(user.updated_at),
                    ],
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Looks up a user by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row("SELECT * FROM users WHERE id = ?1", params![id.as_str()], |row| rows::user_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Looks up a user by username.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_user_by_username(&self, username: String) -> Result<Option<User>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row("SELECT * FROM users WHERE username = ?1", params![username], |row| rows::user_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Updates a user's lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such user exists.
    pub async fn update_user_status(&self, id: UserId, status: UserStatus) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            let changed = connection
                .execute(
                    "UPDATE users SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![rows::user_status_text(status), rows::encode_timestamp(Timestamp::now()), id.as_str()],
                )
                .map_err(StoreError::from_sqlite)?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Stores a freshly provisioned per-user vault salt.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such user exists.
    pub async fn set_vault_salt(&self, id: UserId, salt: [u8; 32]) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            let changed = connection
                .execute(
                    "UPDATE users SET vault_salt = ?1, updated_at = ?2 WHERE id = ?3",
                    params![salt.to_vec(), rows::encode_timestamp(Timestamp::now()), id.as_str()],
                )
                .map_err(StoreError::from_sqlite)?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------

    /// Inserts a new client row (I-1: bound to exactly one user).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the key prefix collides.
    pub async fn create_client(&self, client: Client) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute(
                    "INSERT INTO clients (id, user_id, key_prefix, secret_hash, profile_id, status, expires_at, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        client.id.as_str(),
                        client.user_id.as_str(),
                        client.key_prefix,
                        client.secret_hash,
                        client.profile_id.as_ref().map(ToolProfileId::as_str),
                        rows::client_status_text(client.status),
                        client.expires_at.map(rows::encode_timestamp),
                        client.metadata.to_string(),
                        rows::encode_timestamp(client.created_at),
                    ],
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Looks up a client by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_client(&self, id: ClientId) -> Result<Option<Client>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row("SELECT * FROM clients WHERE id = ?1", params![id.as_str()], |row| rows::client_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Looks up a client by its non-secret key prefix (spec.md §4.6).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_client_by_key_prefix(&self, prefix: String) -> Result<Option<Client>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row("SELECT * FROM clients WHERE key_prefix = ?1", params![prefix], |row| rows::client_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Lists every client owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn list_clients_for_user(&self, user_id: UserId) -> Result<Vec<Client>, StoreError> {
        self.blocking(move |connection| {
            let mut statement =
                connection.prepare("SELECT * FROM clients WHERE user_id = ?1 ORDER BY created_at").map_err(StoreError::from_sqlite)?;
            let rows = statement
                .query_map(params![user_id.as_str()], |row| rows::client_from_row(row))
                .map_err(StoreError::from_sqlite)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Updates a client's lifecycle status (suspend/revoke, I-1).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such client exists.
    pub async fn update_client_status(&self, id: ClientId, status: ClientStatus) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            let changed = connection
                .execute("UPDATE clients SET status = ?1 WHERE id = ?2", params![rows::client_status_text(status), id.as_str()])
                .map_err(StoreError::from_sqlite)?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Tool Profiles
    // ------------------------------------------------------------------

    /// Inserts a new tool profile.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the name is already taken.
    pub async fn create_tool_profile(&self, profile: ToolProfile) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute(
                    "INSERT INTO tool_profiles (id, name, allow, deny, rate_limit, parent_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        profile.id.as_str(),
                        profile.name,
                        rows::encode_pattern_list(&profile.allow),
                        rows::encode_pattern_list(&profile.deny),
                        rows::encode_rate_limit(&profile.rate_limit),
                        profile.parent_id.as_ref().map(ToolProfileId::as_str),
                    ],
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Looks up a tool profile by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_tool_profile(&self, id: ToolProfileId) -> Result<Option<ToolProfile>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row("SELECT * FROM tool_profiles WHERE id = ?1", params![id.as_str()], |row| rows::tool_profile_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Looks up a tool profile by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_tool_profile_by_name(&self, name: String) -> Result<Option<ToolProfile>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row("SELECT * FROM tool_profiles WHERE name = ?1", params![name], |row| rows::tool_profile_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Inserts a new session row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails.
    pub async fn create_session(&self, session: Session) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute(
                    "INSERT INTO sessions (
                        id, user_id, client_id, token_hash, token_nonce, status, profile_id,
                        created_at, last_activity_at, expires_at, idle_timeout_seconds, spindown_delay_seconds
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        session.id.as_str(),
                        session.user_id.as_str(),
                        session.client_id.as_str(),
                        session.token_hash,
                        session.token_nonce,
                        rows::session_status_text(session.status),
                        session.profile_id.as_ref().map(ToolProfileId::as_str),
                        rows::encode_timestamp(session.created_at),
                        rows::encode_timestamp(session.last_activity_at),
                        rows::encode_timestamp(session.expires_at),
                        i64::try_from(session.idle_timeout_seconds).unwrap_or(i64::MAX),
                        i64::try_from(session.spindown_delay_seconds).unwrap_or(i64::MAX),
                    ],
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Looks up a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row("SELECT * FROM sessions WHERE id = ?1", params![id.as_str()], |row| rows::session_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Looks up the most recently created session registered by `client_id`.
    ///
    /// Re-registration (spec.md §4.3) replaces the token on this row rather
    /// than inserting a new one, so at most one row is expected; the
    /// ordering guards against a historical duplicate left by a crash
    /// between insert and an old row's sweep.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_session_by_client(&self, client_id: ClientId) -> Result<Option<Session>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row(
                    "SELECT * FROM sessions WHERE client_id = ?1 ORDER BY created_at DESC LIMIT 1",
                    params![client_id.as_str()],
                    |row| rows::session_from_row(row),
                )
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Rotates a session's token hash, nonce, and expiry on re-registration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such session exists.
    pub async fn replace_session_token(
        &self,
        id: SessionId,
        token_hash: String,
        token_nonce: String,
        expires_at: Timestamp,
    ) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            let changed = connection
                .execute(
                    "UPDATE sessions SET token_hash = ?1, token_nonce = ?2, expires_at = ?3, status = ?4 WHERE id = ?5",
                    params![
                        token_hash,
                        token_nonce,
                        rows::encode_timestamp(expires_at),
                        rows::session_status_text(SessionStatus::Active),
                        id.as_str(),
                    ],
                )
                .map_err(StoreError::from_sqlite)?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Updates a session's lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such session exists.
    pub async fn update_session_status(&self, id: SessionId, status: SessionStatus) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            let changed = connection
                .execute("UPDATE sessions SET status = ?1 WHERE id = ?2", params![rows::session_status_text(status), id.as_str()])
                .map_err(StoreError::from_sqlite)?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Bumps a session back to `active` and records fresh activity, as every
    /// heartbeat and tool invocation does (spec.md §4.3).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such session exists.
    pub async fn touch_session_activity(&self, id: SessionId, at: Timestamp) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            let changed = connection
                .execute(
                    "UPDATE sessions SET last_activity_at = ?1, status = ?2 WHERE id = ?3",
                    params![rows::encode_timestamp(at), rows::session_status_text(SessionStatus::Active), id.as_str()],
                )
                .map_err(StoreError::from_sqlite)?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Lists every session currently in `status`, used by the lifecycle
    /// evaluator's periodic sweep.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn list_sessions_by_status(&self, status: SessionStatus) -> Result<Vec<Session>, StoreError> {
        self.blocking(move |connection| {
            let mut statement =
                connection.prepare("SELECT * FROM sessions WHERE status = ?1").map_err(StoreError::from_sqlite)?;
            let rows = statement
                .query_map(params![rows::session_status_text(status)], |row| rows::session_from_row(row))
                .map_err(StoreError::from_sqlite)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Physically deletes a session row once it has been swept (spec.md
    /// §4.3: expired sessions are deleted outright, not merely marked).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn delete_session(&self, id: SessionId) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection.execute("DELETE FROM sessions WHERE id = ?1", params![id.as_str()]).map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Inserts a new connection row under an existing session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails.
    pub async fn create_connection(&self, connection_row: DomainConnection) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute(
                    "INSERT INTO connections (id, session_id, friendly_name, last_heartbeat_at, status)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        connection_row.id.as_str(),
                        connection_row.session_id.as_str(),
                        connection_row.friendly_name,
                        rows::encode_timestamp(connection_row.last_heartbeat_at),
                        rows::connection_status_text(connection_row.status),
                    ],
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Records a heartbeat and marks the connection connected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such connection exists.
    pub async fn update_connection_heartbeat(&self, id: ConnectionId, at: Timestamp) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            let changed = connection
                .execute(
                    "UPDATE connections SET last_heartbeat_at = ?1, status = ?2 WHERE id = ?3",
                    params![rows::encode_timestamp(at), rows::connection_status_text(ConnectionStatus::Connected), id.as_str()],
                )
                .map_err(StoreError::from_sqlite)?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Marks a connection disconnected without removing its row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such connection exists.
    pub async fn mark_connection_disconnected(&self, id: ConnectionId) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            let changed = connection
                .execute(
                    "UPDATE connections SET status = ?1 WHERE id = ?2",
                    params![rows::connection_status_text(ConnectionStatus::Disconnected), id.as_str()],
                )
                .map_err(StoreError::from_sqlite)?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Physically removes a connection row (`DELETE /v1/sessions/connections/:id`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn delete_connection(&self, id: ConnectionId) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection.execute("DELETE FROM connections WHERE id = ?1", params![id.as_str()]).map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Lists every connection under a session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn list_connections_for_session(&self, session_id: SessionId) -> Result<Vec<DomainConnection>, StoreError> {
        self.blocking(move |connection| {
            let mut statement = connection
                .prepare("SELECT * FROM connections WHERE session_id = ?1 ORDER BY last_heartbeat_at DESC")
                .map_err(StoreError::from_sqlite)?;
            let rows = statement
                .query_map(params![session_id.as_str()], |row| rows::connection_from_row(row))
                .map_err(StoreError::from_sqlite)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Counts connections currently marked connected under a session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn count_connected_for_session(&self, session_id: SessionId) -> Result<u64, StoreError> {
        self.blocking(move |connection| {
            let count: i64 = connection
                .query_row(
                    "SELECT COUNT(*) FROM connections WHERE session_id = ?1 AND status = ?2",
                    params![session_id.as_str(), rows::connection_status_text(ConnectionStatus::Connected)],
                    |row| row.get(0),
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Inserts a new group.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the name is already taken.
    pub async fn create_group(&self, group: Group) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute("INSERT INTO groups (id, name) VALUES (?1, ?2)", params![group.id.as_str(), group.name])
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Looks up a group by name (used to resolve the distinguished
    /// `all-users` group).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_group_by_name(&self, name: String) -> Result<Option<Group>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row("SELECT * FROM groups WHERE name = ?1", params![name], |row| rows::group_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Adds a user to a group.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails.
    pub async fn add_user_to_group(&self, user_id: UserId, group_id: GroupId) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute(
                    "INSERT OR IGNORE INTO user_groups (user_id, group_id) VALUES (?1, ?2)",
                    params![user_id.as_str(), group_id.as_str()],
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Lists every group a user belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn list_groups_for_user(&self, user_id: UserId) -> Result<Vec<Group>, StoreError> {
        self.blocking(move |connection| {
            let mut statement = connection
                .prepare("SELECT g.* FROM groups g JOIN user_groups ug ON ug.group_id = g.id WHERE ug.user_id = ?1")
                .map_err(StoreError::from_sqlite)?;
            let rows = statement
                .query_map(params![user_id.as_str()], |row| rows::group_from_row(row))
                .map_err(StoreError::from_sqlite)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from_sqlite)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    /// Inserts a new catalog entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the name is already taken.
    pub async fn create_catalog_entry(&self, entry: CatalogEntry) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute(
                    "INSERT INTO mcp_catalog (
                        id, name, transport, config, isolation, requires_user_credentials,
                        credential_schema, auth_type, oauth_config, publication_status, validated
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        entry.id.as_str(),
                        entry.name,
                        rows::transport_kind_text(entry.transport),
                        entry.config.to_string(),
                        rows::isolation_mode_text(entry.isolation),
                        i64::from(entry.requires_user_credentials),
                        entry.credential_schema.as_ref().map(ToString::to_string),
                        rows::auth_type_text(entry.auth_type),
                        entry.oauth_config.as_ref().map(ToString::to_string),
                        rows::publication_status_text(entry.publication_status),
                        i64::from(entry.validated),
                    ],
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Looks up a catalog entry by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_catalog_entry(&self, id: CatalogEntryId) -> Result<Option<CatalogEntry>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row("SELECT * FROM mcp_catalog WHERE id = ?1", params![id.as_str()], |row| rows::catalog_entry_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Looks up a catalog entry by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_catalog_entry_by_name(&self, name: String) -> Result<Option<CatalogEntry>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row("SELECT * FROM mcp_catalog WHERE name = ?1", params![name], |row| rows::catalog_entry_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Lists every published catalog entry, the set a browsing client may
    /// discover regardless of group access (group access further narrows
    /// which entries a given user may actually subscribe to).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn list_published_catalog_entries(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        self.blocking(move |connection| {
            let mut statement = connection
                .prepare("SELECT * FROM mcp_catalog WHERE publication_status = ?1 ORDER BY name")
                .map_err(StoreError::from_sqlite)?;
            let rows = statement
                .query_map(params![rows::publication_status_text(PublicationStatus::Published)], |row| {
                    rows::catalog_entry_from_row(row)
                })
                .map_err(StoreError::from_sqlite)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Grants one of `group_ids` visibility into `catalog_entry_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails.
    pub async fn grant_group_access(&self, catalog_entry_id: CatalogEntryId, group_id: GroupId) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute(
                    "INSERT OR IGNORE INTO mcp_group_access (catalog_entry_id, group_id) VALUES (?1, ?2)",
                    params![catalog_entry_id.as_str(), group_id.as_str()],
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Lists published catalog entries visible to any of `group_ids`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn list_catalog_entries_for_groups(&self, group_ids: Vec<GroupId>) -> Result<Vec<CatalogEntry>, StoreError> {
        self.blocking(move |connection| {
            if group_ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = group_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let sql = format!(
                "SELECT DISTINCT c.* FROM mcp_catalog c
                 JOIN mcp_group_access a ON a.catalog_entry_id = c.id
                 WHERE c.publication_status = ? AND a.group_id IN ({placeholders})
                 ORDER BY c.name"
            );
            let mut statement = connection.prepare(&sql).map_err(StoreError::from_sqlite)?;
            let status_text = rows::publication_status_text(PublicationStatus::Published);
            let ids: Vec<String> = group_ids.iter().map(|id| id.as_str().to_string()).collect();
            let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&status_text];
            for id in &ids {
                bound.push(id);
            }
            let rows = statement.query_map(bound.as_slice(), |row| rows::catalog_entry_from_row(row)).map_err(StoreError::from_sqlite)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from_sqlite)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Inserts a new client-to-catalog subscription.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails.
    pub async fn create_subscription(&self, subscription: Subscription) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            #[allow(clippy::expect_used, reason = "a Vec<String> always serializes")]
            let tool_names = serde_json::to_string(&subscription.tool_names).expect("serializes tool names");
            connection
                .execute(
                    "INSERT INTO client_mcp_subscriptions (id, client_id, catalog_entry_id, tool_names, status)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        subscription.id.as_str(),
                        subscription.client_id.as_str(),
                        subscription.catalog_entry_id.as_str(),
                        tool_names,
                        rows::subscription_status_text(subscription.status),
                    ],
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Lists every subscription registered for a client.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn list_subscriptions_for_client(&self, client_id: ClientId) -> Result<Vec<Subscription>, StoreError> {
        self.blocking(move |connection| {
            let mut statement = connection
                .prepare("SELECT * FROM client_mcp_subscriptions WHERE client_id = ?1")
                .map_err(StoreError::from_sqlite)?;
            let rows = statement
                .query_map(params![client_id.as_str()], |row| rows::subscription_from_row(row))
                .map_err(StoreError::from_sqlite)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from_sqlite)
        })
        .await
    }

    // ------------------------------------------------------------------
    // User Credentials
    // ------------------------------------------------------------------

    /// Inserts or replaces the credential for a (user, catalog entry) pair.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    pub async fn upsert_user_credential(&self, credential: UserCredential) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute(
                    "INSERT INTO user_mcp_credentials (
                        id, user_id, catalog_entry_id, ciphertext, iv, credential_type, expires_at, oauth_status
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT (user_id, catalog_entry_id) DO UPDATE SET
                        ciphertext = excluded.ciphertext,
                        iv = excluded.iv,
                        credential_type = excluded.credential_type,
                        expires_at = excluded.expires_at,
                        oauth_status = excluded.oauth_status",
                    params![
                        credential.id.as_str(),
                        credential.user_id.as_str(),
                        credential.catalog_entry_id.as_str(),
                        credential.ciphertext,
                        credential.iv.to_vec(),
                        rows::credential_type_text(credential.credential_type),
                        credential.expires_at.map(rows::encode_timestamp),
                        rows::encode_oauth_status_column(credential.oauth_status),
                    ],
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Looks up a user's credential for a catalog entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_user_credential(
        &self,
        user_id: UserId,
        catalog_entry_id: CatalogEntryId,
    ) -> Result<Option<UserCredential>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row(
                    "SELECT * FROM user_mcp_credentials WHERE user_id = ?1 AND catalog_entry_id = ?2",
                    params![user_id.as_str(), catalog_entry_id.as_str()],
                    |row| rows::user_credential_from_row(row),
                )
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Deletes a user's credential for a catalog entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn delete_user_credential(&self, id: CredentialId) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute("DELETE FROM user_mcp_credentials WHERE id = ?1", params![id.as_str()])
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // OAuth State
    // ------------------------------------------------------------------

    /// Inserts a single-use OAuth authorization-code exchange state row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails.
    pub async fn create_oauth_state(&self, row: ambassador_core::OAuthStateRow) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute(
                    "INSERT INTO oauth_states (state, user_id, catalog_entry_id, code_verifier, redirect_uri, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        row.state,
                        row.user_id.as_str(),
                        row.catalog_entry_id.as_str(),
                        row.code_verifier,
                        row.redirect_uri,
                        rows::encode_timestamp(row.created_at),
                        rows::encode_timestamp(row.expires_at),
                    ],
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Reads a pending OAuth state row without consuming it, so a caller
    /// can resolve which catalog entry a flow belongs to before it commits
    /// to the exchange that consumes the row exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_oauth_state(&self, state: String) -> Result<Option<ambassador_core::OAuthStateRow>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row("SELECT * FROM oauth_states WHERE state = ?1", params![state], |row| rows::oauth_state_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Atomically reads and deletes an OAuth state row, so a code exchange
    /// can consume it exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying transaction fails.
    pub async fn consume_oauth_state(&self, state: String) -> Result<Option<ambassador_core::OAuthStateRow>, StoreError> {
        self.blocking(move |connection| {
            let row = connection
                .query_row("SELECT * FROM oauth_states WHERE state = ?1", params![state], |row| rows::oauth_state_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)?;
            if row.is_some() {
                connection.execute("DELETE FROM oauth_states WHERE state = ?1", params![state]).map_err(StoreError::from_sqlite)?;
            }
            Ok(row)
        })
        .await
    }

    /// Deletes every OAuth state row that expired before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn cleanup_expired_oauth_states(&self, now: Timestamp) -> Result<u64, StoreError> {
        self.blocking(move |connection| {
            let changed = connection
                .execute("DELETE FROM oauth_states WHERE expires_at < ?1", params![rows::encode_timestamp(now)])
                .map_err(StoreError::from_sqlite)?;
            Ok(u64::try_from(changed).unwrap_or(0))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Admin Key
    // ------------------------------------------------------------------

    /// Reads the single active admin-key row, if one has been provisioned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying query fails.
    pub async fn get_admin_key(&self) -> Result<Option<AdminKey>, StoreError> {
        self.blocking(move |connection| {
            connection
                .query_row("SELECT * FROM admin_keys WHERE id = 1", params![], |row| rows::admin_key_from_row(row))
                .optional()
                .map_err(StoreError::from_sqlite)
        })
        .await
    }

    /// Replaces the admin key and recovery token, e.g. on rotation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    pub async fn set_admin_key(&self, key: AdminKey) -> Result<(), StoreError> {
        self.blocking(move |connection| {
            connection
                .execute(
                    "INSERT INTO admin_keys (id, admin_key_hash, recovery_token_hash, rotated_at) VALUES (1, ?1, ?2, ?3)
                     ON CONFLICT (id) DO UPDATE SET
                        admin_key_hash = excluded.admin_key_hash,
                        recovery_token_hash = excluded.recovery_token_hash,
                        rotated_at = excluded.rotated_at",
                    params![key.admin_key_hash, key.recovery_token_hash, rows::encode_timestamp(key.rotated_at)],
                )
                .map_err(StoreError::from_sqlite)?;
            Ok(())
        })
        .await
    }
}

// ============================================================================
// SECTION: Client & Profile Lookup
// ============================================================================

#[async_trait]
impl ClientLookup for Store {
    async fn find_by_key_prefix(&self, prefix: &str) -> Result<Option<Client>, ClientLookupError> {
        self.get_client_by_key_prefix(prefix.to_string())
            .await
            .map_err(|error| ClientLookupError::Store(error.to_string()))
    }
}

#[async_trait]
impl ProfileLookup for Store {
    async fn find_profile(&self, id: &ToolProfileId) -> Result<Option<ToolProfile>, ProfileLookupError> {
        self.get_tool_profile(id.clone()).await.map_err(|error| ProfileLookupError::Store(error.to_string()))
    }
}

// ============================================================================
// SECTION: Store Audit Sink
// ============================================================================

/// An [`AuditSink`] that durably records events into the `audit_events`
/// table instead of (or alongside) a file sink, for deployments that want
/// the audit trail queryable through the same database as everything else.
pub struct StoreAuditSink {
    /// Backing store the sink writes rows into.
    store: Store,
}

impl StoreAuditSink {
    /// Wraps `store` as an audit sink.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for StoreAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let id = AuditEventId::generate();
        self.store
            .blocking(move |connection| {
                connection
                    .execute(
                        "INSERT INTO audit_events (id, timestamp, user_id, client_id, event_type, detail, outcome)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            id.as_str(),
                            rows::encode_timestamp(event.timestamp),
                            event.user_id.as_ref().map(UserId::as_str),
                            event.client_id.as_ref().map(ClientId::as_str),
                            event.event_type,
                            event.detail.to_string(),
                            event.outcome,
                        ],
                    )
                    .map_err(StoreError::from_sqlite)?;
                Ok(())
            })
            .await
            .map_err(|error| AuditError::Sink(error.to_string()))
    }

    async fn flush(&self) -> Result<(), AuditError> {
        // Every `record` call already commits its insert before returning.
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;
    use ambassador_core::GlobPattern;
    use ambassador_core::RateLimit;
    use ambassador_core::UserId;

    fn sample_user() -> User {
        let now = Timestamp::now();
        User {
            id: UserId::generate(),
            username: "alice".to_string(),
            is_admin: false,
            status: UserStatus::Active,
            vault_salt: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn round_trips_a_user() {
        let store = Store::open_in_memory().expect("opens");
        let user = sample_user();
        store.create_user(user.clone()).await.expect("inserts");

        let fetched = store.get_user(user.id.clone()).await.expect("queries").expect("present");
        assert_eq!(fetched.username, "alice");
        assert_eq!(fetched.status, UserStatus::Active);
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let store = Store::open_in_memory().expect("opens");
        let user = sample_user();
        store.create_user(user.clone()).await.expect("inserts");

        let mut duplicate = sample_user();
        duplicate.username = user.username;
        let result = store.create_user(duplicate).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn updates_user_status() {
        let store = Store::open_in_memory().expect("opens");
        let user = sample_user();
        store.create_user(user.clone()).await.expect("inserts");

        store.update_user_status(user.id.clone(), UserStatus::Suspended).await.expect("updates");
        let fetched = store.get_user(user.id).await.expect("queries").expect("present");
        assert_eq!(fetched.status, UserStatus::Suspended);
    }

    #[tokio::test]
    async fn client_lookup_by_key_prefix_round_trips() {
        let store = Store::open_in_memory().expect("opens");
        let user = sample_user();
        store.create_user(user.clone()).await.expect("inserts");

        let client = Client {
            id: ClientId::generate(),
            user_id: user.id,
            key_prefix: "abcdefgh".to_string(),
            secret_hash: "hash".to_string(),
            profile_id: None,
            status: ClientStatus::Active,
            expires_at: None,
            metadata: serde_json::Value::Null,
            created_at: Timestamp::now(),
        };
        store.create_client(client.clone()).await.expect("inserts");

        let found = ClientLookup::find_by_key_prefix(&store, "abcdefgh").await.expect("looks up").expect("present");
        assert_eq!(found.id, client.id);
    }

    #[tokio::test]
    async fn tool_profile_lookup_round_trips_patterns() {
        let store = Store::open_in_memory().expect("opens");
        let profile = ToolProfile {
            id: ToolProfileId::generate(),
            name: "default".to_string(),
            allow: vec![GlobPattern::parse("github.*".to_string()).expect("valid pattern")],
            deny: vec![],
            rate_limit: RateLimit::default(),
            parent_id: None,
        };
        store.create_tool_profile(profile.clone()).await.expect("inserts");

        let found = ProfileLookup::find_profile(&store, &profile.id).await.expect("looks up").expect("present");
        assert_eq!(found.allow.len(), 1);
    }

    #[tokio::test]
    async fn session_token_replacement_rotates_without_a_new_row() {
        let store = Store::open_in_memory().expect("opens");
        let user = sample_user();
        store.create_user(user.clone()).await.expect("inserts");
        let client = Client {
            id: ClientId::generate(),
            user_id: user.id.clone(),
            key_prefix: "abcdefgh".to_string(),
            secret_hash: "hash".to_string(),
            profile_id: None,
            status: ClientStatus::Active,
            expires_at: None,
            metadata: serde_json::Value::Null,
            created_at: Timestamp::now(),
        };
        store.create_client(client.clone()).await.expect("inserts");

        let now = Timestamp::now();
        let session = Session {
            id: SessionId::generate(),
            user_id: user.id,
            client_id: client.id.clone(),
            token_hash: "old-hash".to_string(),
            token_nonce: "old-nonce".to_string(),
            status: SessionStatus::Active,
            profile_id: None,
            created_at: now,
            last_activity_at: now,
            expires_at: now + std::time::Duration::from_secs(86_400),
            idle_timeout_seconds: 300,
            spindown_delay_seconds: 60,
        };
        store.create_session(session.clone()).await.expect("inserts");

        let new_expiry = now + std::time::Duration::from_secs(172_800);
        store
            .replace_session_token(session.id.clone(), "new-hash".to_string(), "new-nonce".to_string(), new_expiry)
            .await
            .expect("rotates");

        let fetched = store.get_session(session.id).await.expect("queries").expect("present");
        assert_eq!(fetched.token_hash, "new-hash");
        assert_eq!(fetched.token_nonce, "new-nonce");

        let by_client = store.get_session_by_client(client.id).await.expect("queries").expect("present");
        assert_eq!(by_client.token_hash, "new-hash");
    }

    #[tokio::test]
    async fn oauth_state_is_consumed_exactly_once() {
        let store = Store::open_in_memory().expect("opens");
        let user = sample_user();
        store.create_user(user.clone()).await.expect("inserts");
        let entry = CatalogEntry {
            id: CatalogEntryId::generate(),
            name: "github".to_string(),
            transport: ambassador_core::TransportKind::Http,
            config: serde_json::json!({}),
            isolation: ambassador_core::IsolationMode::Shared,
            requires_user_credentials: true,
            credential_schema: None,
            auth_type: ambassador_core::AuthType::OAuth2,
            oauth_config: None,
            publication_status: PublicationStatus::Published,
            validated: true,
        };
        store.create_catalog_entry(entry.clone()).await.expect("inserts");

        let now = Timestamp::now();
        let row = ambassador_core::OAuthStateRow {
            state: "state-123".to_string(),
            user_id: user.id,
            catalog_entry_id: entry.id,
            code_verifier: "verifier".to_string(),
            redirect_uri: "https://example.test/callback".to_string(),
            created_at: now,
            expires_at: now + std::time::Duration::from_secs(600),
        };
        store.create_oauth_state(row).await.expect("inserts");

        let first = store.consume_oauth_state("state-123".to_string()).await.expect("consumes");
        assert!(first.is_some());
        let second = store.consume_oauth_state("state-123".to_string()).await.expect("consumes");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn audit_sink_records_into_audit_events_table() {
        let store = Store::open_in_memory().expect("opens");
        let sink = StoreAuditSink::new(store.clone());
        sink.record(AuditEvent {
            timestamp: Timestamp::now(),
            user_id: None,
            client_id: None,
            event_type: "authn_failure".to_string(),
            detail: serde_json::json!({"reason": "unknown_prefix"}),
            outcome: "denied".to_string(),
        })
        .await
        .expect("records");

        let count: i64 = store
            .blocking(|connection| {
                connection.query_row("SELECT COUNT(*) FROM audit_events", params![], |row| row.get(0)).map_err(StoreError::from_sqlite)
            })
            .await
            .expect("queries");
        assert_eq!(count, 1);
    }
}
