// ambassador-core/src/core/model.rs
// ============================================================================
// Module: Ambassador Data Model
// Description: Entity structs for the core domain (spec.md §3).
// Purpose: Provide the in-memory domain representation shared by every crate;
//          persistence mapping lives entirely in ambassador-store-sqlite.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! These structs are semantic types, not storage types (spec.md §3): they
//! carry no SQL-specific representation. `ambassador-store-sqlite` owns the
//! mapping between these types and its row structs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::glob::GlobPattern;
use crate::core::identifiers::CatalogEntryId;
use crate::core::identifiers::ClientId;
use crate::core::identifiers::ConnectionId;
use crate::core::identifiers::CredentialId;
use crate::core::identifiers::GroupId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::SubscriptionId;
use crate::core::identifiers::ToolProfileId;
use crate::core::identifiers::UserId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: User
// ============================================================================

/// Lifecycle status of a [`User`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// User may authenticate and operate normally.
    Active,
    /// User is temporarily blocked; existing sessions are torn down.
    Suspended,
    /// User is permanently disabled.
    Deactivated,
}

/// A registered principal that owns clients and sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable identifier.
    pub id: UserId,
    /// Unique username.
    pub username: String,
    /// Whether the user holds administrative privileges.
    pub is_admin: bool,
    /// Lifecycle status.
    pub status: UserStatus,
    /// Per-user vault salt (32 random bytes), once provisioned.
    pub vault_salt: Option<[u8; 32]>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last modification timestamp.
    pub updated_at: Timestamp,
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Lifecycle status of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    /// Client may authenticate.
    Active,
    /// Client is temporarily blocked.
    Suspended,
    /// Client credential has been permanently revoked.
    Revoked,
}

/// A preshared-key client credential bound to exactly one user (I-1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Stable identifier.
    pub id: ClientId,
    /// Owning user (cascades on suspend/revoke, I-1).
    pub user_id: UserId,
    /// Non-secret key prefix used for indexed lookup (spec.md §4.6).
    pub key_prefix: String,
    /// Password-hashed remainder of the preshared key.
    pub secret_hash: String,
    /// Tool profile applied to this client's invocations.
    pub profile_id: Option<ToolProfileId>,
    /// Lifecycle status.
    pub status: ClientStatus,
    /// Optional hard expiry.
    pub expires_at: Option<Timestamp>,
    /// Free-form metadata (display name, notes, etc).
    pub metadata: serde_json::Value,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

impl Client {
    /// Returns true when the client may currently authenticate.
    #[must_use]
    pub fn is_usable(&self, now: Timestamp) -> bool {
        if self.status != ClientStatus::Active {
            return false;
        }
        match self.expires_at {
            Some(expiry) => !expiry.is_before(now) || expiry == now,
            None => true,
        }
    }
}

// ============================================================================
// SECTION: Tool Profile
// ============================================================================

/// Per-minute / per-hour / concurrency rate-limit triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum invocations per minute.
    pub per_minute: Option<u32>,
    /// Maximum invocations per hour.
    pub per_hour: Option<u32>,
    /// Maximum concurrent invocations.
    pub max_concurrent: Option<u32>,
}

/// An allow/deny ruleset with optional inheritance from a parent profile
/// (I-2: inheritance forms a DAG, resolution depth bounded at 5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProfile {
    /// Stable identifier.
    pub id: ToolProfileId,
    /// Unique profile name.
    pub name: String,
    /// Ordered allow-glob patterns.
    pub allow: Vec<GlobPattern>,
    /// Ordered deny-glob patterns.
    pub deny: Vec<GlobPattern>,
    /// Rate limits applied to clients carrying this profile.
    pub rate_limit: RateLimit,
    /// Optional parent profile for inheritance.
    pub parent_id: Option<ToolProfileId>,
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Session lifecycle status (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session has at least one recently active connection.
    Active,
    /// Session has no recently active connections but hasn't spun down.
    Idle,
    /// Session is tearing down its per-user tool servers.
    SpinningDown,
    /// Per-user tool servers are torn down; session may be resumed.
    Suspended,
    /// Session has passed its hard expiry and will be swept.
    Expired,
}

/// A registered host-agent session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Stable identifier.
    pub id: SessionId,
    /// Owning user.
    pub user_id: UserId,
    /// Client credential that registered this session (spec.md §4.7 step 1
    /// re-checks this client's status on every invocation).
    pub client_id: ClientId,
    /// Password-hashed session token.
    pub token_hash: String,
    /// Random nonce mixed into the token hash, rotated on re-registration.
    pub token_nonce: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Tool profile effective for this session's client.
    pub profile_id: Option<ToolProfileId>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last recorded activity across any connection.
    pub last_activity_at: Timestamp,
    /// Hard expiry (creation + 24h per spec.md §4.3).
    pub expires_at: Timestamp,
    /// Seconds of connection silence before the session goes idle.
    pub idle_timeout_seconds: u64,
    /// Seconds idle before spin-down begins.
    pub spindown_delay_seconds: u64,
}

// ============================================================================
// SECTION: Connection
// ============================================================================

/// Connection liveness status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Connection has sent a heartbeat within its session's idle timeout.
    Connected,
    /// Connection has gone silent or was explicitly closed.
    Disconnected,
}

/// A single physical connection belonging to a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Stable identifier.
    pub id: ConnectionId,
    /// Owning session.
    pub session_id: SessionId,
    /// Operator-facing host name.
    pub friendly_name: String,
    /// Most recent heartbeat timestamp.
    pub last_heartbeat_at: Timestamp,
    /// Liveness status.
    pub status: ConnectionStatus,
}

// ============================================================================
// SECTION: Tool Server Catalog Entry
// ============================================================================

/// Transport kind used to reach a downstream tool server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Child process communicating over stdio.
    Stdio,
    /// Plain HTTP.
    Http,
    /// HTTP with server-sent events.
    Sse,
}

/// Process isolation mode for a catalog entry (spec.md Glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// One instance process-wide, shared by every user.
    Shared,
    /// One instance per user.
    PerUser,
}

/// Authentication mode a downstream tool server requires from the Ambassador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// No credentials required.
    None,
    /// A static credential supplied once.
    Static,
    /// An OAuth2 access/refresh token pair.
    OAuth2,
}

/// Publication lifecycle of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationStatus {
    /// Entry is being authored and is not yet routable.
    Draft,
    /// Entry is live and routable.
    Published,
    /// Entry has been retired.
    Archived,
}

/// A downstream tool server registered with the Ambassador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stable identifier.
    pub id: CatalogEntryId,
    /// Unique catalog name.
    pub name: String,
    /// Transport used to reach the server.
    pub transport: TransportKind,
    /// Opaque, transport-specific configuration (command+args, URL, etc).
    pub config: serde_json::Value,
    /// Process isolation mode.
    pub isolation: IsolationMode,
    /// Whether invoking this server requires per-user credentials.
    pub requires_user_credentials: bool,
    /// JSON schema describing the credential shape, when required.
    pub credential_schema: Option<serde_json::Value>,
    /// Credential auth type.
    pub auth_type: AuthType,
    /// Opaque OAuth configuration, when `auth_type == OAuth2`.
    pub oauth_config: Option<serde_json::Value>,
    /// Publication status.
    pub publication_status: PublicationStatus,
    /// Whether the entry has passed validation since last edit.
    pub validated: bool,
}

// ============================================================================
// SECTION: Group & Access
// ============================================================================

/// Name of the distinguished group that implicitly contains every user.
pub const ALL_USERS_GROUP: &str = "all-users";

/// A named collection of users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Stable identifier.
    pub id: GroupId,
    /// Unique group name.
    pub name: String,
}

// ============================================================================
// SECTION: Subscription
// ============================================================================

/// Lifecycle status of a client-to-catalog subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Subscription is active and its tools are routable for the client.
    Active,
    /// Subscription has been paused or withdrawn.
    Inactive,
}

/// Binds a client to a subset of a catalog entry's tool names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Stable identifier.
    pub id: SubscriptionId,
    /// Subscribing client.
    pub client_id: ClientId,
    /// Subscribed catalog entry.
    pub catalog_entry_id: CatalogEntryId,
    /// Selected subset of tool names (empty means "all tools").
    pub tool_names: Vec<String>,
    /// Lifecycle status.
    pub status: SubscriptionStatus,
}

// ============================================================================
// SECTION: User MCP Credential
// ============================================================================

/// Which shape a stored credential takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    /// A static secret blob (API key, bearer token, etc).
    Static,
    /// An OAuth2 token set.
    OAuth2,
}

/// Status of an OAuth-backed credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthStatus {
    /// No OAuth flow has completed yet.
    NotConnected,
    /// A valid token set is stored.
    Success,
    /// The most recent flow failed.
    Error,
}

/// A per-(user, catalog entry) envelope-encrypted credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    /// Stable identifier.
    pub id: CredentialId,
    /// Owning user.
    pub user_id: UserId,
    /// Target catalog entry.
    pub catalog_entry_id: CatalogEntryId,
    /// AEAD ciphertext.
    pub ciphertext: Vec<u8>,
    /// Explicit 12-byte AEAD IV.
    pub iv: [u8; 12],
    /// Credential shape.
    pub credential_type: CredentialType,
    /// Optional expiry (OAuth access tokens).
    pub expires_at: Option<Timestamp>,
    /// OAuth connection status, when `credential_type == OAuth2`.
    pub oauth_status: Option<OAuthStatus>,
}

// ============================================================================
// SECTION: OAuth State Row
// ============================================================================

/// A single-use, time-boxed OAuth authorization-code exchange in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthStateRow {
    /// Opaque state value (also the primary key).
    pub state: String,
    /// User who initiated the flow.
    pub user_id: UserId,
    /// Target catalog entry.
    pub catalog_entry_id: CatalogEntryId,
    /// PKCE code verifier for the exchange.
    pub code_verifier: String,
    /// Redirect URI registered for this flow.
    pub redirect_uri: String,
    /// Row creation time.
    pub created_at: Timestamp,
    /// Expiry, fixed at 10 minutes after `created_at` (spec.md §4.10).
    pub expires_at: Timestamp,
}

// ============================================================================
// SECTION: Admin Key
// ============================================================================

/// The single active admin-key row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminKey {
    /// Password-hash of the current admin key.
    pub admin_key_hash: String,
    /// Password-hash of the current recovery token.
    pub recovery_token_hash: String,
    /// Last rotation timestamp.
    pub rotated_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_with_no_expiry_is_usable_while_active() {
        let client = Client {
            id: ClientId::generate(),
            user_id: UserId::generate(),
            key_prefix: "pfx".to_string(),
            secret_hash: "hash".to_string(),
            profile_id: None,
            status: ClientStatus::Active,
            expires_at: None,
            metadata: serde_json::Value::Null,
            created_at: Timestamp::now(),
        };
        assert!(client.is_usable(Timestamp::now()));
    }

    #[test]
    fn suspended_client_is_never_usable() {
        let mut client = Client {
            id: ClientId::generate(),
            user_id: UserId::generate(),
            key_prefix: "pfx".to_string(),
            secret_hash: "hash".to_string(),
            profile_id: None,
            status: ClientStatus::Suspended,
            expires_at: None,
            metadata: serde_json::Value::Null,
            created_at: Timestamp::now(),
        };
        assert!(!client.is_usable(Timestamp::now()));
        client.status = ClientStatus::Revoked;
        assert!(!client.is_usable(Timestamp::now()));
    }

    #[test]
    fn expired_client_is_not_usable() {
        let now = Timestamp::now();
        let client = Client {
            id: ClientId::generate(),
            user_id: UserId::generate(),
            key_prefix: "pfx".to_string(),
            secret_hash: "hash".to_string(),
            profile_id: None,
            status: ClientStatus::Active,
            expires_at: Some(now),
            metadata: serde_json::Value::Null,
            created_at: now,
        };
        let later = now + std::time::Duration::from_secs(1);
        assert!(!client.is_usable(later));
    }
}
