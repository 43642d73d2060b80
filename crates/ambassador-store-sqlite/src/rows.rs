// ambassador-store-sqlite/src/rows.rs
// ============================================================================
// Module: Row Mapping
// Description: Conversions between ambassador-core domain types and their
//              TEXT/BLOB-encoded SQLite row representations.
// Purpose: Keep every storage-specific encoding decision (RFC 3339 timestamp
//          strings, snake_case enum strings, JSON-encoded collections)
//          confined to this crate (spec.md §3).
// Dependencies: ambassador-core, rusqlite, serde_json, time
// ============================================================================

//! ## Overview
//! `ambassador-core`'s domain structs are semantic types with no storage
//! representation of their own. This module owns the encode/decode boundary:
//! every `*_to_row` / `*_from_row` pair below is the single place a column
//! layout or encoding choice is made.

// ============================================================================
// SECTION: Imports
// ============================================================================

use ambassador_core::AdminKey;
use ambassador_core::AuthType;
use ambassador_core::CatalogEntry;
use ambassador_core::CatalogEntryId;
use ambassador_core::Client;
use ambassador_core::ClientId;
use ambassador_core::ClientStatus;
use ambassador_core::Connection as DomainConnection;
use ambassador_core::ConnectionId;
use ambassador_core::ConnectionStatus;
use ambassador_core::CredentialId;
use ambassador_core::CredentialType;
use ambassador_core::GlobPattern;
use ambassador_core::Group;
use ambassador_core::GroupId;
use ambassador_core::IsolationMode;
use ambassador_core::OAuthStateRow;
use ambassador_core::OAuthStatus;
use ambassador_core::PublicationStatus;
use ambassador_core::RateLimit;
use ambassador_core::Session;
use ambassador_core::SessionId;
use ambassador_core::SessionStatus;
use ambassador_core::Subscription;
use ambassador_core::SubscriptionId;
use ambassador_core::SubscriptionStatus;
use ambassador_core::Timestamp;
use ambassador_core::ToolProfile;
use ambassador_core::ToolProfileId;
use ambassador_core::TransportKind;
use ambassador_core::User;
use ambassador_core::UserCredential;
use ambassador_core::UserId;
use ambassador_core::UserStatus;
use rusqlite::Row;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::StoreError;

// ============================================================================
// SECTION: Timestamp Encoding
// ============================================================================

pub(crate) fn encode_timestamp(value: Timestamp) -> String {
    #[allow(clippy::expect_used, reason = "OffsetDateTime always formats as RFC 3339")]
    value.as_offset_date_time().format(&Rfc3339).expect("valid RFC 3339 timestamp")
}

pub(crate) fn decode_timestamp(text: &str) -> Result<Timestamp, StoreError> {
    OffsetDateTime::parse(text, &Rfc3339)
        .map(Timestamp::from_offset_date_time)
        .map_err(|error| StoreError::Corrupt(format!("invalid timestamp {text:?}: {error}")))
}

pub(crate) fn encode_optional_timestamp(value: Option<Timestamp>) -> Option<String> {
    value.map(encode_timestamp)
}

pub(crate) fn decode_optional_timestamp(text: Option<String>) -> Result<Option<Timestamp>, StoreError> {
    text.map(|text| decode_timestamp(&text)).transpose()
}

// ============================================================================
// SECTION: Enum Encoding
// ============================================================================

macro_rules! string_enum_codec {
    ($ty:ty, $encode:ident, $decode:ident, { $($variant:ident => $text:literal),+ $(,)? }) => {
        pub(crate) const fn $encode(value: $ty) -> &'static str {
            match value {
                $(<$ty>::$variant => $text,)+
            }
        }

        pub(crate) fn $decode(text: &str) -> Result<$ty, StoreError> {
            match text {
                $($text => Ok(<$ty>::$variant),)+
                other => Err(StoreError::Corrupt(format!(
                    concat!("unrecognized ", stringify!($ty), " value: {}"),
                    other
                ))),
            }
        }
    };
}

string_enum_codec!(UserStatus, encode_user_status, decode_user_status, {
    Active => "active",
    Suspended => "suspended",
    Deactivated => "deactivated",
});

string_enum_codec!(ClientStatus, encode_client_status, decode_client_status, {
    Active => "active",
    Suspended => "suspended",
    Revoked => "revoked",
});

string_enum_codec!(SessionStatus, encode_session_status, decode_session_status, {
    Active => "active",
    Idle => "idle",
    SpinningDown => "spinning_down",
    Suspended => "suspended",
    Expired => "expired",
});

string_enum_codec!(ConnectionStatus, encode_connection_status, decode_connection_status, {
    Connected => "connected",
    Disconnected => "disconnected",
});

string_enum_codec!(TransportKind, encode_transport_kind, decode_transport_kind, {
    Stdio => "stdio",
    Http => "http",
    Sse => "sse",
});

string_enum_codec!(IsolationMode, encode_isolation_mode, decode_isolation_mode, {
    Shared => "shared",
    PerUser => "per_user",
});

string_enum_codec!(AuthType, encode_auth_type, decode_auth_type, {
    None => "none",
    Static => "static",
    OAuth2 => "oauth2",
});

string_enum_codec!(PublicationStatus, encode_publication_status, decode_publication_status, {
    Draft => "draft",
    Published => "published",
    Archived => "archived",
});

string_enum_codec!(SubscriptionStatus, encode_subscription_status, decode_subscription_status, {
    Active => "active",
    Inactive => "inactive",
});

string_enum_codec!(CredentialType, encode_credential_type, decode_credential_type, {
    Static => "static",
    OAuth2 => "oauth2",
});

string_enum_codec!(OAuthStatus, encode_oauth_status, decode_oauth_status, {
    NotConnected => "not_connected",
    Success => "success",
    Error => "error",
});

fn encode_optional_oauth_status(value: Option<OAuthStatus>) -> Option<&'static str> {
    value.map(encode_oauth_status)
}

fn decode_optional_oauth_status(text: Option<String>) -> Result<Option<OAuthStatus>, StoreError> {
    text.map(|text| decode_oauth_status(&text)).transpose()
}

// ============================================================================
// SECTION: User
// ============================================================================

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get("id")?;
    let username: String = row.get("username")?;
    let is_admin: i64 = row.get("is_admin")?;
    let status: String = row.get("status")?;
    let vault_salt: Option<Vec<u8>> = row.get("vault_salt")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(User {
        id: UserId::new(id),
        username,
        is_admin: is_admin != 0,
        status: decode_user_status(&status).unwrap_or(UserStatus::Suspended),
        vault_salt: vault_salt.and_then(|bytes| <[u8; 32]>::try_from(bytes).ok()),
        created_at: decode_timestamp(&created_at).unwrap_or_else(|_| Timestamp::now()),
        updated_at: decode_timestamp(&updated_at).unwrap_or_else(|_| Timestamp::now()),
    })
}

// ============================================================================
// SECTION: Client
// ============================================================================

pub(crate) fn client_from_row(row: &Row<'_>) -> rusqlite::Result<Client> {
    let id: String = row.get("id")?;
    let user_id: String = row.get("user_id")?;
    let key_prefix: String = row.get("key_prefix")?;
    let secret_hash: String = row.get("secret_hash")?;
    let profile_id: Option<String> = row.get("profile_id")?;
    let status: String = row.get("status")?;
    let expires_at: Option<String> = row.get("expires_at")?;
    let metadata: String = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;

    Ok(Client {
        id: ClientId::new(id),
        user_id: UserId::new(user_id),
        key_prefix,
        secret_hash,
        profile_id: profile_id.map(ToolProfileId::new),
        status: decode_client_status(&status).unwrap_or(ClientStatus::Revoked),
        expires_at: decode_optional_timestamp(expires_at).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: decode_timestamp(&created_at).unwrap_or_else(|_| Timestamp::now()),
    })
}

// ============================================================================
// SECTION: Tool Profile
// ============================================================================

pub(crate) fn encode_pattern_list(patterns: &[GlobPattern]) -> String {
    let raw: Vec<&str> = patterns.iter().map(GlobPattern::as_str).collect();
    #[allow(clippy::expect_used, reason = "a Vec<&str> always serializes")]
    serde_json::to_string(&raw).expect("serializes pattern list")
}

fn decode_pattern_list(text: &str) -> Vec<GlobPattern> {
    serde_json::from_str::<Vec<String>>(text)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|raw| GlobPattern::parse(raw).ok())
        .collect()
}

pub(crate) fn tool_profile_from_row(row: &Row<'_>) -> rusqlite::Result<ToolProfile> {
    let id: String = row.get("id")?;
    let name: String = row.get("name")?;
    let allow: String = row.get("allow")?;
    let deny: String = row.get("deny")?;
    let rate_limit: String = row.get("rate_limit")?;
    let parent_id: Option<String> = row.get("parent_id")?;

    Ok(ToolProfile {
        id: ToolProfileId::new(id),
        name,
        allow: decode_pattern_list(&allow),
        deny: decode_pattern_list(&deny),
        rate_limit: serde_json::from_str::<RateLimit>(&rate_limit).unwrap_or_default(),
        parent_id: parent_id.map(ToolProfileId::new),
    })
}

pub(crate) fn encode_rate_limit(rate_limit: &RateLimit) -> String {
    #[allow(clippy::expect_used, reason = "RateLimit always serializes")]
    serde_json::to_string(rate_limit).expect("serializes rate limit")
}

// ============================================================================
// SECTION: Session
// ============================================================================

pub(crate) fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let id: String = row.get("id")?;
    let user_id: String = row.get("user_id")?;
    let client_id: String = row.get("client_id")?;
    let token_hash: String = row.get("token_hash")?;
    let token_nonce: String = row.get("token_nonce")?;
    let status: String = row.get("status")?;
    let profile_id: Option<String> = row.get("profile_id")?;
    let created_at: String = row.get("created_at")?;
    let last_activity_at: String = row.get("last_activity_at")?;
    let expires_at: String = row.get("expires_at")?;
    let idle_timeout_seconds: i64 = row.get("idle_timeout_seconds")?;
    let spindown_delay_seconds: i64 = row.get("spindown_delay_seconds")?;

    Ok(Session {
        id: SessionId::new(id),
        user_id: UserId::new(user_id),
        client_id: ClientId::new(client_id),
        token_hash,
        token_nonce,
        status: decode_session_status(&status).unwrap_or(SessionStatus::Expired),
        profile_id: profile_id.map(ToolProfileId::new),
        created_at: decode_timestamp(&created_at).unwrap_or_else(|_| Timestamp::now()),
        last_activity_at: decode_timestamp(&last_activity_at).unwrap_or_else(|_| Timestamp::now()),
        expires_at: decode_timestamp(&expires_at).unwrap_or_else(|_| Timestamp::now()),
        idle_timeout_seconds: u64::try_from(idle_timeout_seconds).unwrap_or_default(),
        spindown_delay_seconds: u64::try_from(spindown_delay_seconds).unwrap_or_default(),
    })
}

// ============================================================================
// SECTION: Connection
// ============================================================================

pub(crate) fn connection_from_row(row: &Row<'_>) -> rusqlite::Result<DomainConnection> {
    let id: String = row.get("id")?;
    let session_id: String = row.get("session_id")?;
    let friendly_name: String = row.get("friendly_name")?;
    let last_heartbeat_at: String = row.get("last_heartbeat_at")?;
    let status: String = row.get("status")?;

    Ok(DomainConnection {
        id: ConnectionId::new(id),
        session_id: SessionId::new(session_id),
        friendly_name,
        last_heartbeat_at: decode_timestamp(&last_heartbeat_at).unwrap_or_else(|_| Timestamp::now()),
        status: decode_connection_status(&status).unwrap_or(ConnectionStatus::Disconnected),
    })
}

// ============================================================================
// SECTION: Catalog Entry
// ============================================================================

pub(crate) fn catalog_entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let id: String = row.get("id")?;
    let name: String = row.get("name")?;
    let transport: String = row.get("transport")?;
    let config: String = row.get("config")?;
    let isolation: String = row.get("isolation")?;
    let requires_user_credentials: i64 = row.get("requires_user_credentials")?;
    let credential_schema: Option<String> = row.get("credential_schema")?;
    let auth_type: String = row.get("auth_type")?;
    let oauth_config: Option<String> = row.get("oauth_config")?;
    let publication_status: String = row.get("publication_status")?;
    let validated: i64 = row.get("validated")?;

    Ok(CatalogEntry {
        id: CatalogEntryId::new(id),
        name,
        transport: decode_transport_kind(&transport).unwrap_or(TransportKind::Stdio),
        config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
        isolation: decode_isolation_mode(&isolation).unwrap_or(IsolationMode::Shared),
        requires_user_credentials: requires_user_credentials != 0,
        credential_schema: credential_schema.and_then(|text| serde_json::from_str(&text).ok()),
        auth_type: decode_auth_type(&auth_type).unwrap_or(AuthType::None),
        oauth_config: oauth_config.and_then(|text| serde_json::from_str(&text).ok()),
        publication_status: decode_publication_status(&publication_status).unwrap_or(PublicationStatus::Draft),
        validated: validated != 0,
    })
}

// ============================================================================
// SECTION: Group
// ============================================================================

pub(crate) fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    let id: String = row.get("id")?;
    let name: String = row.get("name")?;
    Ok(Group { id: GroupId::new(id), name })
}

// ============================================================================
// SECTION: Subscription
// ============================================================================

pub(crate) fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let id: String = row.get("id")?;
    let client_id: String = row.get("client_id")?;
    let catalog_entry_id: String = row.get("catalog_entry_id")?;
    let tool_names: String = row.get("tool_names")?;
    let status: String = row.get("status")?;

    Ok(Subscription {
        id: SubscriptionId::new(id),
        client_id: ClientId::new(client_id),
        catalog_entry_id: CatalogEntryId::new(catalog_entry_id),
        tool_names: serde_json::from_str(&tool_names).unwrap_or_default(),
        status: decode_subscription_status(&status).unwrap_or(SubscriptionStatus::Inactive),
    })
}

// ============================================================================
// SECTION: User Credential
// ============================================================================

pub(crate) fn user_credential_from_row(row: &Row<'_>) -> rusqlite::Result<UserCredential> {
    let id: String = row.get("id")?;
    let user_id: String = row.get("user_id")?;
    let catalog_entry_id: String = row.get("catalog_entry_id")?;
    let ciphertext: Vec<u8> = row.get("ciphertext")?;
    let iv: Vec<u8> = row.get("iv")?;
    let credential_type: String = row.get("credential_type")?;
    let expires_at: Option<String> = row.get("expires_at")?;
    let oauth_status: Option<String> = row.get("oauth_status")?;

    Ok(UserCredential {
        id: CredentialId::new(id),
        user_id: UserId::new(user_id),
        catalog_entry_id: CatalogEntryId::new(catalog_entry_id),
        ciphertext,
        iv: <[u8; 12]>::try_from(iv.as_slice()).unwrap_or([0u8; 12]),
        credential_type: decode_credential_type(&credential_type).unwrap_or(CredentialType::Static),
        expires_at: decode_optional_timestamp(expires_at).unwrap_or_default(),
        oauth_status: decode_optional_oauth_status(oauth_status).unwrap_or_default(),
    })
}

pub(crate) fn encode_oauth_status_column(status: Option<OAuthStatus>) -> Option<&'static str> {
    encode_optional_oauth_status(status)
}

// ============================================================================
// SECTION: OAuth State
// ============================================================================

pub(crate) fn oauth_state_from_row(row: &Row<'_>) -> rusqlite::Result<OAuthStateRow> {
    let state: String = row.get("state")?;
    let user_id: String = row.get("user_id")?;
    let catalog_entry_id: String = row.get("catalog_entry_id")?;
    let code_verifier: String = row.get("code_verifier")?;
    let redirect_uri: String = row.get("redirect_uri")?;
    let created_at: String = row.get("created_at")?;
    let expires_at: String = row.get("expires_at")?;

    Ok(OAuthStateRow {
        state,
        user_id: UserId::new(user_id),
        catalog_entry_id: CatalogEntryId::new(catalog_entry_id),
        code_verifier,
        redirect_uri,
        created_at: decode_timestamp(&created_at).unwrap_or_else(|_| Timestamp::now()),
        expires_at: decode_timestamp(&expires_at).unwrap_or_else(|_| Timestamp::now()),
    })
}

// ============================================================================
// SECTION: Admin Key
// ============================================================================

pub(crate) fn admin_key_from_row(row: &Row<'_>) -> rusqlite::Result<AdminKey> {
    let admin_key_hash: String = row.get("admin_key_hash")?;
    let recovery_token_hash: String = row.get("recovery_token_hash")?;
    let rotated_at: String = row.get("rotated_at")?;

    Ok(AdminKey {
        admin_key_hash,
        recovery_token_hash,
        rotated_at: decode_timestamp(&rotated_at).unwrap_or_else(|_| Timestamp::now()),
    })
}

pub(crate) use encode_user_status as user_status_text;
pub(crate) use encode_client_status as client_status_text;
pub(crate) use encode_session_status as session_status_text;
pub(crate) use encode_connection_status as connection_status_text;
pub(crate) use encode_transport_kind as transport_kind_text;
pub(crate) use encode_isolation_mode as isolation_mode_text;
pub(crate) use encode_auth_type as auth_type_text;
pub(crate) use encode_publication_status as publication_status_text;
pub(crate) use encode_subscription_status as subscription_status_text;
pub(crate) use encode_credential_type as credential_type_text;
