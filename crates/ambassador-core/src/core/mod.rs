// ambassador-core/src/core/mod.rs
// ============================================================================
// Module: Ambassador Core Types
// Description: Canonical Ambassador data model, identifiers, and helpers.
// Purpose: Provide stable, serializable types shared by every Ambassador crate.
// Dependencies: serde, thiserror, time, ulid
// ============================================================================

//! ## Overview
//! Ambassador core types define the domain entities (users, clients, tool
//! profiles, sessions, catalog entries), the identifiers that key them, the
//! closed error taxonomy pipeline boundaries map onto, the glob matcher used
//! by tool profiles, and the argument validator used at invocation time.
//! These are the canonical source of truth for any derived API surface.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod error;
pub mod glob;
pub mod identifiers;
pub mod model;
pub mod time;
pub mod validate;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::AmbassadorError;
pub use error::ErrorKind;
pub use glob::GlobError;
pub use glob::GlobPattern;
pub use glob::glob_match;
pub use identifiers::AuditEventId;
pub use identifiers::CatalogEntryId;
pub use identifiers::ClientId;
pub use identifiers::ConnectionId;
pub use identifiers::CredentialId;
pub use identifiers::GroupId;
pub use identifiers::OAuthStateId;
pub use identifiers::SessionId;
pub use identifiers::SubscriptionId;
pub use identifiers::ToolProfileId;
pub use identifiers::UserId;
pub use model::ALL_USERS_GROUP;
pub use model::AdminKey;
pub use model::AuthType;
pub use model::CatalogEntry;
pub use model::Client;
pub use model::ClientStatus;
pub use model::Connection;
pub use model::ConnectionStatus;
pub use model::CredentialType;
pub use model::Group;
pub use model::IsolationMode;
pub use model::OAuthStateRow;
pub use model::OAuthStatus;
pub use model::PublicationStatus;
pub use model::RateLimit;
pub use model::Session;
pub use model::SessionStatus;
pub use model::Subscription;
pub use model::SubscriptionStatus;
pub use model::ToolProfile;
pub use model::TransportKind;
pub use model::User;
pub use model::UserCredential;
pub use model::UserStatus;
pub use time::Timestamp;
pub use validate::ArgSchema;
pub use validate::FieldType;
pub use validate::REDACTED_MARKER;
pub use validate::ValidationOptions;
pub use validate::ValidationOutcome;
pub use validate::validate_arguments;
