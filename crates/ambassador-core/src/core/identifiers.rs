// ambassador-core/src/core/identifiers.rs
// ============================================================================
// Module: Ambassador Identifiers
// Description: Canonical opaque identifiers for entities in the data model.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde, ulid
// ============================================================================

//! ## Overview
//! This module defines the opaque string-based identifiers used throughout
//! the Ambassador. Identifiers are ULID-formatted and serialize as plain
//! strings; validation beyond "is a syntactically valid identifier" is the
//! caller's responsibility.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use ulid::Ulid;

// ============================================================================
// SECTION: Identifier Macro
// ============================================================================

/// Declares an opaque, `ULID`-backed identifier newtype.
macro_rules! newtype_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from an existing string value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generates a fresh, randomly ordered identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new().to_string())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

newtype_id!(UserId, "Stable identifier for a registered user.");
newtype_id!(ClientId, "Stable identifier for a client credential.");
newtype_id!(ToolProfileId, "Identifier for a tool profile (allow/deny ruleset).");
newtype_id!(SessionId, "Identifier for a host agent session.");
newtype_id!(ConnectionId, "Identifier for a session's physical connection.");
newtype_id!(CatalogEntryId, "Identifier for a downstream tool-server catalog entry.");
newtype_id!(GroupId, "Identifier for a user group.");
newtype_id!(SubscriptionId, "Identifier for a client-to-catalog subscription.");
newtype_id!(CredentialId, "Identifier for a stored per-user MCP credential.");
newtype_id!(OAuthStateId, "Identifier for a pending OAuth authorization-code exchange.");
newtype_id!(AuditEventId, "Identifier for an audit event.");

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_serde() {
        let id = UserId::new("u-123");
        let json = serde_json::to_string(&id).expect("serialize id");
        assert_eq!(json, "\"u-123\"");
        let back: UserId = serde_json::from_str(&json).expect("deserialize id");
        assert_eq!(back, id);
    }

    #[test]
    fn generate_produces_unique_values() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn display_matches_as_str() {
        let id = ClientId::new("c-42");
        assert_eq!(id.to_string(), id.as_str());
    }
}
