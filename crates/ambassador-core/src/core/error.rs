// ambassador-core/src/core/error.rs
// ============================================================================
// Module: Ambassador Error Taxonomy
// Description: Closed error-kind taxonomy shared across pipeline boundaries.
// Purpose: Let every crate map its own error enum onto one public taxonomy.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every module defines its own `thiserror`-based error enum. At pipeline
//! boundaries those errors collapse into [`ErrorKind`] plus a short internal
//! message, so the HTTP layer can map to a generic public response without
//! needing to know about every crate's internal error type (spec.md §7).

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Error Kind
// ============================================================================

/// Closed taxonomy of error kinds, independent of which component raised them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input failed validation (schema, disallow-pattern, malformed request).
    Validation,
    /// Caller could not be authenticated.
    Unauthorized,
    /// Caller was authenticated but is not permitted to perform the action.
    Forbidden,
    /// Referenced entity does not exist.
    NotFound,
    /// Operation conflicts with existing state.
    Conflict,
    /// Caller exceeded a rate limit.
    RateLimited,
    /// A dependency is temporarily unavailable.
    ServiceUnavailable,
    /// Unclassified internal failure.
    Internal,
    /// A per-user or global resource cap was exceeded.
    ResourceLimitExceeded,
    /// A provider name was not on the configured allow-list.
    ProviderNotAllowed,
    /// A provider failed interface validation.
    ProviderInvalid,
    /// A provider failed its health check.
    ProviderUnhealthy,
    /// An OAuth state token was missing, expired, or already consumed.
    InvalidOAuthState,
    /// An operation exceeded its deadline.
    Timeout,
    /// Vault decryption failed (wrong key, wrong IV, or tampered ciphertext).
    DecryptionFailed,
}

impl ErrorKind {
    /// Returns the short public code surfaced to HTTP clients.
    #[must_use]
    pub const fn public_code(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate_limited",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Internal => "internal",
            Self::ResourceLimitExceeded => "resource_limit_exceeded",
            Self::ProviderNotAllowed => "provider_not_allowed",
            Self::ProviderInvalid => "provider_invalid",
            Self::ProviderUnhealthy => "provider_unhealthy",
            Self::InvalidOAuthState => "invalid_state",
            Self::Timeout => "timeout",
            Self::DecryptionFailed => "decryption_failed",
        }
    }

    /// Returns the generic, non-revealing message surfaced to callers.
    ///
    /// Authentication failures and authorization denials are intentionally
    /// collapsed to the same two generic strings (I-6, spec.md §7): the
    /// specific reason is recorded only in the audit trail.
    #[must_use]
    pub const fn public_message(self) -> &'static str {
        match self {
            Self::Validation => "request failed validation",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate limited",
            Self::ServiceUnavailable => "service unavailable",
            Self::Internal => "internal error",
            Self::ResourceLimitExceeded => "resource limit exceeded",
            Self::ProviderNotAllowed => "provider not allowed",
            Self::ProviderInvalid => "provider invalid",
            Self::ProviderUnhealthy => "provider unhealthy",
            Self::InvalidOAuthState => "invalid or expired state",
            Self::Timeout => "request timed out",
            Self::DecryptionFailed => "decryption failed",
        }
    }
}

// ============================================================================
// SECTION: Ambassador Error
// ============================================================================

/// Boundary-crossing error carrying a closed [`ErrorKind`] plus internal detail.
///
/// The internal `message` is for logs and audit records only; HTTP responses
/// must use [`ErrorKind::public_code`] and [`ErrorKind::public_message`].
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct AmbassadorError {
    /// Closed error kind.
    pub kind: ErrorKind,
    /// Internal diagnostic message (never echoed to callers verbatim).
    pub message: String,
}

impl AmbassadorError {
    /// Builds a new boundary error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_and_forbidden_messages_are_generic() {
        assert_eq!(ErrorKind::Unauthorized.public_message(), "unauthorized");
        assert_eq!(ErrorKind::Forbidden.public_message(), "forbidden");
    }

    #[test]
    fn error_display_includes_internal_message() {
        let err = AmbassadorError::new(ErrorKind::Internal, "store unreachable");
        assert!(err.to_string().contains("store unreachable"));
    }
}
