// ambassador-orchestrator/src/pool/mod.rs
// ============================================================================
// Module: Tool Server Pools
// Description: Shared error type and tool-name validation for the per-user
//              and shared tool-server pools (spec.md §4.4).
// Purpose: House the concerns common to both pools so neither duplicates
//          the other's resource-limit bookkeeping or name validation.
// Dependencies: ambassador_core
// ============================================================================

//! ## Overview
//! [`PerUserPool`](per_user::PerUserPool) and
//! [`SharedManager`](shared::SharedManager) both spawn
//! [`ambassador_core::ToolServerConnection`] instances through the same
//! allow-listed [`ambassador_providers::ProviderRegistry`] and share this
//! module's [`PoolError`] and tool-name validation, differing only in
//! whether a connection is keyed by user.

pub mod per_user;
pub mod shared;

// ============================================================================
// SECTION: Errors
// ============================================================================

use thiserror::Error;

/// Errors raised spawning, terminating, or invoking through a pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A spawn is already in progress for this key (user, or the shared
    /// pool as a whole); a second concurrent spawn is rejected rather than
    /// racing the first (spec.md §4.4).
    #[error("a spawn is already in progress")]
    SpawnInProgress,
    /// Spawning would exceed a configured resource limit.
    #[error("resource limit exceeded: {current} + {requested_additional} > {max_allowed}")]
    ResourceLimitExceeded {
        /// Connections already running against the relevant scope.
        current: usize,
        /// Additional connections this spawn would add.
        requested_additional: usize,
        /// Configured ceiling for the relevant scope.
        max_allowed: usize,
    },
    /// At least one connection failed to spawn; any connections started
    /// earlier in the same batch have already been shut down
    /// (all-or-nothing, spec.md §4.4).
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    /// No running connection exists for the requested tool.
    #[error("tool not found")]
    NotFound,
    /// The downstream call itself failed.
    #[error(transparent)]
    ToolServer(#[from] ambassador_core::ToolServerError),
}

// ============================================================================
// SECTION: Tool Name Validation
// ============================================================================

/// Maximum length of a tool name, including the catalog-entry prefix
/// (spec.md §4.5).
pub const MAX_TOOL_NAME_LEN: usize = 128;

/// Maximum length a downstream tool description is truncated to before
/// being surfaced in a catalog listing (spec.md §4.5).
pub const MAX_TOOL_DESCRIPTION_LEN: usize = 500;

/// Validates a tool name against `[A-Za-z0-9_.\-]{1,128}`, hand-rolled to
/// match the rest of this workspace's no-regex-engine convention (the same
/// approach [`ambassador_core::GlobPattern`] takes).
#[must_use]
pub fn is_valid_tool_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_TOOL_NAME_LEN {
        return false;
    }
    name.bytes().all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'.' | b'-'))
}

/// Truncates a tool description to [`MAX_TOOL_DESCRIPTION_LEN`] bytes at a
/// `char` boundary, never splitting a multi-byte character.
#[must_use]
pub fn truncate_description(description: &str) -> String {
    if description.len() <= MAX_TOOL_DESCRIPTION_LEN {
        return description.to_string();
    }
    let mut end = MAX_TOOL_DESCRIPTION_LEN;
    while end > 0 && !description.is_char_boundary(end) {
        end -= 1;
    }
    description[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_tool_names() {
        assert!(is_valid_tool_name("github.create_repo"));
        assert!(is_valid_tool_name("a"));
        assert!(is_valid_tool_name("tool-name_1.2"));
    }

    #[test]
    fn rejects_empty_and_oversized_names() {
        assert!(!is_valid_tool_name(""));
        assert!(!is_valid_tool_name(&"a".repeat(MAX_TOOL_NAME_LEN + 1)));
    }

    #[test]
    fn rejects_characters_outside_the_allowed_set() {
        assert!(!is_valid_tool_name("github create_repo"));
        assert!(!is_valid_tool_name("github/create_repo"));
        assert!(!is_valid_tool_name("tool;drop table"));
    }

    #[test]
    fn truncate_description_leaves_short_strings_untouched() {
        assert_eq!(truncate_description("short"), "short");
    }

    #[test]
    fn truncate_description_bounds_long_strings() {
        let long = "a".repeat(MAX_TOOL_DESCRIPTION_LEN + 50);
        let truncated = truncate_description(&long);
        assert_eq!(truncated.len(), MAX_TOOL_DESCRIPTION_LEN);
    }
}
