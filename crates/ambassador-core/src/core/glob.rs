// ambassador-core/src/core/glob.rs
// ============================================================================
// Module: Ambassador Glob Matcher
// Description: Linear-time wildcard matching over untrusted patterns.
// Purpose: Match tool names against allow/deny glob patterns without risking
//          catastrophic backtracking on adversarial input.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Patterns support a single wildcard character, `*`, with no other glob or
//! regex metacharacters. Matching splits the pattern on `*` and requires the
//! first segment to prefix the candidate, the last segment to suffix it, and
//! every interior segment to occur in order between them — a linear scan, no
//! regex engine, so an untrusted pattern can never blow up matching cost.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted pattern length, in bytes.
pub const MAX_PATTERN_LENGTH: usize = 200;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors constructing a [`GlobPattern`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GlobError {
    /// Pattern exceeded [`MAX_PATTERN_LENGTH`].
    #[error("glob pattern exceeds {MAX_PATTERN_LENGTH} bytes")]
    TooLong,
    /// Pattern was empty.
    #[error("glob pattern must not be empty")]
    Empty,
}

// ============================================================================
// SECTION: Glob Pattern
// ============================================================================

/// A length-validated wildcard pattern using `*` as the only metacharacter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GlobPattern(String);

impl GlobPattern {
    /// Validates and wraps a raw pattern string.
    ///
    /// # Errors
    ///
    /// Returns [`GlobError`] when the pattern is empty or too long.
    pub fn parse(raw: impl Into<String>) -> Result<Self, GlobError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(GlobError::Empty);
        }
        if raw.len() > MAX_PATTERN_LENGTH {
            return Err(GlobError::TooLong);
        }
        Ok(Self(raw))
    }

    /// Returns the pattern as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when `candidate` matches this pattern.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        glob_match(&self.0, candidate)
    }
}

impl TryFrom<String> for GlobPattern {
    type Error = GlobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<GlobPattern> for String {
    fn from(value: GlobPattern) -> Self {
        value.0
    }
}

// ============================================================================
// SECTION: Matching Algorithm
// ============================================================================

/// Matches `candidate` against a raw `*`-wildcard `pattern`.
///
/// Matching is linear in `pattern.len() + candidate.len()`: no backtracking
/// regex engine is involved, so an adversarial pattern cannot exhaust CPU.
#[must_use]
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == candidate;
    }

    let mut cursor = candidate;

    // First segment must prefix the candidate.
    let first = segments[0];
    if !cursor.starts_with(first) {
        return false;
    }
    cursor = &cursor[first.len()..];

    // Last segment must suffix whatever remains after the prefix.
    let last = segments[segments.len() - 1];
    if !cursor.ends_with(last) {
        return false;
    }
    cursor = &cursor[..cursor.len() - last.len()];

    // Interior segments must occur in order within what's left.
    for segment in &segments[1..segments.len() - 1] {
        if segment.is_empty() {
            continue;
        }
        match cursor.find(segment) {
            Some(index) => cursor = &cursor[index + segment.len()..],
            None => return false,
        }
    }

    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;

    #[test]
    fn exact_match_without_wildcard() {
        assert!(glob_match("echo.hello", "echo.hello"));
        assert!(!glob_match("echo.hello", "echo.world"));
    }

    #[test]
    fn trailing_wildcard_matches_prefix() {
        assert!(glob_match("echo.*", "echo.hello"));
        assert!(glob_match("echo.*", "echo."));
        assert!(!glob_match("echo.*", "other.hello"));
    }

    #[test]
    fn leading_wildcard_matches_suffix() {
        assert!(glob_match("*.delete", "github.delete"));
        assert!(!glob_match("*.delete", "github.create"));
    }

    #[test]
    fn interior_segments_must_occur_in_order() {
        assert!(glob_match("github.*.delete_*", "github.repo.delete_repo"));
        assert!(!glob_match("github.*.delete_*", "github.delete_repo.repo"));
    }

    #[test]
    fn bare_wildcard_matches_everything() {
        assert!(glob_match("*", "anything.at.all"));
        assert!(glob_match("*", ""));
    }

    #[test]
    fn pattern_parse_rejects_empty_and_overlong() {
        assert_eq!(GlobPattern::parse("").unwrap_err(), GlobError::Empty);
        let overlong = "a".repeat(MAX_PATTERN_LENGTH + 1);
        assert_eq!(GlobPattern::parse(overlong).unwrap_err(), GlobError::TooLong);
    }

    #[test]
    fn glob_pattern_matches_delegates_to_free_function() {
        let pattern = GlobPattern::parse("github.delete_*").expect("valid pattern");
        assert!(pattern.matches("github.delete_repo"));
        assert!(!pattern.matches("github.create_repo"));
    }

    #[test]
    fn deny_wins_example_from_spec() {
        let allow = GlobPattern::parse("github.*").expect("valid");
        let deny = GlobPattern::parse("github.delete_*").expect("valid");
        assert!(allow.matches("github.delete_repo"));
        assert!(deny.matches("github.delete_repo"));
    }

    proptest::proptest! {
        /// For prefix*suffix patterns, any candidate starting with the
        /// prefix and ending with the suffix matches (P2, spec.md §8).
        #[test]
        fn prefix_star_suffix_matches_any_bridging_middle(
            prefix in "[a-z]{0,6}",
            suffix in "[a-z]{0,6}",
            middle in "[a-z]{0,6}",
        ) {
            let pattern = format!("{prefix}*{suffix}");
            let candidate = format!("{prefix}{middle}{suffix}");
            proptest::prop_assert!(glob_match(&pattern, &candidate));
        }

        /// A pattern with no `*` only ever matches its exact candidate.
        #[test]
        fn literal_pattern_matches_only_itself(
            pattern in "[a-z]{1,10}",
            candidate in "[a-z]{1,10}",
        ) {
            proptest::prop_assert_eq!(glob_match(&pattern, &candidate), pattern == candidate);
        }
    }
}
