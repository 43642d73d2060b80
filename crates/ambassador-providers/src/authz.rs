// ambassador-providers/src/authz.rs
// ============================================================================
// Module: Local RBAC AuthZ Provider
// Description: Reference authorization provider resolving tool profiles.
// Purpose: Decide whether a client may invoke a tool under its effective,
//          inheritance-resolved allow/deny ruleset.
// Dependencies: ambassador-core, async_trait
// ============================================================================

//! ## Overview
//! A client's tool profile may inherit from a parent profile, forming a DAG
//! (I-2). Resolution walks the inheritance chain up to a fixed depth,
//! merging every ancestor's allow/deny patterns, then applies deny-wins: if
//! any deny pattern matches the tool name, the call is denied regardless of
//! how many allow patterns also match (spec.md §4.7).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashSet;

use ambassador_core::AuthZDecision;
use ambassador_core::AuthZError;
use ambassador_core::AuthZProvider;
use ambassador_core::AuthZRequest;
use ambassador_core::ToolDescriptor;
use ambassador_core::ToolProfile;
use ambassador_core::ToolProfileId;
use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum number of ancestor profiles walked while resolving inheritance.
pub const MAX_INHERITANCE_DEPTH: usize = 5;

// ============================================================================
// SECTION: Profile Lookup
// ============================================================================

/// Errors looking up a tool profile by identifier.
#[derive(Debug, Error)]
pub enum ProfileLookupError {
    /// The underlying store could not complete the lookup.
    #[error("tool profile lookup failed: {0}")]
    Store(String),
}

/// Resolves a [`ToolProfile`] by identifier.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    /// Returns the profile for `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileLookupError`] when the store itself fails.
    async fn find_profile(&self, id: &ToolProfileId) -> Result<Option<ToolProfile>, ProfileLookupError>;
}

// ============================================================================
// SECTION: Effective Profile Resolution
// ============================================================================

/// The merged allow/deny rule set after walking a profile's inheritance chain.
#[derive(Debug, Clone, Default)]
struct EffectiveRules {
    allow: Vec<ambassador_core::GlobPattern>,
    deny: Vec<ambassador_core::GlobPattern>,
}

async fn resolve_effective_rules<L: ProfileLookup>(
    lookup: &L,
    start: &ToolProfileId,
) -> Result<EffectiveRules, AuthZError> {
    let mut rules = EffectiveRules::default();
    let mut visited = HashSet::new();
    let mut current = Some(start.clone());
    let mut depth = 0usize;

    while let Some(profile_id) = current {
        if depth >= MAX_INHERITANCE_DEPTH {
            return Err(AuthZError::InheritanceDepthExceeded);
        }
        if !visited.insert(profile_id.clone()) {
            return Err(AuthZError::InheritanceCycle);
        }

        let profile = lookup
            .find_profile(&profile_id)
            .await
            .map_err(|error| AuthZError::Provider(error.to_string()))?;

        let Some(profile) = profile else {
            break;
        };

        rules.allow.extend(profile.allow.iter().cloned());
        rules.deny.extend(profile.deny.iter().cloned());
        current = profile.parent_id;
        depth += 1;
    }

    Ok(rules)
}

// ============================================================================
// SECTION: Provider
// ============================================================================

/// Local, inheritance-aware RBAC [`AuthZProvider`].
///
/// A client with no profile is denied every tool: the absence of a profile
/// is not treated as "allow all" (default-deny, spec.md §4.7).
pub struct LocalRbacAuthZ<L: ProfileLookup> {
    lookup: L,
}

impl<L: ProfileLookup> LocalRbacAuthZ<L> {
    /// Wraps a profile lookup implementation.
    #[must_use]
    pub const fn new(lookup: L) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl<L: ProfileLookup> AuthZProvider for LocalRbacAuthZ<L> {
    async fn authorize(&self, request: &AuthZRequest) -> Result<AuthZDecision, AuthZError> {
        let Some(profile_id) = &request.profile_id else {
            return Ok(AuthZDecision::Denied { policy_id: None, reason: "client has no effective tool profile".to_string() });
        };

        let rules = resolve_effective_rules(&self.lookup, profile_id).await?;

        if let Some(pattern) = rules.deny.iter().find(|pattern| pattern.matches(&request.tool_name)) {
            return Ok(AuthZDecision::Denied {
                policy_id: Some(profile_id.clone()),
                reason: format!("matched deny pattern {}", pattern.as_str()),
            });
        }
        if rules.allow.iter().any(|pattern| pattern.matches(&request.tool_name)) {
            return Ok(AuthZDecision::Allowed { policy_id: Some(profile_id.clone()) });
        }
        Ok(AuthZDecision::Denied { policy_id: Some(profile_id.clone()), reason: "no allow pattern matches this tool".to_string() })
    }

    async fn authorized_tools(&self, profile_id: Option<&ToolProfileId>, tools: &[ToolDescriptor]) -> Result<Vec<ToolDescriptor>, AuthZError> {
        let Some(profile_id) = profile_id else {
            return Ok(Vec::new());
        };

        let rules = resolve_effective_rules(&self.lookup, profile_id).await?;
        let permitted = tools
            .iter()
            .filter(|tool| {
                let denied = rules.deny.iter().any(|pattern| pattern.matches(&tool.name));
                let allowed = rules.allow.iter().any(|pattern| pattern.matches(&tool.name));
                allowed && !denied
            })
            .cloned()
            .collect();
        Ok(permitted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;
    use ambassador_core::ClientId;
    use ambassador_core::GlobPattern;
    use ambassador_core::RateLimit;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeProfiles {
        profiles: Mutex<HashMap<ToolProfileId, ToolProfile>>,
    }

    #[async_trait]
    impl ProfileLookup for FakeProfiles {
        async fn find_profile(&self, id: &ToolProfileId) -> Result<Option<ToolProfile>, ProfileLookupError> {
            Ok(self.profiles.lock().expect("lock").get(id).cloned())
        }
    }

    fn profile(id: &str, allow: &[&str], deny: &[&str], parent: Option<&str>) -> ToolProfile {
        ToolProfile {
            id: ToolProfileId::new(id),
            name: id.to_string(),
            allow: allow.iter().map(|pattern| GlobPattern::parse(*pattern).expect("valid")).collect(),
            deny: deny.iter().map(|pattern| GlobPattern::parse(*pattern).expect("valid")).collect(),
            rate_limit: RateLimit::default(),
            parent_id: parent.map(ToolProfileId::new),
        }
    }

    fn request(profile_id: Option<&str>, tool_name: &str) -> AuthZRequest {
        AuthZRequest {
            client_id: ClientId::generate(),
            profile_id: profile_id.map(ToolProfileId::new),
            tool_name: tool_name.to_string(),
        }
    }

    #[tokio::test]
    async fn allows_matching_tool_with_no_deny() {
        let mut map = HashMap::new();
        map.insert(ToolProfileId::new("p1"), profile("p1", &["github.*"], &[], None));
        let provider = LocalRbacAuthZ::new(FakeProfiles { profiles: Mutex::new(map) });

        let decision = provider.authorize(&request(Some("p1"), "github.create_repo")).await.expect("ok");
        assert!(matches!(decision, AuthZDecision::Allowed { policy_id: Some(ref id) } if id == &ToolProfileId::new("p1")));
    }

    #[tokio::test]
    async fn deny_wins_over_allow() {
        let mut map = HashMap::new();
        map.insert(
            ToolProfileId::new("p1"),
            profile("p1", &["github.*"], &["github.delete_*"], None),
        );
        let provider = LocalRbacAuthZ::new(FakeProfiles { profiles: Mutex::new(map) });

        let decision = provider.authorize(&request(Some("p1"), "github.delete_repo")).await.expect("ok");
        let AuthZDecision::Denied { policy_id, reason } = decision else { unreachable!("deny_wins_over_allow expects a denial") };
        assert_eq!(policy_id, Some(ToolProfileId::new("p1")));
        assert!(reason.contains("github.delete_*"), "reason should name the matching pattern: {reason}");
    }

    #[tokio::test]
    async fn no_profile_denies_by_default() {
        let provider = LocalRbacAuthZ::new(FakeProfiles { profiles: Mutex::new(HashMap::new()) });
        let decision = provider.authorize(&request(None, "github.create_repo")).await.expect("ok");
        assert!(matches!(decision, AuthZDecision::Denied { policy_id: None, .. }));
    }

    #[tokio::test]
    async fn inherits_allow_rules_from_parent_profile() {
        let mut map = HashMap::new();
        map.insert(ToolProfileId::new("child"), profile("child", &[], &[], Some("parent")));
        map.insert(ToolProfileId::new("parent"), profile("parent", &["github.*"], &[], None));
        let provider = LocalRbacAuthZ::new(FakeProfiles { profiles: Mutex::new(map) });

        let decision = provider.authorize(&request(Some("child"), "github.create_repo")).await.expect("ok");
        assert!(matches!(decision, AuthZDecision::Allowed { .. }));
    }

    #[tokio::test]
    async fn cycle_in_inheritance_is_rejected() {
        let mut map = HashMap::new();
        map.insert(ToolProfileId::new("a"), profile("a", &[], &[], Some("b")));
        map.insert(ToolProfileId::new("b"), profile("b", &[], &[], Some("a")));
        let provider = LocalRbacAuthZ::new(FakeProfiles { profiles: Mutex::new(map) });

        let result = provider.authorize(&request(Some("a"), "github.create_repo")).await;
        assert!(matches!(result, Err(AuthZError::InheritanceCycle)));
    }

    #[tokio::test]
    async fn inheritance_deeper_than_limit_is_rejected() {
        let mut map = HashMap::new();
        for depth in 0..8 {
            let parent = if depth == 7 { None } else { Some(format!("p{}", depth + 1)) };
            map.insert(
                ToolProfileId::new(format!("p{depth}")),
                profile(&format!("p{depth}"), &[], &[], parent.as_deref()),
            );
        }
        let provider = LocalRbacAuthZ::new(FakeProfiles { profiles: Mutex::new(map) });

        let result = provider.authorize(&request(Some("p0"), "github.create_repo")).await;
        assert!(matches!(result, Err(AuthZError::InheritanceDepthExceeded)));
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor { name: name.to_string(), description: String::new(), input_schema: serde_json::Value::Null }
    }

    #[tokio::test]
    async fn authorized_tools_filters_out_denied_and_unlisted_tools() {
        let mut map = HashMap::new();
        map.insert(ToolProfileId::new("p1"), profile("p1", &["github.*"], &["github.delete_*"], None));
        let provider = LocalRbacAuthZ::new(FakeProfiles { profiles: Mutex::new(map) });

        let tools = vec![descriptor("github.create_repo"), descriptor("github.delete_repo"), descriptor("slack.post_message")];
        let authorized = provider
            .authorized_tools(Some(&ToolProfileId::new("p1")), &tools)
            .await
            .expect("ok");

        let names: Vec<&str> = authorized.iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(names, vec!["github.create_repo"]);
    }

    #[tokio::test]
    async fn authorized_tools_is_empty_with_no_profile() {
        let provider = LocalRbacAuthZ::new(FakeProfiles { profiles: Mutex::new(HashMap::new()) });
        let authorized = provider.authorized_tools(None, &[descriptor("github.create_repo")]).await.expect("ok");
        assert!(authorized.is_empty());
    }
}
