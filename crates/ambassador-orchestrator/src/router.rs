// ambassador-orchestrator/src/router.rs
// ============================================================================
// Module: Tool Router
// Description: Merges the shared and per-user tool catalogs into one
//              routable surface and dispatches invocations to whichever
//              pool owns a given tool (spec.md §4.5).
// Purpose: Let callers above this layer see one flat tool catalog and one
//          invoke path, without needing to know whether a tool is backed
//          by a shared or a per-user connection.
// Dependencies: ambassador_core, crate::pool
// ============================================================================

//! ## Overview
//! On a name conflict between the shared and per-user catalogs, the shared
//! entry always wins, both when listing and when dispatching (spec.md
//! §4.5): a user cannot shadow a shared tool with a per-user one of the
//! same name. Within a single pool, conflicts are resolved by that pool's
//! own first-write-wins rule (see [`crate::pool::per_user`] and
//! [`crate::pool::shared`]).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use ambassador_core::ToolDescriptor;
use ambassador_core::UserId;
use serde_json::Value;

use crate::pool::PoolError;
use crate::pool::per_user::PerUserPool;
use crate::pool::shared::SharedManager;

// ============================================================================
// SECTION: Router
// ============================================================================

/// Merges the shared and per-user catalogs and dispatches invocations.
pub struct ToolRouter {
    shared: Arc<SharedManager>,
    per_user: Arc<PerUserPool>,
}

impl ToolRouter {
    /// Builds a router over the given shared manager and per-user pool.
    #[must_use]
    pub const fn new(shared: Arc<SharedManager>, per_user: Arc<PerUserPool>) -> Self {
        Self { shared, per_user }
    }

    /// Returns the merged catalog routable for `user_id`: every shared
    /// tool, plus every per-user tool not shadowed by a shared tool of the
    /// same name.
    pub async fn catalog_for(&self, user_id: &UserId) -> Vec<ToolDescriptor> {
        let mut merged: BTreeMap<String, ToolDescriptor> = BTreeMap::new();
        for tool in self.per_user.catalog(user_id).await {
            merged.insert(tool.name.clone(), tool);
        }
        for tool in self.shared.catalog().await {
            merged.insert(tool.name.clone(), tool);
        }
        merged.into_values().collect()
    }

    /// Resolves a single tool's descriptor for `user_id`, shared-wins on
    /// conflict.
    pub async fn descriptor_for(&self, user_id: &UserId, tool_name: &str) -> Option<ToolDescriptor> {
        if let Some(descriptor) = self.shared.descriptor(tool_name).await {
            return Some(descriptor);
        }
        self.per_user.descriptor(user_id, tool_name).await
    }

    /// Invokes `tool_name` with `arguments` on behalf of `user_id`,
    /// preferring the shared pool on a name conflict.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotFound`] when neither pool advertises
    /// `tool_name` for this user, or a wrapped downstream error when the
    /// owning pool's call itself fails.
    pub async fn invoke(&self, user_id: &UserId, tool_name: &str, arguments: Value) -> Result<Value, PoolError> {
        match self.shared.invoke(tool_name, arguments.clone()).await {
            Ok(result) => Ok(result),
            Err(PoolError::NotFound) => self.per_user.invoke(user_id, tool_name, arguments).await,
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;
    use ambassador_core::AuthType;
    use ambassador_core::CatalogEntry;
    use ambassador_core::CatalogEntryId;
    use ambassador_core::ConnectionHealth;
    use ambassador_core::IsolationMode;
    use ambassador_core::ProviderConnectError;
    use ambassador_core::PublicationStatus;
    use ambassador_core::ToolServerConnection;
    use ambassador_core::ToolServerError;
    use ambassador_core::ToolServerProvider;
    use ambassador_core::TransportKind;
    use ambassador_providers::ProviderRegistry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeSet;

    use crate::pool::per_user::PerUserPool;
    use crate::pool::per_user::PerUserPoolLimits;

    struct FakeConnection {
        catalog_entry_id: CatalogEntryId,
        tool_name: String,
        tag: &'static str,
    }

    #[async_trait]
    impl ToolServerConnection for FakeConnection {
        fn catalog_entry_id(&self) -> &CatalogEntryId {
            &self.catalog_entry_id
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError> {
            Ok(vec![ToolDescriptor { name: self.tool_name.clone(), description: "desc".to_string(), input_schema: json!({}) }])
        }

        async fn invoke(&self, _tool_name: &str, _arguments: Value) -> Result<Value, ToolServerError> {
            Ok(json!({"from": self.tag}))
        }

        async fn health(&self) -> ConnectionHealth {
            ConnectionHealth::Healthy
        }

        async fn shutdown(&self) {}
    }

    struct FakeProvider {
        tool_name: String,
        tag: &'static str,
    }

    #[async_trait]
    impl ToolServerProvider for FakeProvider {
        fn name(&self) -> &str {
            "stdio"
        }

        async fn connect(&self, entry: &CatalogEntry) -> Result<Box<dyn ToolServerConnection>, ProviderConnectError> {
            Ok(Box::new(FakeConnection { catalog_entry_id: entry.id.clone(), tool_name: self.tool_name.clone(), tag: self.tag }))
        }
    }

    fn sample_entry(name: &str, isolation: IsolationMode) -> CatalogEntry {
        CatalogEntry {
            id: CatalogEntryId::generate(),
            name: name.to_string(),
            transport: TransportKind::Stdio,
            config: json!({"command": "whatever"}),
            isolation,
            requires_user_credentials: false,
            credential_schema: None,
            auth_type: AuthType::None,
            oauth_config: None,
            publication_status: PublicationStatus::Published,
            validated: true,
        }
    }

    async fn router_with_conflicting_tool(tool_name: &str) -> (ToolRouter, UserId) {
        let mut shared_registry = ProviderRegistry::new(BTreeSet::from(["stdio".to_string()]));
        shared_registry.register(Arc::new(FakeProvider { tool_name: tool_name.to_string(), tag: "shared" })).expect("registers");
        let shared = Arc::new(SharedManager::new(Arc::new(shared_registry)));
        shared.spawn(&[sample_entry("shared-entry", IsolationMode::Shared)]).await.expect("spawns");

        let mut per_user_registry = ProviderRegistry::new(BTreeSet::from(["stdio".to_string()]));
        per_user_registry.register(Arc::new(FakeProvider { tool_name: tool_name.to_string(), tag: "per_user" })).expect("registers");
        let per_user = Arc::new(PerUserPool::new(Arc::new(per_user_registry), PerUserPoolLimits::default()));
        let user = UserId::generate();
        per_user.spawn(&user, &[sample_entry("peruser-entry", IsolationMode::PerUser)]).await.expect("spawns");

        (ToolRouter::new(shared, per_user), user)
    }

    #[tokio::test]
    async fn shared_tool_shadows_same_named_per_user_tool() {
        let (router, user) = router_with_conflicting_tool("common.tool").await;

        let catalog = router.catalog_for(&user).await;
        assert_eq!(catalog.len(), 1);

        let result = router.invoke(&user, "common.tool", json!({})).await.expect("invokes");
        assert_eq!(result, json!({"from": "shared"}));
    }

    #[tokio::test]
    async fn invoke_falls_back_to_per_user_pool_when_not_shared() {
        let mut shared_registry = ProviderRegistry::new(BTreeSet::from(["stdio".to_string()]));
        shared_registry.register(Arc::new(FakeProvider { tool_name: "shared.tool".to_string(), tag: "shared" })).expect("registers");
        let shared = Arc::new(SharedManager::new(Arc::new(shared_registry)));
        shared.spawn(&[sample_entry("shared-entry", IsolationMode::Shared)]).await.expect("spawns");

        let mut per_user_registry = ProviderRegistry::new(BTreeSet::from(["stdio".to_string()]));
        per_user_registry.register(Arc::new(FakeProvider { tool_name: "private.tool".to_string(), tag: "per_user" })).expect("registers");
        let per_user = Arc::new(PerUserPool::new(Arc::new(per_user_registry), PerUserPoolLimits::default()));
        let user = UserId::generate();
        per_user.spawn(&user, &[sample_entry("peruser-entry", IsolationMode::PerUser)]).await.expect("spawns");

        let router = ToolRouter::new(shared, per_user);
        let result = router.invoke(&user, "private.tool", json!({})).await.expect("invokes");
        assert_eq!(result, json!({"from": "per_user"}));
    }

    #[tokio::test]
    async fn invoke_unknown_tool_is_not_found() {
        let (router, user) = router_with_conflicting_tool("common.tool").await;
        let result = router.invoke(&user, "nope.tool", json!({})).await;
        assert!(matches!(result, Err(PoolError::NotFound)));
    }
}
