// ambassador-orchestrator/src/pool/shared.rs
// ============================================================================
// Module: Shared Tool-Server Manager
// Description: Spawns and tracks the process-wide connections backing
//              catalog entries with `isolation: shared` (spec.md §4.4).
// Purpose: Give entries with no per-user isolation requirement a single
//          long-lived connection spun up once at startup instead of once
//          per user.
// Dependencies: ambassador_core, ambassador_providers, tokio
// ============================================================================

//! ## Overview
//! A shared instance is keyed by [`ambassador_core::CatalogEntryId`] rather
//! than by user: the whole system spawns it once (typically at startup),
//! every client routes to the same connection, and it is torn down once at
//! shutdown. It reuses [`PoolError`] and the tool-name/description helpers
//! from [`crate::pool`], and the same all-or-nothing batch-spawn discipline
//! as [`crate::pool::per_user::PerUserPool`], just without the per-user
//! dimension.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ambassador_core::AuditEvent;
use ambassador_core::AuditSink;
use ambassador_core::CatalogEntry;
use ambassador_core::ConnectionHealth;
use ambassador_core::Timestamp;
use ambassador_core::ToolDescriptor;
use ambassador_core::ToolServerConnection;
use ambassador_providers::ProviderRegistry;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

use crate::pool::PoolError;
use crate::pool::is_valid_tool_name;
use crate::pool::truncate_description;
use crate::provider::provider_name_for;

/// One routable tool backed by a shared connection.
#[derive(Clone)]
struct RoutableTool {
    descriptor: ToolDescriptor,
    connection_index: usize,
}

#[derive(Default)]
struct SharedState {
    connections: Vec<Box<dyn ToolServerConnection>>,
    tools: BTreeMap<String, RoutableTool>,
}

/// Process-wide manager for shared-isolation catalog entries (spec.md §4.4).
pub struct SharedManager {
    registry: Arc<ProviderRegistry>,
    state: AsyncMutex<SharedState>,
    spawn_gate: AsyncMutex<()>,
}

impl SharedManager {
    /// Creates an empty shared manager spawning connections through `registry`.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry, state: AsyncMutex::new(SharedState::default()), spawn_gate: AsyncMutex::new(()) }
    }

    /// Spawns one connection per entry in `entries`.
    ///
    /// Idempotent: a manager that already holds connections returns
    /// `Ok(())` without spawning again; call `terminate` first to pick up
    /// catalog changes.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::SpawnFailed`] when any connection in the batch
    /// fails to spawn; connections started earlier in the same batch are
    /// shut down before the error is returned.
    pub async fn spawn(&self, entries: &[CatalogEntry]) -> Result<(), PoolError> {
        if entries.is_empty() {
            return Ok(());
        }

        let _gate = self.spawn_gate.lock().await;
        if !self.state.lock().await.connections.is_empty() {
            return Ok(());
        }

        let mut spawned: Vec<Box<dyn ToolServerConnection>> = Vec::with_capacity(entries.len());
        for entry in entries {
            let provider_name = provider_name_for(entry.transport);
            match self.registry.connect(provider_name, entry).await {
                Ok(connection) => spawned.push(connection),
                Err(error) => {
                    for connection in spawned {
                        connection.shutdown().await;
                    }
                    return Err(PoolError::SpawnFailed(error.to_string()));
                }
            }
        }

        let mut tools = BTreeMap::new();
        let mut connections = Vec::with_capacity(spawned.len());
        for (index, connection) in spawned.into_iter().enumerate() {
            if let Err(error) = register_tools(&mut tools, connection.as_ref(), index).await {
                for remaining in connections {
                    let remaining: Box<dyn ToolServerConnection> = remaining;
                    remaining.shutdown().await;
                }
                connection.shutdown().await;
                return Err(PoolError::SpawnFailed(error.to_string()));
            }
            connections.push(connection);
        }

        *self.state.lock().await = SharedState { connections, tools };
        Ok(())
    }

    /// Terminates every shared connection. Idempotent.
    pub async fn terminate(&self) -> Result<(), PoolError> {
        let state = std::mem::take(&mut *self.state.lock().await);
        for connection in state.connections {
            connection.shutdown().await;
        }
        Ok(())
    }

    /// Returns the currently routable shared tool catalog.
    pub async fn catalog(&self) -> Vec<ToolDescriptor> {
        self.state.lock().await.tools.values().map(|tool| tool.descriptor.clone()).collect()
    }

    /// Returns the descriptor for a single shared tool, if routable.
    pub async fn descriptor(&self, tool_name: &str) -> Option<ToolDescriptor> {
        self.state.lock().await.tools.get(tool_name).map(|tool| tool.descriptor.clone())
    }

    /// Invokes `tool_name` against its backing shared connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotFound`] when no shared connection advertises
    /// `tool_name`, or a wrapped [`ambassador_core::ToolServerError`] when
    /// the downstream call itself fails.
    pub async fn invoke(&self, tool_name: &str, arguments: serde_json::Value) -> Result<serde_json::Value, PoolError> {
        let state = self.state.lock().await;
        let tool = state.tools.get(tool_name).ok_or(PoolError::NotFound)?;
        let connection = state.connections.get(tool.connection_index).ok_or(PoolError::NotFound)?;
        Ok(connection.invoke(tool_name, arguments).await?)
    }

    /// Probes every shared connection's health and audits any that have
    /// gone unhealthy since the last sweep.
    pub async fn health_sweep(&self, audit: &Arc<dyn AuditSink>) {
        let state = self.state.lock().await;
        for connection in &state.connections {
            if connection.health().await == ConnectionHealth::Unhealthy {
                let event = AuditEvent {
                    timestamp: Timestamp::now(),
                    user_id: None,
                    client_id: None,
                    event_type: "connection_unhealthy".to_string(),
                    detail: json!({ "catalog_entry_id": connection.catalog_entry_id().as_str(), "scope": "shared" }),
                    outcome: "unhealthy".to_string(),
                };
                let _ignored_sink_failure = audit.record(event).await;
            }
        }
    }
}

/// Default interval between health sweeps, in seconds (spec.md §4.4).
pub const DEFAULT_HEALTH_INTERVAL_SECONDS: u64 = 60;

/// Runs [`SharedManager::health_sweep`] on a fixed interval until the
/// process shuts down. Intended to be spawned once as its own task.
pub async fn run_health_loop(manager: Arc<SharedManager>, audit: Arc<dyn AuditSink>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        manager.health_sweep(&audit).await;
    }
}

async fn register_tools(
    tools: &mut BTreeMap<String, RoutableTool>,
    connection: &dyn ToolServerConnection,
    connection_index: usize,
) -> Result<(), ambassador_core::ToolServerError> {
    let listed = connection.list_tools().await?;
    for descriptor in listed {
        if !is_valid_tool_name(&descriptor.name) || tools.contains_key(&descriptor.name) {
            continue;
        }
        let descriptor =
            ToolDescriptor { name: descriptor.name.clone(), description: truncate_description(&descriptor.description), input_schema: descriptor.input_schema };
        tools.insert(descriptor.name.clone(), RoutableTool { descriptor, connection_index });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;
    use ambassador_core::AuthType;
    use ambassador_core::CatalogEntryId;
    use ambassador_core::IsolationMode;
    use ambassador_core::ProviderConnectError;
    use ambassador_core::PublicationStatus;
    use ambassador_core::ToolServerProvider;
    use ambassador_core::TransportKind;
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    struct FakeConnection {
        catalog_entry_id: CatalogEntryId,
    }

    #[async_trait]
    impl ToolServerConnection for FakeConnection {
        fn catalog_entry_id(&self) -> &CatalogEntryId {
            &self.catalog_entry_id
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ambassador_core::ToolServerError> {
            Ok(vec![ToolDescriptor { name: "slack.post_message".to_string(), description: "posts".to_string(), input_schema: json!({}) }])
        }

        async fn invoke(&self, _tool_name: &str, _arguments: serde_json::Value) -> Result<serde_json::Value, ambassador_core::ToolServerError> {
            Ok(json!({"posted": true}))
        }

        async fn health(&self) -> ConnectionHealth {
            ConnectionHealth::Healthy
        }

        async fn shutdown(&self) {}
    }

    struct FakeProvider;

    #[async_trait]
    impl ToolServerProvider for FakeProvider {
        fn name(&self) -> &str {
            "stdio"
        }

        async fn connect(&self, entry: &CatalogEntry) -> Result<Box<dyn ToolServerConnection>, ProviderConnectError> {
            Ok(Box::new(FakeConnection { catalog_entry_id: entry.id.clone() }))
        }
    }

    fn sample_entry() -> CatalogEntry {
        CatalogEntry {
            id: CatalogEntryId::generate(),
            name: "slack".to_string(),
            transport: TransportKind::Stdio,
            config: json!({"command": "slack-mcp-server"}),
            isolation: IsolationMode::Shared,
            requires_user_credentials: false,
            credential_schema: None,
            auth_type: AuthType::None,
            oauth_config: None,
            publication_status: PublicationStatus::Published,
            validated: true,
        }
    }

    async fn manager() -> SharedManager {
        let mut registry = ProviderRegistry::new(BTreeSet::from(["stdio".to_string()]));
        registry.register(Arc::new(FakeProvider)).expect("registers");
        SharedManager::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn spawn_then_invoke_a_shared_tool() {
        let manager = manager().await;
        manager.spawn(&[sample_entry()]).await.expect("spawns");

        let result = manager.invoke("slack.post_message", json!({})).await.expect("invokes");
        assert_eq!(result, json!({"posted": true}));
    }

    #[tokio::test]
    async fn spawn_is_idempotent() {
        let manager = manager().await;
        manager.spawn(&[sample_entry()]).await.expect("spawns");
        manager.spawn(&[sample_entry(), sample_entry()]).await.expect("no-ops");
        assert_eq!(manager.catalog().await.len(), 1);
    }

    #[tokio::test]
    async fn terminate_then_respawn_works() {
        let manager = manager().await;
        manager.spawn(&[sample_entry()]).await.expect("spawns");
        manager.terminate().await.expect("terminates");
        assert!(manager.catalog().await.is_empty());
        manager.spawn(&[sample_entry()]).await.expect("respawns");
        assert_eq!(manager.catalog().await.len(), 1);
    }
}
