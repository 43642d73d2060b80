// ambassador-orchestrator/src/pool/per_user.rs
// ============================================================================
// Module: Per-User Tool-Server Pool
// Description: Spawns, tracks, and tears down one connection per (user,
//              catalog entry) for entries with `isolation: per_user`
//              (spec.md §4.4).
// Purpose: Give every user their own process/connection to an isolated
//          downstream tool server, enforcing per-user and system-wide
//          connection ceilings without racing concurrent spawns.
// Dependencies: ambassador_core, ambassador_providers, tokio
// ============================================================================

//! ## Overview
//! A spawn for a user is serialized two ways: a per-user in-progress marker
//! rejects a second concurrent spawn for the same user outright, and a
//! single system-wide [`tokio::sync::Mutex`] serializes the
//! check-limits-then-reserve-then-connect sequence across users, so two
//! spawns racing the system-wide ceiling cannot both observe room and both
//! proceed (TOCTOU). A spawn either brings up every requested connection or
//! none: any connection started earlier in the same batch is shut down
//! before the error is returned.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ambassador_core::AuditEvent;
use ambassador_core::AuditSink;
use ambassador_core::CatalogEntry;
use ambassador_core::CatalogEntryId;
use ambassador_core::ConnectionHealth;
use ambassador_core::Timestamp;
use ambassador_core::ToolDescriptor;
use ambassador_core::ToolServerConnection;
use ambassador_core::UserId;
use ambassador_providers::ProviderRegistry;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

use crate::pool::PoolError;
use crate::pool::is_valid_tool_name;
use crate::pool::truncate_description;
use crate::provider::provider_name_for;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Resource limits governing the per-user pool (spec.md §4.4).
#[derive(Debug, Clone, Copy)]
pub struct PerUserPoolLimits {
    /// Maximum connections any single user may hold at once.
    pub max_per_user: usize,
    /// Maximum connections the pool may hold in total, across every user.
    pub max_total: usize,
}

impl Default for PerUserPoolLimits {
    fn default() -> Self {
        Self { max_per_user: 20, max_total: 500 }
    }
}

// ============================================================================
// SECTION: Routable Tool
// ============================================================================

/// One tool reachable through a user's connections, resolved at spawn time.
#[derive(Clone)]
struct RoutableTool {
    descriptor: ToolDescriptor,
    connection_index: usize,
}

/// A user's live connections and the tool catalog resolved from them.
#[derive(Default)]
struct UserState {
    connections: Vec<Box<dyn ToolServerConnection>>,
    tools: BTreeMap<String, RoutableTool>,
}

impl UserState {
    fn len(&self) -> usize {
        self.connections.len()
    }
}

// ============================================================================
// SECTION: Pool
// ============================================================================

/// Per-user tool-server pool (spec.md §4.4).
pub struct PerUserPool {
    registry: Arc<ProviderRegistry>,
    limits: PerUserPoolLimits,
    users: AsyncMutex<HashMap<UserId, UserState>>,
    spawning: AsyncMutex<HashSet<UserId>>,
    spawn_gate: AsyncMutex<()>,
}

impl PerUserPool {
    /// Creates an empty pool spawning connections through `registry`.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, limits: PerUserPoolLimits) -> Self {
        Self {
            registry,
            limits,
            users: AsyncMutex::new(HashMap::new()),
            spawning: AsyncMutex::new(HashSet::new()),
            spawn_gate: AsyncMutex::new(()),
        }
    }

    /// Returns `true` when `user_id` currently holds at least one
    /// connection.
    pub async fn has_active(&self, user_id: &UserId) -> bool {
        self.users.lock().await.get(user_id).is_some_and(|state| !state.connections.is_empty())
    }

    /// Total connections held across every user.
    pub async fn status(&self) -> PerUserPoolStatus {
        let users = self.users.lock().await;
        let total = users.values().map(UserState::len).sum();
        PerUserPoolStatus { total_connections: total, active_users: users.len() }
    }

    /// Spawns one connection per entry in `entries` for `user_id`.
    ///
    /// Idempotent: if `user_id` already holds connections, this is a no-op
    /// that returns `Ok(())` without spawning again. Callers that need to
    /// pick up newly subscribed catalog entries must `terminate` first.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::SpawnInProgress`] when a spawn for this user is
    /// already underway, [`PoolError::ResourceLimitExceeded`] when spawning
    /// every entry would exceed the per-user or system-wide ceiling, or
    /// [`PoolError::SpawnFailed`] when any single connection fails to
    /// spawn (all connections started earlier in the same batch are shut
    /// down before the error is returned).
    pub async fn spawn(&self, user_id: &UserId, entries: &[CatalogEntry]) -> Result<(), PoolError> {
        if entries.is_empty() || self.has_active(user_id).await {
            return Ok(());
        }

        {
            let mut spawning = self.spawning.lock().await;
            if !spawning.insert(user_id.clone()) {
                return Err(PoolError::SpawnInProgress);
            }
        }

        let result = self.spawn_locked(user_id, entries).await;

        self.spawning.lock().await.remove(user_id);
        result
    }

    async fn spawn_locked(&self, user_id: &UserId, entries: &[CatalogEntry]) -> Result<(), PoolError> {
        let _gate = self.spawn_gate.lock().await;

        let (current_user, current_total) = {
            let users = self.users.lock().await;
            let current_user = users.get(user_id).map_or(0, UserState::len);
            let current_total = users.values().map(UserState::len).sum();
            (current_user, current_total)
        };

        let requested = entries.len();
        if current_user + requested > self.limits.max_per_user {
            return Err(PoolError::ResourceLimitExceeded {
                current: current_user,
                requested_additional: requested,
                max_allowed: self.limits.max_per_user,
            });
        }
        if current_total + requested > self.limits.max_total {
            return Err(PoolError::ResourceLimitExceeded {
                current: current_total,
                requested_additional: requested,
                max_allowed: self.limits.max_total,
            });
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

        let mut state = UserState::default();
        for (index, connection) in spawned.into_iter().enumerate() {
            if let Err(error) = register_tools(&mut state.tools, connection.as_ref(), index).await {
                for remaining in state.connections {
                    remaining.shutdown().await;
                }
                connection.shutdown().await;
                return Err(PoolError::SpawnFailed(error.to_string()));
            }
            state.connections.push(connection);
        }

        self.users.lock().await.insert(user_id.clone(), state);
        Ok(())
    }

    /// Terminates every connection held by `user_id`.
    ///
    /// Idempotent: a user with no connections returns `Ok(())`
    /// immediately.
    pub async fn terminate(&self, user_id: &UserId) -> Result<(), PoolError> {
        let state = self.users.lock().await.remove(user_id);
        let Some(state) = state else {
            return Ok(());
        };
        for connection in state.connections {
            connection.shutdown().await;
        }
        Ok(())
    }

    /// Returns the merged tool catalog currently routable for `user_id`.
    pub async fn catalog(&self, user_id: &UserId) -> Vec<ToolDescriptor> {
        self.users.lock().await.get(user_id).map(|state| state.tools.values().map(|tool| tool.descriptor.clone()).collect()).unwrap_or_default()
    }

    /// Returns the descriptor for a single tool, if routable for `user_id`.
    pub async fn descriptor(&self, user_id: &UserId, tool_name: &str) -> Option<ToolDescriptor> {
        self.users.lock().await.get(user_id)?.tools.get(tool_name).map(|tool| tool.descriptor.clone())
    }

    /// Invokes `tool_name` on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotFound`] when `user_id` has no connection
    /// advertising `tool_name`, or a wrapped [`ambassador_core::ToolServerError`]
    /// when the downstream call itself fails.
    pub async fn invoke(
        &self,
        user_id: &UserId,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, PoolError> {
        let users = self.users.lock().await;
        let state = users.get(user_id).ok_or(PoolError::NotFound)?;
        let tool = state.tools.get(tool_name).ok_or(PoolError::NotFound)?;
        let connection = state.connections.get(tool.connection_index).ok_or(PoolError::NotFound)?;
        Ok(connection.invoke(tool_name, arguments).await?)
    }

    /// Terminates every connection held by every user. Used at process
    /// shutdown, where tearing down per-user state one user at a time would
    /// just be `terminate` called in a loop under a less consistent lock.
    pub async fn terminate_all(&self) -> Result<(), PoolError> {
        let users = std::mem::take(&mut *self.users.lock().await);
        for state in users.into_values() {
            for connection in state.connections {
                connection.shutdown().await;
            }
        }
        Ok(())
    }

    /// Probes every live connection's health and audits any that have gone
    /// unhealthy since the last sweep (spec.md §4.4: health loop, default
    /// 60s). Does not terminate or respawn unhealthy connections; that is
    /// left to the next explicit `terminate`/`spawn` cycle so a transient
    /// probe failure does not tear down a session mid-use.
    pub async fn health_sweep(&self, audit: &Arc<dyn AuditSink>) {
        let users = self.users.lock().await;
        for (user_id, state) in users.iter() {
            for connection in &state.connections {
                if connection.health().await == ConnectionHealth::Unhealthy {
                    let event = AuditEvent {
                        timestamp: Timestamp::now(),
                        user_id: Some(user_id.clone()),
                        client_id: None,
                        event_type: "connection_unhealthy".to_string(),
                        detail: json!({ "catalog_entry_id": connection.catalog_entry_id().as_str() }),
                        outcome: "unhealthy".to_string(),
                    };
                    let _ignored_sink_failure = audit.record(event).await;
                }
            }
        }
    }
}

/// Snapshot of pool occupancy for operator introspection.
#[derive(Debug, Clone, Copy)]
pub struct PerUserPoolStatus {
    /// Connections currently held across every user.
    pub total_connections: usize,
    /// Number of users holding at least one connection.
    pub active_users: usize,
}

/// Default interval between health sweeps, in seconds (spec.md §4.4).
pub const DEFAULT_HEALTH_INTERVAL_SECONDS: u64 = 60;

/// Runs [`PerUserPool::health_sweep`] on a fixed interval until the process
/// shuts down. Intended to be spawned once as its own task.
pub async fn run_health_loop(pool: Arc<PerUserPool>, audit: Arc<dyn AuditSink>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        pool.health_sweep(&audit).await;
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
    use ambassador_core::IsolationMode;
    use ambassador_core::ProviderConnectError;
    use ambassador_core::PublicationStatus;
    use ambassador_core::ToolServerProvider;
    use ambassador_core::TransportKind;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;

    struct FakeConnection {
        catalog_entry_id: CatalogEntryId,
        tool_prefix: String,
        healthy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ToolServerConnection for FakeConnection {
        fn catalog_entry_id(&self) -> &CatalogEntryId {
            &self.catalog_entry_id
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ambassador_core::ToolServerError> {
            Ok(vec![ToolDescriptor {
                name: format!("{}.tool", self.tool_prefix),
                description: "does a thing".to_string(),
                input_schema: json!({"type": "object"}),
            }])
        }

        async fn invoke(&self, _tool_name: &str, _arguments: serde_json::Value) -> Result<serde_json::Value, ambassador_core::ToolServerError> {
            Ok(json!({"ok": true}))
        }

        async fn health(&self) -> ConnectionHealth {
            if self.healthy.load(Ordering::SeqCst) { ConnectionHealth::Healthy } else { ConnectionHealth::Unhealthy }
        }

        async fn shutdown(&self) {
            self.healthy.store(false, Ordering::SeqCst);
        }
    }

    struct FakeProvider {
        healthy: Arc<AtomicBool>,
        fail: bool,
    }

    #[async_trait]
    impl ToolServerProvider for FakeProvider {
        fn name(&self) -> &str {
            "stdio"
        }

        async fn connect(&self, entry: &CatalogEntry) -> Result<Box<dyn ToolServerConnection>, ProviderConnectError> {
            if self.fail {
                return Err(ambassador_core::ToolServerError::Unreachable("boom".to_string()).into());
            }
            Ok(Box::new(FakeConnection { catalog_entry_id: entry.id.clone(), tool_prefix: entry.name.clone(), healthy: self.healthy.clone() }))
        }
    }

    fn sample_entry(name: &str) -> CatalogEntry {
        CatalogEntry {
            id: CatalogEntryId::generate(),
            name: name.to_string(),
            transport: TransportKind::Stdio,
            config: json!({"command": "whatever"}),
            isolation: IsolationMode::PerUser,
            requires_user_credentials: false,
            credential_schema: None,
            auth_type: AuthType::None,
            oauth_config: None,
            publication_status: PublicationStatus::Published,
            validated: true,
        }
    }

    async fn registry_with(healthy: bool, fail: bool) -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new(BTreeSet::from(["stdio".to_string()]));
        registry.register(Arc::new(FakeProvider { healthy: Arc::new(AtomicBool::new(healthy)), fail })).expect("registers");
        Arc::new(registry)
    }

    #[tokio::test]
    async fn spawn_then_invoke_routes_to_the_right_connection() {
        let registry = registry_with(true, false).await;
        let pool = PerUserPool::new(registry, PerUserPoolLimits::default());
        let user = UserId::generate();

        pool.spawn(&user, &[sample_entry("github")]).await.expect("spawns");
        assert!(pool.has_active(&user).await);

        let result = pool.invoke(&user, "github.tool", json!({})).await.expect("invokes");
        assert_eq!(result, json!({"ok": true}));
    }

    #[tokio::test]
    async fn spawn_is_idempotent() {
        let registry = registry_with(true, false).await;
        let pool = PerUserPool::new(registry, PerUserPoolLimits::default());
        let user = UserId::generate();

        pool.spawn(&user, &[sample_entry("github")]).await.expect("spawns");
        pool.spawn(&user, &[sample_entry("github"), sample_entry("slack")]).await.expect("no-ops");

        assert_eq!(pool.status().await.total_connections, 1);
    }

    #[tokio::test]
    async fn spawn_rejects_when_over_per_user_limit() {
        let registry = registry_with(true, false).await;
        let pool = PerUserPool::new(registry, PerUserPoolLimits { max_per_user: 1, max_total: 500 });
        let user = UserId::generate();

        let result = pool.spawn(&user, &[sample_entry("github"), sample_entry("slack")]).await;
        assert!(matches!(result, Err(PoolError::ResourceLimitExceeded { .. })));
        assert!(!pool.has_active(&user).await);
    }

    #[tokio::test]
    async fn spawn_rolls_back_partial_batch_on_failure() {
        let registry = registry_with(true, true).await;
        let pool = PerUserPool::new(registry, PerUserPoolLimits::default());
        let user = UserId::generate();

        let result = pool.spawn(&user, &[sample_entry("github")]).await;
        assert!(matches!(result, Err(PoolError::SpawnFailed(_))));
        assert!(!pool.has_active(&user).await);
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let registry = registry_with(true, false).await;
        let pool = PerUserPool::new(registry, PerUserPoolLimits::default());
        let user = UserId::generate();

        pool.terminate(&user).await.expect("no-op on absent user");
        pool.spawn(&user, &[sample_entry("github")]).await.expect("spawns");
        pool.terminate(&user).await.expect("terminates");
        pool.terminate(&user).await.expect("idempotent");
        assert!(!pool.has_active(&user).await);
    }

    #[tokio::test]
    async fn terminate_all_clears_every_user() {
        let registry = registry_with(true, false).await;
        let pool = PerUserPool::new(registry, PerUserPoolLimits::default());
        let first = UserId::generate();
        let second = UserId::generate();
        pool.spawn(&first, &[sample_entry("github")]).await.expect("spawns");
        pool.spawn(&second, &[sample_entry("github")]).await.expect("spawns");

        pool.terminate_all().await.expect("terminates");

        assert!(!pool.has_active(&first).await);
        assert!(!pool.has_active(&second).await);
        assert_eq!(pool.status().await.active_users, 0);
    }

    #[tokio::test]
    async fn invoke_unknown_tool_is_not_found() {
        let registry = registry_with(true, false).await;
        let pool = PerUserPool::new(registry, PerUserPoolLimits::default());
        let user = UserId::generate();
        pool.spawn(&user, &[sample_entry("github")]).await.expect("spawns");

        let result = pool.invoke(&user, "nope.tool", json!({})).await;
        assert!(matches!(result, Err(PoolError::NotFound)));
    }
}
