// ambassador-core/src/interfaces/mod.rs
// ============================================================================
// Module: Ambassador Interfaces
// Description: Backend-agnostic interfaces for authentication, authorization,
//              audit, and downstream tool-server transport.
// Purpose: Define the contract surfaces implemented by ambassador-providers,
//          ambassador-orchestrator, and ambassador-store-sqlite.
// Dependencies: crate::core, async_trait, serde_json
// ============================================================================

//! ## Overview
//! Interfaces define how the Ambassador integrates with pluggable providers
//! and downstream transports without the pipeline needing to know which
//! concrete implementation is wired in. Every method here crosses an I/O
//! boundary (network, disk, or a blocking call offloaded to a worker
//! thread), so the traits are declared `async` via [`async_trait`], matching
//! how downstream tool-server calls and credential lookups actually execute.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::CatalogEntryId;
use crate::core::identifiers::ClientId;
use crate::core::identifiers::ToolProfileId;
use crate::core::identifiers::UserId;
use crate::core::model::CatalogEntry;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: AuthN Provider
// ============================================================================

/// Credential presented by a connecting host agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedCredential {
    /// Raw preshared key as presented on the wire.
    pub raw_key: String,
}

/// The outcome of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthNSuccess {
    /// The authenticated client.
    pub client_id: ClientId,
    /// The client's owning user.
    pub user_id: UserId,
}

/// AuthN provider errors.
#[derive(Debug, Error)]
pub enum AuthNError {
    /// Credential did not match any known client, or the client is unusable.
    #[error("authentication rejected")]
    Rejected,
    /// The provider could not complete the check.
    #[error("authentication provider error: {0}")]
    Provider(String),
}

/// Verifies presented credentials and resolves them to a client identity.
///
/// Implementations must fail closed: any ambiguity resolves to
/// [`AuthNError::Rejected`], never to an implicit grant.
#[async_trait]
pub trait AuthNProvider: Send + Sync {
    /// Verifies `credential`, returning the resolved identity on success.
    ///
    /// # Errors
    ///
    /// Returns [`AuthNError`] when the credential is invalid or the
    /// provider cannot complete verification.
    async fn verify(&self, credential: &PresentedCredential) -> Result<AuthNSuccess, AuthNError>;
}

// ============================================================================
// SECTION: AuthZ Provider
// ============================================================================

/// A single authorization check against one tool name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthZRequest {
    /// The client whose profile governs this check.
    pub client_id: ClientId,
    /// Effective tool profile, if any.
    pub profile_id: Option<ToolProfileId>,
    /// Fully qualified tool name, e.g. `github.delete_repo`.
    pub tool_name: String,
}

/// AuthZ decision outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthZDecision {
    /// The tool invocation is permitted.
    Allowed {
        /// Effective profile id the allow rule was resolved against, when
        /// the request carried one.
        policy_id: Option<ToolProfileId>,
    },
    /// The tool invocation is denied.
    Denied {
        /// Effective profile id the decision was evaluated against, when
        /// the request carried one.
        policy_id: Option<ToolProfileId>,
        /// Human-readable reason naming the rule (or default-deny) that
        /// produced this decision, e.g. "matched deny pattern github.delete_*".
        reason: String,
    },
}

/// AuthZ provider errors.
#[derive(Debug, Error)]
pub enum AuthZError {
    /// Profile inheritance exceeded the maximum resolution depth.
    #[error("tool profile inheritance exceeded maximum depth")]
    InheritanceDepthExceeded,
    /// Profile inheritance formed a cycle.
    #[error("tool profile inheritance forms a cycle")]
    InheritanceCycle,
    /// The provider could not complete the check.
    #[error("authorization provider error: {0}")]
    Provider(String),
}

/// Resolves whether a client may invoke a given tool (deny-wins, I-2).
#[async_trait]
pub trait AuthZProvider: Send + Sync {
    /// Evaluates `request` against the effective profile's allow/deny rules.
    ///
    /// # Errors
    ///
    /// Returns [`AuthZError`] when profile resolution itself fails; a
    /// clean deny is represented as `Ok(AuthZDecision::Denied { .. })`, not
    /// an error.
    async fn authorize(&self, request: &AuthZRequest) -> Result<AuthZDecision, AuthZError>;

    /// Filters `tools` down to the subset `profile_id`'s effective allow/deny
    /// rules permit, applying the same deny-wins resolution as [`Self::authorize`]
    /// (spec.md §4.7, `listAuthorized`).
    ///
    /// # Errors
    ///
    /// Returns [`AuthZError`] when profile resolution itself fails.
    async fn authorized_tools(&self, profile_id: Option<&ToolProfileId>, tools: &[ToolDescriptor]) -> Result<Vec<ToolDescriptor>, AuthZError>;
}

// ============================================================================
// SECTION: Audit Sink
// ============================================================================

/// A single structured audit record (spec.md §4.9).
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    /// Event timestamp.
    pub timestamp: Timestamp,
    /// Acting user, when known.
    pub user_id: Option<UserId>,
    /// Acting client, when known.
    pub client_id: Option<ClientId>,
    /// Short event category, e.g. `tool_invocation`, `authn_failure`.
    pub event_type: String,
    /// Event-specific structured detail.
    pub detail: Value,
    /// Outcome code, e.g. `success`, `denied`, `error`.
    pub outcome: String,
}

/// Audit sink errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink could not accept the event (disk full, channel closed).
    #[error("audit sink error: {0}")]
    Sink(String),
}

/// Durable sink for audit events.
///
/// Fail-closed sinks propagate [`AuditError`] all the way back to the
/// pipeline, which must then refuse the operation being audited;
/// fail-open sinks buffer internally and only return an error once their
/// bounded buffer is exhausted (spec.md §4.9, Open Question c).
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records a single audit event.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when the event cannot be durably recorded.
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Records several audit events as a unit.
    ///
    /// The default implementation calls [`Self::record`] for each event in
    /// turn; sinks that can batch writes more efficiently should override
    /// this.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on the first event that cannot be durably
    /// recorded; earlier events in the batch may already be recorded.
    async fn emit_batch(&self, events: Vec<AuditEvent>) -> Result<(), AuditError> {
        for event in events {
            self.record(event).await?;
        }
        Ok(())
    }

    /// Waits until every event already accepted by [`Self::record`] or
    /// [`Self::emit_batch`] has been durably written. Callers must await
    /// this before the process exits (spec.md §4.8).
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when the sink cannot confirm a complete drain.
    async fn flush(&self) -> Result<(), AuditError>;
}

// ============================================================================
// SECTION: Tool Server Connection
// ============================================================================

/// A tool descriptor as advertised by a downstream tool server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Fully qualified tool name, `<catalog entry>.<tool>`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema describing accepted arguments.
    pub input_schema: Value,
}

/// Connection health as observed by the owning pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    /// The connection answered its most recent health probe.
    Healthy,
    /// The connection failed its most recent health probe.
    Unhealthy,
}

/// Tool server connection errors.
#[derive(Debug, Error)]
pub enum ToolServerError {
    /// The downstream process or endpoint could not be reached.
    #[error("tool server unreachable: {0}")]
    Unreachable(String),
    /// The downstream server returned a protocol-level error.
    #[error("tool server protocol error: {0}")]
    Protocol(String),
    /// The call exceeded its deadline.
    #[error("tool server call timed out")]
    Timeout,
}

/// A live connection to one downstream tool server instance.
///
/// One implementation backs both shared and per-user instances; isolation
/// is a property of how the owning pool keys and spawns connections, not
/// of this trait (spec.md §4.4-4.5).
#[async_trait]
pub trait ToolServerConnection: Send + Sync {
    /// Returns the catalog entry this connection was spawned for.
    fn catalog_entry_id(&self) -> &CatalogEntryId;

    /// Lists the tools this connection currently advertises.
    ///
    /// # Errors
    ///
    /// Returns [`ToolServerError`] when the listing call fails.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError>;

    /// Invokes `tool_name` with `arguments` and returns the raw result.
    ///
    /// # Errors
    ///
    /// Returns [`ToolServerError`] when the call fails, times out, or the
    /// downstream server reports a protocol-level error.
    async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<Value, ToolServerError>;

    /// Probes the connection without invoking a tool.
    async fn health(&self) -> ConnectionHealth;

    /// Gracefully terminates the underlying process or connection.
    async fn shutdown(&self);
}

// ============================================================================
// SECTION: Provider Registry
// ============================================================================

/// Provider registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested provider name is not on the configured allow-list.
    #[error("provider '{0}' is not on the allow-list")]
    NotAllowed(String),
    /// The provider failed interface validation at registration time.
    #[error("provider '{0}' failed interface validation: {1}")]
    InvalidInterface(String, String),
    /// The provider failed its health check at registration time.
    #[error("provider '{0}' failed its health check")]
    Unhealthy(String),
}

/// Validates and spawns [`ToolServerConnection`] instances for a catalog
/// entry, gating registration on an allow-list, interface validation, and
/// an initial health check (spec.md §4.8).
#[async_trait]
pub trait ToolServerProvider: Send + Sync {
    /// Returns the provider's registered name.
    fn name(&self) -> &str;

    /// Spawns a new connection for `entry`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the entry is not allow-listed, fails
    /// interface validation, or fails its initial health check; returns
    /// [`ToolServerError`] when the underlying spawn itself fails.
    async fn connect(
        &self,
        entry: &CatalogEntry,
    ) -> Result<Box<dyn ToolServerConnection>, ProviderConnectError>;
}

/// Combined error type for [`ToolServerProvider::connect`].
#[derive(Debug, Error)]
pub enum ProviderConnectError {
    /// Registry-level rejection.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Transport-level failure while spawning.
    #[error(transparent)]
    ToolServer(#[from] ToolServerError),
}
