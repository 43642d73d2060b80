// ambassador-orchestrator/src/pipeline.rs
// ============================================================================
// Module: Pipeline Orchestrator
// Description: Composes session authentication, authorization, argument
//              validation, routing, and audit logging into the single
//              request path a tool invocation takes (spec.md §4.9).
// Purpose: Guarantee every invocation produces exactly one terminal audit
//          event and that a rejection at any stage short-circuits the
//          remaining stages instead of silently falling through to the
//          tool server.
// Dependencies: ambassador_core, ambassador_providers, ambassador_store_sqlite,
//               crate::router, crate::session_auth
// ============================================================================

//! ## Overview
//! [`Pipeline::invoke`] is the one place every stage of spec.md §4 comes
//! together: [`crate::session_auth::verify_session_token`] stands in for
//! AuthN on this path (a session token authenticates a narrower surface
//! than a client's preshared key, spec.md §4.3), followed by a fresh
//! [`ambassador_core::Client::is_usable`] check (a client revoked after its
//! session was issued must not keep invoking tools through it), then
//! [`ambassador_core::AuthZProvider::authorize`], then
//! [`ambassador_core::validate_arguments`] against the target tool's
//! declared schema, then [`crate::router::ToolRouter::invoke`]. Each stage
//! that passes records its own audit event (`authn_success`, `authz_permit`)
//! on the way through, and the stage that finally rejects or completes the
//! call records exactly one terminal event (`authn_failure`, `authz_decision`
//! denied/error, or `tool_invocation`/`tool_error`) — spec.md §4.9's
//! sequencing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use ambassador_core::AuditEvent;
use ambassador_core::AuditSink;
use ambassador_core::AuthZDecision;
use ambassador_core::AuthZError;
use ambassador_core::AuthZProvider;
use ambassador_core::AuthZRequest;
use ambassador_core::Timestamp;
use ambassador_core::UserId;
use ambassador_core::ValidationOptions;
use ambassador_core::validate_arguments;
use ambassador_store_sqlite::Store;
use ambassador_store_sqlite::StoreError;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::pool::PoolError;
use crate::router::ToolRouter;
use crate::session_auth::SessionAuthError;
use crate::session_auth::verify_session_token;

mod schema;

pub use schema::arg_schema_from_json_schema;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Public outcome of a rejected invocation. Every variant maps to an HTTP
/// status at the `ambassador-cli` boundary; none of them ever carries the
/// internal detail that was already written to the audit trail (I-6).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Session authentication failed (maps to 401).
    #[error("authentication rejected")]
    Unauthorized,
    /// The session's client is no longer usable, or AuthZ denied the call
    /// (maps to 403).
    #[error("authorization denied")]
    Forbidden,
    /// The requested tool does not exist or is not routable for this
    /// session (maps to 404).
    #[error("tool not found")]
    NotFound,
    /// The supplied arguments failed schema validation (maps to 422).
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The downstream tool server call failed (maps to 502/504).
    #[error("tool invocation failed: {0}")]
    ToolServer(String),
    /// An internal dependency (store, audit sink) failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for PipelineError {
    fn from(error: StoreError) -> Self {
        Self::Internal(error.to_string())
    }
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Strings together AuthN, AuthZ, argument validation, routing, and audit
/// logging for one tool invocation (spec.md §4.9).
pub struct Pipeline<A: AuthZProvider> {
    store: Arc<Store>,
    authz: A,
    router: Arc<ToolRouter>,
    audit: Arc<dyn AuditSink>,
    validation: ValidationOptions,
}

impl<A: AuthZProvider> Pipeline<A> {
    /// Builds a pipeline over the given store, AuthZ provider, router, and
    /// audit sink.
    #[must_use]
    pub fn new(store: Arc<Store>, authz: A, router: Arc<ToolRouter>, audit: Arc<dyn AuditSink>, validation: ValidationOptions) -> Self {
        Self { store, authz, router, audit, validation }
    }

    async fn audit(&self, user_id: Option<UserId>, client_id: Option<ambassador_core::ClientId>, event_type: &str, detail: Value, outcome: &str) {
        let event = AuditEvent {
            timestamp: Timestamp::now(),
            user_id,
            client_id,
            event_type: event_type.to_string(),
            detail,
            outcome: outcome.to_string(),
        };
        let _ignored_sink_failure = self.audit.record(event).await;
    }

    /// Runs the full pipeline for one invocation of `tool_name` with
    /// `arguments`, authenticated by `raw_session_token`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Unauthorized`] when the session token does
    /// not verify, [`PipelineError::Forbidden`] when the session's client
    /// is no longer usable or AuthZ denies the call,
    /// [`PipelineError::NotFound`] when the tool does not exist,
    /// [`PipelineError::InvalidArguments`] when argument validation fails,
    /// or [`PipelineError::ToolServer`] when the downstream call itself
    /// fails. Every rejection is audited before the error is returned.
    pub async fn invoke(&self, raw_session_token: &str, tool_name: &str, arguments: Value) -> Result<Value, PipelineError> {
        let session = match verify_session_token(&self.store, raw_session_token).await {
            Ok(session) => session,
            Err(error) => {
                self.audit(None, None, "authn_failure", json!({"reason": session_auth_reason(&error)}), "rejected").await;
                return Err(PipelineError::Unauthorized);
            }
        };

        let client = self.store.get_client(session.client_id.clone()).await?;
        let Some(client) = client else {
            self.audit(Some(session.user_id.clone()), Some(session.client_id.clone()), "authn_failure", json!({"reason": "client not found"}), "rejected").await;
            return Err(PipelineError::Unauthorized);
        };
        if !client.is_usable(Timestamp::now()) {
            self.audit(
                Some(session.user_id.clone()),
                Some(session.client_id.clone()),
                "authz_decision",
                json!({"tool_name": tool_name, "policy_id": "system_lifecycle", "reason": "client is suspended or revoked"}),
                "denied",
            )
            .await;
            return Err(PipelineError::Forbidden);
        }
        self.audit(Some(session.user_id.clone()), Some(session.client_id.clone()), "authn_success", json!({}), "accepted").await;

        let authz_request = AuthZRequest { client_id: session.client_id.clone(), profile_id: session.profile_id.clone(), tool_name: tool_name.to_string() };
        let decision = match self.authz.authorize(&authz_request).await {
            Ok(decision) => decision,
            Err(error) => {
                self.audit(Some(session.user_id.clone()), Some(session.client_id.clone()), "authz_decision", json!({"tool_name": tool_name, "error": error.to_string()}), "error").await;
                return Err(PipelineError::Internal(authz_error_message(&error)));
            }
        };
        let policy_id = match decision {
            AuthZDecision::Denied { policy_id, reason } => {
                self.audit(
                    Some(session.user_id.clone()),
                    Some(session.client_id.clone()),
                    "authz_decision",
                    json!({"tool_name": tool_name, "policy_id": policy_id.as_ref().map(ToString::to_string), "reason": reason}),
                    "denied",
                )
                .await;
                return Err(PipelineError::Forbidden);
            }
            AuthZDecision::Allowed { policy_id } => policy_id,
        };
        self.audit(
            Some(session.user_id.clone()),
            Some(session.client_id.clone()),
            "authz_permit",
            json!({"tool_name": tool_name, "policy_id": policy_id.as_ref().map(ToString::to_string)}),
            "permitted",
        )
        .await;

        let Some(descriptor) = self.router.descriptor_for(&session.user_id, tool_name).await else {
            self.audit(Some(session.user_id.clone()), Some(session.client_id.clone()), "tool_invocation", json!({"tool_name": tool_name}), "not_found").await;
            return Err(PipelineError::NotFound);
        };

        let schema = arg_schema_from_json_schema(&descriptor.input_schema);
        let outcome = validate_arguments(&schema, &arguments, &self.validation);
        if !outcome.valid {
            let reason = outcome.error.unwrap_or_else(|| "invalid arguments".to_string());
            self.audit(Some(session.user_id.clone()), Some(session.client_id.clone()), "tool_invocation", json!({"tool_name": tool_name, "reason": reason}), "invalid_arguments").await;
            return Err(PipelineError::InvalidArguments(reason.clone()));
        }
        let sanitized = outcome.sanitized_args.unwrap_or(Value::Null);

        match self.router.invoke(&session.user_id, tool_name, sanitized.clone()).await {
            Ok(result) => {
                self.audit(Some(session.user_id.clone()), Some(session.client_id.clone()), "tool_invocation", json!({"tool_name": tool_name, "arguments": sanitized}), "success").await;
                Ok(result)
            }
            Err(PoolError::NotFound) => {
                self.audit(Some(session.user_id.clone()), Some(session.client_id.clone()), "tool_invocation", json!({"tool_name": tool_name}), "not_found").await;
                Err(PipelineError::NotFound)
            }
            Err(error) => {
                self.audit(
                    Some(session.user_id.clone()),
                    Some(session.client_id.clone()),
                    "tool_invocation",
                    json!({"tool_name": tool_name, "arguments": sanitized, "error": error.to_string()}),
                    "error",
                )
                .await;
                Err(PipelineError::ToolServer(error.to_string()))
            }
        }
    }
}

fn session_auth_reason(error: &SessionAuthError) -> &'static str {
    match error {
        SessionAuthError::Malformed => "malformed token",
        SessionAuthError::UnknownSession => "unknown session",
        SessionAuthError::SecretMismatch => "secret mismatch",
        SessionAuthError::NotActive => "session not active",
        SessionAuthError::Expired => "session expired",
        SessionAuthError::Store(_) => "store error",
    }
}

fn authz_error_message(error: &AuthZError) -> String {
    match error {
        AuthZError::InheritanceDepthExceeded => "tool profile inheritance exceeded maximum depth".to_string(),
        AuthZError::InheritanceCycle => "tool profile inheritance forms a cycle".to_string(),
        AuthZError::Provider(message) => message.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;
    use ambassador_core::Client;
    use ambassador_core::ClientId;
    use ambassador_core::ClientStatus;
    use ambassador_core::ConnectionHealth;
    use ambassador_core::ProviderConnectError;
    use ambassador_core::Session;
    use ambassador_core::SessionId;
    use ambassador_core::SessionStatus;
    use ambassador_core::ToolDescriptor;
    use ambassador_core::ToolProfileId;
    use ambassador_core::ToolServerConnection;
    use ambassador_core::ToolServerError;
    use ambassador_core::ToolServerProvider;
    use ambassador_core::TransportKind;
    use ambassador_core::CatalogEntry;
    use ambassador_core::CatalogEntryId;
    use ambassador_core::AuthType;
    use ambassador_core::IsolationMode;
    use ambassador_core::PublicationStatus;
    use ambassador_providers::ProviderRegistry;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use crate::pool::per_user::PerUserPool;
    use crate::pool::per_user::PerUserPoolLimits;
    use crate::pool::shared::SharedManager;
    use crate::session_auth::generate_session_token;

    struct AllowAllAuthZ;

    #[async_trait]
    impl AuthZProvider for AllowAllAuthZ {
        async fn authorize(&self, request: &AuthZRequest) -> Result<AuthZDecision, AuthZError> {
            Ok(AuthZDecision::Allowed { policy_id: request.profile_id.clone() })
        }

        async fn authorized_tools(&self, _profile_id: Option<&ToolProfileId>, tools: &[ToolDescriptor]) -> Result<Vec<ToolDescriptor>, AuthZError> {
            Ok(tools.to_vec())
        }
    }

    struct DenyAllAuthZ;

    #[async_trait]
    impl AuthZProvider for DenyAllAuthZ {
        async fn authorize(&self, request: &AuthZRequest) -> Result<AuthZDecision, AuthZError> {
            Ok(AuthZDecision::Denied { policy_id: request.profile_id.clone(), reason: "deny-all test fixture".to_string() })
        }

        async fn authorized_tools(&self, _profile_id: Option<&ToolProfileId>, _tools: &[ToolDescriptor]) -> Result<Vec<ToolDescriptor>, AuthZError> {
            Ok(Vec::new())
        }
    }

    struct NullAudit;

    #[async_trait]
    impl AuditSink for NullAudit {
        async fn record(&self, _event: AuditEvent) -> Result<(), ambassador_core::AuditError> {
            Ok(())
        }

        async fn flush(&self) -> Result<(), ambassador_core::AuditError> {
            Ok(())
        }
    }

    struct FakeConnection {
        catalog_entry_id: CatalogEntryId,
    }

    #[async_trait]
    impl ToolServerConnection for FakeConnection {
        fn catalog_entry_id(&self) -> &CatalogEntryId {
            &self.catalog_entry_id
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError> {
            Ok(vec![ToolDescriptor { name: "github.create_repo".to_string(), description: "creates a repo".to_string(), input_schema: json!({"type": "object"}) }])
        }

        async fn invoke(&self, _tool_name: &str, _arguments: Value) -> Result<Value, ToolServerError> {
            Ok(json!({"created": true}))
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

    async fn router_with_tool() -> Arc<ToolRouter> {
        let mut registry = ProviderRegistry::new(BTreeSet::from(["stdio".to_string()]));
        registry.register(Arc::new(FakeProvider)).expect("registers");
        let shared = Arc::new(SharedManager::new(Arc::new(registry)));
        let entry = CatalogEntry {
            id: CatalogEntryId::generate(),
            name: "github".to_string(),
            transport: TransportKind::Stdio,
            config: json!({"command": "whatever"}),
            isolation: IsolationMode::Shared,
            requires_user_credentials: false,
            credential_schema: None,
            auth_type: AuthType::None,
            oauth_config: None,
            publication_status: PublicationStatus::Published,
            validated: true,
        };
        shared.spawn(&[entry]).await.expect("spawns");
        let per_user = Arc::new(PerUserPool::new(Arc::new(ProviderRegistry::new(BTreeSet::new())), PerUserPoolLimits::default()));
        Arc::new(ToolRouter::new(shared, per_user))
    }

    async fn seeded_session(store: &Store, profile_id: Option<ToolProfileId>, client_status: ClientStatus) -> String {
        let user_id = UserId::generate();
        let client_id = ClientId::generate();
        let client = Client {
            id: client_id.clone(),
            user_id: user_id.clone(),
            key_prefix: "abcd1234".to_string(),
            secret_hash: "unused".to_string(),
            profile_id: profile_id.clone(),
            status: client_status,
            expires_at: None,
            metadata: json!({}),
            created_at: Timestamp::now(),
        };
        store.create_client(client).await.expect("creates client");

        let session_id = SessionId::generate();
        let (token, hash, nonce) = generate_session_token(&session_id).expect("generates");
        let now = Timestamp::now();
        let session = Session {
            id: session_id,
            user_id,
            client_id,
            token_hash: hash,
            token_nonce: nonce,
            status: SessionStatus::Active,
            profile_id,
            created_at: now,
            last_activity_at: now,
            expires_at: now + Duration::from_secs(86_400),
            idle_timeout_seconds: 300,
            spindown_delay_seconds: 60,
        };
        store.create_session(session).await.expect("creates session");
        token
    }

    #[tokio::test]
    async fn successful_invocation_returns_the_tool_result() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let token = seeded_session(&store, Some(ToolProfileId::new("p1")), ClientStatus::Active).await;
        let pipeline = Pipeline::new(store, AllowAllAuthZ, router_with_tool().await, Arc::new(NullAudit), ValidationOptions::default());

        let result = pipeline.invoke(&token, "github.create_repo", json!({})).await.expect("invokes");
        assert_eq!(result, json!({"created": true}));
    }

    #[tokio::test]
    async fn malformed_token_is_unauthorized() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let pipeline = Pipeline::new(store, AllowAllAuthZ, router_with_tool().await, Arc::new(NullAudit), ValidationOptions::default());

        let result = pipeline.invoke("not-a-real-token", "github.create_repo", json!({})).await;
        assert!(matches!(result, Err(PipelineError::Unauthorized)));
    }

    #[tokio::test]
    async fn revoked_client_is_forbidden_even_with_a_valid_session() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let token = seeded_session(&store, Some(ToolProfileId::new("p1")), ClientStatus::Revoked).await;
        let pipeline = Pipeline::new(store, AllowAllAuthZ, router_with_tool().await, Arc::new(NullAudit), ValidationOptions::default());

        let result = pipeline.invoke(&token, "github.create_repo", json!({})).await;
        assert!(matches!(result, Err(PipelineError::Forbidden)));
    }

    #[tokio::test]
    async fn authz_denial_is_forbidden() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let token = seeded_session(&store, Some(ToolProfileId::new("p1")), ClientStatus::Active).await;
        let pipeline = Pipeline::new(store, DenyAllAuthZ, router_with_tool().await, Arc::new(NullAudit), ValidationOptions::default());

        let result = pipeline.invoke(&token, "github.create_repo", json!({})).await;
        assert!(matches!(result, Err(PipelineError::Forbidden)));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let token = seeded_session(&store, Some(ToolProfileId::new("p1")), ClientStatus::Active).await;
        let pipeline = Pipeline::new(store, AllowAllAuthZ, router_with_tool().await, Arc::new(NullAudit), ValidationOptions::default());

        let result = pipeline.invoke(&token, "nonexistent.tool", json!({})).await;
        assert!(matches!(result, Err(PipelineError::NotFound)));
    }
}
