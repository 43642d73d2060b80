// ambassador-orchestrator/src/lib.rs
// ============================================================================
// Crate: ambassador-orchestrator
// Description: Downstream tool-server orchestration: transports, pooling,
//              routing, session lifecycle, and the AAA pipeline (spec.md §4).
// Purpose: Everything that sits between an authenticated request and a live
//          tool-server connection lives here; ambassador-cli wires it to the
//          HTTPS listener, ambassador-core supplies the domain model and the
//          pluggable AuthN/AuthZ/Audit interfaces it composes.
// Dependencies: ambassador-core, ambassador-providers, ambassador-store-sqlite
// ============================================================================

//! # MCP Ambassador Orchestrator
//!
//! This crate owns the parts of the Ambassador that exist only once a
//! request has cleared the outer HTTP boundary: the downstream transports
//! ([`transport`]), the per-user and shared tool-server pools ([`pool`]),
//! the tool router ([`router`]), the session lifecycle manager
//! ([`lifecycle`]), session-token authentication ([`session_auth`]), and the
//! pipeline that strings AuthN, AuthZ, argument validation, routing, and
//! audit logging into one request path ([`pipeline`]).

#![forbid(unsafe_code)]

pub mod lifecycle;
pub mod pipeline;
pub mod pool;
pub mod protocol;
pub mod provider;
pub mod router;
pub mod session_auth;
pub mod transport;

pub use lifecycle::LifecycleManager;
pub use pipeline::Pipeline;
pub use pipeline::PipelineError;
pub use pool::per_user::PerUserPool;
pub use pool::shared::SharedManager;
pub use provider::HttpProvider;
pub use provider::StdioProvider;
pub use router::ToolRouter;
pub use session_auth::generate_session_token;
pub use session_auth::verify_session_token;
pub use transport::HttpConnection;
pub use transport::StdioConnection;
