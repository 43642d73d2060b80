// ambassador-core/src/lib.rs
// ============================================================================
// Module: Ambassador Core Library
// Description: Public API surface for the Ambassador core.
// Purpose: Expose core types and the provider/transport interfaces built on
//          top of them.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Ambassador core provides the domain model, identifier types, error
//! taxonomy, glob matching, and argument validation shared by every other
//! Ambassador crate, plus the backend-agnostic interfaces (`AuthNProvider`,
//! `AuthZProvider`, `AuditSink`, `ToolServerConnection`, `ToolServerProvider`)
//! that `ambassador-providers`, `ambassador-orchestrator`, and
//! `ambassador-store-sqlite` implement. It is backend-agnostic and
//! integrates through explicit interfaces rather than embedding any
//! particular transport or storage technology.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::AuditError;
pub use interfaces::AuditEvent;
pub use interfaces::AuditSink;
pub use interfaces::AuthNError;
pub use interfaces::AuthNProvider;
pub use interfaces::AuthNSuccess;
pub use interfaces::AuthZDecision;
pub use interfaces::AuthZError;
pub use interfaces::AuthZProvider;
pub use interfaces::AuthZRequest;
pub use interfaces::ConnectionHealth;
pub use interfaces::PresentedCredential;
pub use interfaces::ProviderConnectError;
pub use interfaces::RegistryError;
pub use interfaces::ToolDescriptor;
pub use interfaces::ToolServerConnection;
pub use interfaces::ToolServerError;
pub use interfaces::ToolServerProvider;
