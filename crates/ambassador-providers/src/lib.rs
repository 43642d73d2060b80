// ambassador-providers/src/lib.rs
// ============================================================================
// Module: Ambassador Providers
// Description: Reference AuthN, AuthZ, audit, and provider-registry
//              implementations.
// Purpose: Supply the default, production-usable provider set the CLI wires
//          up, built entirely against ambassador-core's interfaces.
// Dependencies: ambassador-core
// ============================================================================

//! ## Overview
//! Every provider in this crate implements an interface declared in
//! `ambassador_core::interfaces`: [`authn::PresharedKeyAuthN`] implements
//! `AuthNProvider`, [`authz::LocalRbacAuthZ`] implements `AuthZProvider`,
//! [`audit::FileAuditSink`] implements `AuditSink`, and
//! [`registry::ProviderRegistry`] gates `ToolServerProvider` registration.
//! None of these are mandatory; a deployment may substitute its own
//! implementation of any interface without touching the pipeline.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod authn;
pub mod authz;
pub mod registry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::DEFAULT_MAX_AGE_SECONDS;
pub use audit::DEFAULT_MAX_FILE_BYTES;
pub use audit::DEFAULT_RING_CAPACITY;
pub use audit::FailureMode;
pub use audit::FileAuditSink;
pub use authn::ClientLookup;
pub use authn::ClientLookupError;
pub use authn::KEY_PREFIX_LEN;
pub use authn::PresharedKeyAuthN;
pub use authn::hash_secret;
pub use authn::split_key;
pub use authz::LocalRbacAuthZ;
pub use authz::MAX_INHERITANCE_DEPTH;
pub use authz::ProfileLookup;
pub use authz::ProfileLookupError;
pub use registry::ProviderRegistry;
