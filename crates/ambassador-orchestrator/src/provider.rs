// ambassador-orchestrator/src/provider.rs
// ============================================================================
// Module: Tool Server Providers
// Description: ToolServerProvider implementations wrapping the stdio and
//              http/sse transports for registration with ProviderRegistry.
// Purpose: Let the pools spawn connections through the same allow-listed,
//          health-checked registry path every provider goes through
//          (spec.md §4.8), instead of constructing transports directly.
// Dependencies: ambassador_core, ambassador_providers, crate::transport
// ============================================================================

//! ## Overview
//! Two providers ship with the Ambassador: [`StdioProvider`] for child
//! processes and [`HttpProvider`] for HTTP/SSE endpoints. Both are thin
//! adapters; all the transport logic lives in [`crate::transport`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use ambassador_core::CatalogEntry;
use ambassador_core::ProviderConnectError;
use ambassador_core::ToolServerConnection;
use ambassador_core::ToolServerProvider;
use async_trait::async_trait;

use crate::transport::HttpConnection;
use crate::transport::StdioConnection;

/// Provider name stdio catalog entries are registered under.
pub const STDIO_PROVIDER_NAME: &str = "stdio";
/// Provider name HTTP/SSE catalog entries are registered under.
pub const HTTP_PROVIDER_NAME: &str = "http";

// ============================================================================
// SECTION: Stdio Provider
// ============================================================================

/// [`ToolServerProvider`] spawning child-process connections over stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioProvider;

#[async_trait]
impl ToolServerProvider for StdioProvider {
    fn name(&self) -> &str {
        STDIO_PROVIDER_NAME
    }

    async fn connect(&self, entry: &CatalogEntry) -> Result<Box<dyn ToolServerConnection>, ProviderConnectError> {
        let connection = StdioConnection::spawn(entry).await?;
        Ok(Box::new(connection))
    }
}

// ============================================================================
// SECTION: HTTP/SSE Provider
// ============================================================================

/// [`ToolServerProvider`] connecting to HTTP/SSE endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpProvider;

#[async_trait]
impl ToolServerProvider for HttpProvider {
    fn name(&self) -> &str {
        HTTP_PROVIDER_NAME
    }

    async fn connect(&self, entry: &CatalogEntry) -> Result<Box<dyn ToolServerConnection>, ProviderConnectError> {
        let connection = HttpConnection::connect(entry).await?;
        Ok(Box::new(connection))
    }
}

/// Maps a catalog entry's declared transport to the provider name it is
/// registered under (spec.md §4.4: stdio is its own transport; http and sse
/// share one provider, distinguished by the entry's own config).
#[must_use]
pub fn provider_name_for(transport: ambassador_core::TransportKind) -> &'static str {
    match transport {
        ambassador_core::TransportKind::Stdio => STDIO_PROVIDER_NAME,
        ambassador_core::TransportKind::Http | ambassador_core::TransportKind::Sse => HTTP_PROVIDER_NAME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambassador_core::TransportKind;

    #[test]
    fn maps_stdio_and_http_transports_to_distinct_providers() {
        assert_eq!(provider_name_for(TransportKind::Stdio), STDIO_PROVIDER_NAME);
        assert_eq!(provider_name_for(TransportKind::Http), HTTP_PROVIDER_NAME);
        assert_eq!(provider_name_for(TransportKind::Sse), HTTP_PROVIDER_NAME);
    }
}
