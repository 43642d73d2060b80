// ambassador-orchestrator/src/protocol.rs
// ============================================================================
// Module: MCP Wire Protocol
// Description: JSON-RPC 2.0 envelopes and MCP-specific request/response
//              payloads shared by every transport.
// Purpose: Give the stdio and http/sse transports one shared wire format
//          instead of each hand-rolling its own framing.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every downstream tool server speaks JSON-RPC 2.0 regardless of transport;
//! only how the bytes are carried (newline-delimited over a pipe, or a POST
//! body over HTTP) differs. This module is the shared vocabulary the
//! transports in [`crate::transport`] serialize against.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// A JSON-RPC 2.0 request expecting a matching response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier echoed back in the response.
    pub id: u64,
    /// RPC method name, e.g. `tools/list`.
    pub method: String,
    /// Method parameters, when the method takes any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Builds a request with the fixed `"2.0"` protocol version.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, method: method.into(), params }
    }
}

// ============================================================================
// SECTION: Responses
// ============================================================================

/// A JSON-RPC 2.0 response, either a `result` or an `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Identifier matching the originating request.
    pub id: u64,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload, mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Consumes the response, yielding its result or propagating its error.
    ///
    /// # Errors
    ///
    /// Returns the embedded [`JsonRpcError`] when the response carries one.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Numeric error code, per the JSON-RPC spec or an MCP-specific range.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured error detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

// ============================================================================
// SECTION: MCP-Specific Payloads
// ============================================================================

/// Client identity advertised during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Name reported to the downstream server.
    pub name: String,
    /// Version string reported to the downstream server.
    pub version: String,
}

/// Parameters sent with the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// MCP protocol version the Ambassador speaks.
    pub protocol_version: String,
    /// Declared client capabilities (kept empty; the Ambassador requests
    /// nothing beyond tool listing and invocation).
    pub capabilities: Value,
    /// Identity advertised to the downstream server.
    pub client_info: ClientInfo,
}

/// A single tool definition as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDef {
    /// Tool name, unqualified (the catalog entry name is prefixed by the
    /// owning pool, not the downstream server).
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema describing accepted arguments.
    #[serde(default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// The result payload of a `tools/list` call.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsListResult {
    /// Tools advertised by the downstream server.
    #[serde(default)]
    pub tools: Vec<McpToolDef>,
}

/// Parameters sent with a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Unqualified tool name.
    pub name: String,
    /// Tool arguments.
    pub arguments: Value,
}

/// Protocol version the Ambassador negotiates with every downstream server.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Identity the Ambassador presents to downstream servers during `initialize`.
#[must_use]
pub fn ambassador_client_info() -> ClientInfo {
    ClientInfo { name: "mcp-ambassador".to_string(), version: env!("CARGO_PKG_VERSION").to_string() }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_fixed_protocol_version() {
        let request = JsonRpcRequest::new(7, "tools/list", None);
        let json = serde_json::to_value(&request).expect("serializes");
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert!(json.get("params").is_none());
    }

    #[test]
    fn response_into_result_propagates_error() {
        let response = JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: 1,
            result: None,
            error: Some(JsonRpcError { code: -32601, message: "method not found".to_string(), data: None }),
        };
        let error = response.into_result().expect_err("carries an error");
        assert_eq!(error.code, -32601);
    }

    #[test]
    fn tool_def_defaults_missing_schema_to_empty_object() {
        let tool: McpToolDef = serde_json::from_str(r#"{"name":"hello"}"#).expect("deserializes");
        assert_eq!(tool.input_schema, default_schema());
    }
}
