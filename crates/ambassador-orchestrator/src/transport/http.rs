// ambassador-orchestrator/src/transport/http.rs
// ============================================================================
// Module: HTTP/SSE Tool Server Connection
// Description: HTTP transport for downstream tool servers, optionally
//              honoring server-sent events (spec.md §4.4).
// Purpose: Reach a downstream tool server that speaks JSON-RPC over HTTP
//          instead of stdio, without the pool needing to distinguish them.
// Dependencies: ambassador_core, reqwest, crate::protocol
// ============================================================================

//! ## Overview
//! Every call is a single JSON-RPC request POSTed to the catalog entry's
//! configured URL. When the entry declares `sse: true`, the response body is
//! parsed as a stream of `data: ...` events and the first event whose `id`
//! matches the outgoing request is taken as the result; otherwise the whole
//! response body is parsed as one JSON-RPC response.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ambassador_core::CatalogEntry;
use ambassador_core::CatalogEntryId;
use ambassador_core::ConnectionHealth;
use ambassador_core::ToolDescriptor;
use ambassador_core::ToolServerConnection;
use ambassador_core::ToolServerError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::protocol::JsonRpcRequest;
use crate::protocol::JsonRpcResponse;
use crate::protocol::ToolCallParams;
use crate::protocol::ToolsListResult;
use crate::transport::ErrorHistory;

// ============================================================================
// SECTION: Constants
// ============================================================================

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_HISTORY_CAPACITY: usize = 50;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// HTTP/SSE transport configuration, deserialized from [`CatalogEntry::config`].
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Endpoint URL calls are POSTed to.
    pub url: String,
    /// Additional headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Whether the endpoint responds with server-sent events.
    #[serde(default)]
    pub sse: bool,
    /// Per-call deadline, in milliseconds.
    pub timeout_ms: Option<u64>,
}

// ============================================================================
// SECTION: Connection
// ============================================================================

/// A live HTTP (optionally SSE) connection to a downstream tool server.
pub struct HttpConnection {
    /// Catalog entry this connection was built for.
    catalog_entry_id: CatalogEntryId,
    /// Underlying HTTP client.
    client: reqwest::Client,
    /// Endpoint the connection POSTs JSON-RPC requests to.
    url: String,
    /// Headers attached to every request.
    headers: BTreeMap<String, String>,
    /// Whether responses are framed as server-sent events.
    sse: bool,
    /// Per-call deadline.
    timeout: Duration,
    /// Monotonically increasing JSON-RPC request id.
    next_id: AtomicU64,
    /// Whether the most recent call succeeded.
    alive: AtomicBool,
    /// Recent transport errors.
    history: Mutex<ErrorHistory>,
}

impl HttpConnection {
    /// Builds a connection from `entry.config` and confirms the endpoint is
    /// initially reachable via a `ping` call.
    ///
    /// # Errors
    ///
    /// Returns [`ToolServerError::Unreachable`] when the config is malformed
    /// or the client cannot be constructed.
    pub async fn connect(entry: &CatalogEntry) -> Result<Self, ToolServerError> {
        let config: HttpConfig = serde_json::from_value(entry.config.clone())
            .map_err(|error| ToolServerError::Unreachable(format!("invalid http config: {error}")))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| ToolServerError::Unreachable(error.to_string()))?;

        let connection = Self {
            catalog_entry_id: entry.id.clone(),
            client,
            url: config.url,
            headers: config.headers,
            sse: config.sse,
            timeout: config.timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_TIMEOUT),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            history: Mutex::new(ErrorHistory::new(ERROR_HISTORY_CAPACITY)),
        };

        connection.call("initialize", None).await?;
        Ok(connection)
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn record_error(&self, message: String) {
        self.alive.store(false, Ordering::SeqCst);
        self.history.lock().await.push_error(message);
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, ToolServerError> {
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, method, params);

        let mut builder = self.client.post(&self.url).timeout(self.timeout).json(&request);
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }

        let response = builder.send().await.map_err(|error| {
            let message = if error.is_timeout() { "request timed out".to_string() } else { error.to_string() };
            ToolServerError::Unreachable(message)
        });

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                self.record_error(error.to_string()).await;
                return Err(error);
            }
        };

        let body = response.text().await.map_err(|error| ToolServerError::Unreachable(error.to_string()));
        let body = match body {
            Ok(body) => body,
            Err(error) => {
                self.record_error(error.to_string()).await;
                return Err(error);
            }
        };

        let parsed = if self.sse { parse_sse_response(&body, id) } else { parse_plain_response(&body, id) };

        match parsed {
            Ok(value) => {
                self.alive.store(true, Ordering::SeqCst);
                Ok(value)
            }
            Err(error) => {
                self.record_error(error.to_string()).await;
                Err(error)
            }
        }
    }

    /// Returns the recent transport errors for this connection, for
    /// operator introspection (spec.md §4.4).
    pub async fn error_history(&self) -> ErrorHistory {
        self.history.lock().await.clone()
    }
}

fn parse_plain_response(body: &str, expected_id: u64) -> Result<Value, ToolServerError> {
    let response: JsonRpcResponse =
        serde_json::from_str(body).map_err(|error| ToolServerError::Protocol(error.to_string()))?;
    if response.id != expected_id {
        return Err(ToolServerError::Protocol("response id did not match request".to_string()));
    }
    response.into_result().map_err(|error| ToolServerError::Protocol(error.to_string()))
}

fn parse_sse_response(body: &str, expected_id: u64) -> Result<Value, ToolServerError> {
    for line in body.lines() {
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let Ok(response) = serde_json::from_str::<JsonRpcResponse>(payload.trim()) else {
            continue;
        };
        if response.id == expected_id {
            return response.into_result().map_err(|error| ToolServerError::Protocol(error.to_string()));
        }
    }
    Err(ToolServerError::Protocol("no matching event in SSE stream".to_string()))
}

#[async_trait]
impl ToolServerConnection for HttpConnection {
    fn catalog_entry_id(&self) -> &CatalogEntryId {
        &self.catalog_entry_id
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolServerError> {
        let result = self.call("tools/list", None).await?;
        let parsed: ToolsListResult =
            serde_json::from_value(result).map_err(|error| ToolServerError::Protocol(error.to_string()))?;
        Ok(parsed
            .tools
            .into_iter()
            .map(|tool| ToolDescriptor { name: tool.name, description: tool.description, input_schema: tool.input_schema })
            .collect())
    }

    async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<Value, ToolServerError> {
        let params = ToolCallParams { name: tool_name.to_string(), arguments };
        self.call("tools/call", Some(serde_json::to_value(params).unwrap_or(Value::Null))).await
    }

    async fn health(&self) -> ConnectionHealth {
        match self.call("ping", None).await {
            Ok(_) => ConnectionHealth::Healthy,
            Err(_) => ConnectionHealth::Unhealthy,
        }
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_response_rejects_id_mismatch() {
        let body = r#"{"jsonrpc":"2.0","id":2,"result":{}}"#;
        let result = parse_plain_response(body, 1);
        assert!(matches!(result, Err(ToolServerError::Protocol(_))));
    }

    #[test]
    fn parse_sse_response_finds_matching_event() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n";
        let result = parse_sse_response(body, 1).expect("parses");
        assert_eq!(result, serde_json::json!({"ok": true}));
    }
}
