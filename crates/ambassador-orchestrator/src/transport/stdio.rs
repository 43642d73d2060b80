// ambassador-orchestrator/src/transport/stdio.rs
// ============================================================================
// Module: Stdio Tool Server Connection
// Description: Child-process transport speaking newline-delimited JSON-RPC
//              over stdin/stdout (spec.md §4.4).
// Purpose: Spawn a downstream tool server under a strict environment
//          whitelist and expose it as a ToolServerConnection.
// Dependencies: ambassador_core, tokio::process, crate::protocol
// ============================================================================

//! ## Overview
//! Each JSON-RPC message is a single newline-delimited line. A `request_lock`
//! serializes whole request/response cycles so concurrent callers never read
//! each other's responses off the same pipe. The child's environment is
//! cleared and rebuilt from a small whitelist plus the catalog entry's own
//! declared variables, so nothing from the Ambassador's process environment
//! leaks to the downstream server (spec.md §4.4).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
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
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::ChildStdin;
use tokio::process::ChildStdout;
use tokio::sync::Mutex;

use crate::protocol::InitializeParams;
use crate::protocol::JsonRpcRequest;
use crate::protocol::JsonRpcResponse;
use crate::protocol::MCP_PROTOCOL_VERSION;
use crate::protocol::ToolCallParams;
use crate::protocol::ToolsListResult;
use crate::protocol::ambassador_client_info;
use crate::transport::ErrorHistory;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variables forwarded from the Ambassador's own process,
/// verbatim, to every stdio child (spec.md §4.4). Nothing else crosses.
pub const ENV_WHITELIST: &[&str] = &["PATH", "HOME", "NODE_ENV", "LANG", "TZ", "TERM", "USER", "SHELL"];

/// Maximum number of non-JSON stdout lines tolerated before the connection
/// is declared broken (guards against a server that logs to stdout).
const MAX_SKIP_LINES: usize = 1000;

/// Default per-call deadline when a catalog entry does not declare one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the per-connection error-history ring.
const ERROR_HISTORY_CAPACITY: usize = 50;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Stdio transport configuration, deserialized from [`CatalogEntry::config`].
#[derive(Debug, Clone, Deserialize)]
pub struct StdioConfig {
    /// Executable to run.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Additional environment variables, applied after the whitelist.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Per-call deadline, in milliseconds.
    pub timeout_ms: Option<u64>,
}

// ============================================================================
// SECTION: Connection
// ============================================================================

/// A live stdio connection to one downstream tool server instance.
pub struct StdioConnection {
    /// Catalog entry this connection was spawned for.
    catalog_entry_id: CatalogEntryId,
    /// Child's stdin, behind a lock so writes never interleave.
    stdin: Mutex<ChildStdin>,
    /// Child's stdout, buffered and behind a lock for the same reason.
    stdout: Mutex<BufReader<ChildStdout>>,
    /// The child process itself, held for wait/kill during shutdown.
    child: Mutex<Child>,
    /// Serializes whole request/response cycles.
    request_lock: Mutex<()>,
    /// Monotonically increasing JSON-RPC request id.
    next_id: AtomicU64,
    /// Whether the child is believed to still be running.
    alive: AtomicBool,
    /// Recent stderr lines and transport errors.
    history: Arc<Mutex<ErrorHistory>>,
    /// Per-call deadline.
    timeout: Duration,
}

impl StdioConnection {
    /// Spawns the child process declared by `entry.config`, performs the MCP
    /// `initialize` handshake, and returns a ready connection.
    ///
    /// # Errors
    ///
    /// Returns [`ToolServerError::Unreachable`] when the process cannot be
    /// spawned or its pipes cannot be captured, or when the initialize
    /// handshake fails.
    pub async fn spawn(entry: &CatalogEntry) -> Result<Self, ToolServerError> {
        let config: StdioConfig = serde_json::from_value(entry.config.clone())
            .map_err(|error| ToolServerError::Unreachable(format!("invalid stdio config: {error}")))?;

        let mut command = tokio::process::Command::new(&config.command);
        command
            .args(&config.args)
            .env_clear()
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        for key in ENV_WHITELIST {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }
        for (key, value) in &config.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|error| ToolServerError::Unreachable(format!("failed to spawn '{}': {error}", config.command)))?;

        let stdin = child.stdin.take().ok_or_else(|| ToolServerError::Unreachable("child stdin not captured".to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| ToolServerError::Unreachable("child stdout not captured".to_string()))?;
        let stderr = child.stderr.take();

        let history = Arc::new(Mutex::new(ErrorHistory::new(ERROR_HISTORY_CAPACITY)));
        if let Some(stderr) = stderr {
            spawn_stderr_drain(stderr, Arc::clone(&history));
        }

        let timeout = config.timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_TIMEOUT);

        let connection = Self {
            catalog_entry_id: entry.id.clone(),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            request_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            history,
            timeout,
        };

        connection.initialize().await?;
        Ok(connection)
    }

    async fn initialize(&self) -> Result<(), ToolServerError> {
        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ambassador_client_info(),
        };
        self.call("initialize", Some(serde_json::to_value(params).unwrap_or(Value::Null))).await?;
        Ok(())
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn write_line(&self, json: &str) -> Result<(), ToolServerError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ToolServerError::Unreachable("process has exited".to_string()));
        }
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await.map_err(|error| ToolServerError::Unreachable(error.to_string()))?;
        stdin.write_all(b"\n").await.map_err(|error| ToolServerError::Unreachable(error.to_string()))?;
        stdin.flush().await.map_err(|error| ToolServerError::Unreachable(error.to_string()))
    }

    async fn read_line(&self) -> Result<String, ToolServerError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ToolServerError::Unreachable("process has exited".to_string()));
        }
        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let bytes_read = stdout
                .read_line(&mut line)
                .await
                .map_err(|error| ToolServerError::Unreachable(error.to_string()))?;
            if bytes_read == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(ToolServerError::Unreachable("process closed stdout".to_string()));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') {
                return Ok(trimmed.to_string());
            }
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                self.alive.store(false, Ordering::SeqCst);
                return Err(ToolServerError::Protocol("too many non-JSON lines on stdout".to_string()));
            }
        }
    }

    async fn record_error(&self, message: String) {
        self.history.lock().await.push_error(message);
    }

    /// Sends a JSON-RPC request and waits for the matching response, bounded
    /// by this connection's configured timeout.
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, ToolServerError> {
        let _guard = self.request_lock.lock().await;
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request).map_err(|error| ToolServerError::Protocol(error.to_string()))?;

        if let Err(error) = self.write_line(&line).await {
            self.record_error(error.to_string()).await;
            return Err(error);
        }

        let outcome = tokio::time::timeout(self.timeout, async {
            loop {
                let line = self.read_line().await?;
                if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&line) {
                    if response.id == id {
                        return response.into_result().map_err(|error| ToolServerError::Protocol(error.to_string()));
                    }
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => {
                if let Err(ref error) = result {
                    self.record_error(error.to_string()).await;
                }
                result
            }
            Err(_) => {
                self.record_error("call timed out".to_string()).await;
                Err(ToolServerError::Timeout)
            }
        }
    }

    /// Returns the recent stderr lines and transport errors for this
    /// connection, for operator introspection (spec.md §4.4).
    pub async fn error_history(&self) -> ErrorHistory {
        self.history.lock().await.clone()
    }
}

fn spawn_stderr_drain(stderr: tokio::process::ChildStderr, history: Arc<Mutex<ErrorHistory>>) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        history.lock().await.push_line(trimmed.to_string());
                    }
                }
            }
        }
    });
}

#[async_trait]
impl ToolServerConnection for StdioConnection {
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
        if !self.alive.load(Ordering::SeqCst) {
            return ConnectionHealth::Unhealthy;
        }
        match self.call("ping", None).await {
            Ok(_) => ConnectionHealth::Healthy,
            Err(_) => ConnectionHealth::Unhealthy,
        }
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }
        let wait = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
        if wait.is_err() {
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;
    use ambassador_core::AuthType;
    use ambassador_core::CatalogEntryId;
    use ambassador_core::IsolationMode;
    use ambassador_core::PublicationStatus;
    use ambassador_core::TransportKind;

    fn entry_with_config(config: Value) -> CatalogEntry {
        CatalogEntry {
            id: CatalogEntryId::generate(),
            name: "echo".to_string(),
            transport: TransportKind::Stdio,
            config,
            isolation: IsolationMode::PerUser,
            requires_user_credentials: false,
            credential_schema: None,
            auth_type: AuthType::None,
            oauth_config: None,
            publication_status: PublicationStatus::Published,
            validated: true,
        }
    }

    #[tokio::test]
    async fn spawn_rejects_malformed_config() {
        let entry = entry_with_config(serde_json::json!({"not_command": true}));
        let result = StdioConnection::spawn(&entry).await;
        assert!(matches!(result, Err(ToolServerError::Unreachable(_))));
    }

    #[tokio::test]
    async fn spawn_rejects_unresolvable_command() {
        let entry = entry_with_config(serde_json::json!({"command": "this-binary-does-not-exist-anywhere"}));
        let result = StdioConnection::spawn(&entry).await;
        assert!(matches!(result, Err(ToolServerError::Unreachable(_))));
    }
}
