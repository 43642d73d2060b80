// ambassador-cli/src/config.rs
// ============================================================================
// Module: Ambassador CLI Configuration
// Description: Configuration loading and validation for the ambassador
//              binary.
// Purpose: Provide strict, fail-closed config parsing with hard limits
//          before any provider, pool, or listener starts.
// Dependencies: ambassador-core, ambassador-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a single TOML file, resolved from an
//! explicit path, the `AMBASSADOR_CONFIG` environment variable, or the
//! working directory's `ambassador.toml`, in that order. The whole tree is
//! validated eagerly at [`AmbassadorConfig::load`] time so a misconfigured
//! deployment fails before binding a listener, opening the store, or
//! spawning a single downstream tool server. The vault master key is
//! resolved separately (`ambassador_vault::MasterKey::resolve`), since its
//! own priority order already covers the environment and data directory.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use ambassador_core::AuthType;
use ambassador_core::IsolationMode;
use ambassador_core::TransportKind;
use ambassador_core::ValidationOptions;
use ambassador_orchestrator::pool::per_user::PerUserPoolLimits;
use ambassador_providers::FailureMode;
use ambassador_store_sqlite::SqliteStoreConfig;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "ambassador.toml";
/// Environment variable used to override the config path.
const CONFIG_ENV_VAR: &str = "AMBASSADOR_CONFIG";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Minimum accepted session idle timeout, in seconds.
const MIN_IDLE_TIMEOUT_SECONDS: u64 = 10;
/// Maximum accepted session idle timeout, in seconds.
const MAX_IDLE_TIMEOUT_SECONDS: u64 = 86_400;
/// Maximum accepted spin-down delay, in seconds.
const MAX_SPINDOWN_DELAY_SECONDS: u64 = 86_400;
/// Minimum accepted session hard TTL, in seconds.
const MIN_SESSION_TTL_SECONDS: u64 = 300;
/// Maximum accepted session hard TTL, in seconds (24h default).
const MAX_SESSION_TTL_SECONDS: u64 = 7 * 86_400;
/// Default bind address when the config omits one.
const DEFAULT_BIND: &str = "0.0.0.0:8443";
/// Default audit log directory, relative to the data directory.
const DEFAULT_AUDIT_SUBDIR: &str = "audit";
/// Default audit log file base name.
const DEFAULT_AUDIT_BASE_NAME: &str = "ambassador-audit";
/// Default portal URL the OAuth callback redirects to once a flow settles.
const DEFAULT_OAUTH_PORTAL_URL: &str = "/";

// ============================================================================
// SECTION: Root Configuration
// ============================================================================

/// Top-level ambassador configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AmbassadorConfig {
    /// Directory holding the sqlite database, vault master key, and audit
    /// log files, unless a section overrides its own path.
    pub data_dir: PathBuf,
    /// HTTPS listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// `SQLite` store configuration.
    pub store: SqliteStoreConfig,
    /// Default session lifecycle timings applied to freshly registered
    /// sessions.
    #[serde(default)]
    pub session: SessionDefaultsConfig,
    /// Per-user tool-server pool resource limits.
    #[serde(default)]
    pub pool: PoolLimitsConfig,
    /// Audit sink configuration.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Argument validation tunables layered on top of each tool's declared
    /// schema.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Downstream tool-server catalog, seeded at startup.
    #[serde(default)]
    pub catalog: Vec<CatalogEntryConfig>,
    /// Initial users, tool profiles, and clients, since the admin
    /// provisioning surface is out of scope.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    /// Destination the OAuth callback redirects the user's browser to once
    /// a flow settles, whether it succeeded or failed. Never a tool-server
    /// URL; always the operator's own portal.
    #[serde(default = "default_oauth_portal_url")]
    pub oauth_portal_url: String,
}

impl AmbassadorConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the path cannot be resolved, the file
    /// cannot be read or exceeds [`MAX_CONFIG_FILE_SIZE`], the TOML cannot
    /// be parsed, or [`AmbassadorConfig::validate`] rejects the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes).map_err(|_utf8_error| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when any section fails validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("data_dir", &self.data_dir.to_string_lossy())?;
        self.server.validate()?;
        self.session.validate()?;
        self.pool.validate()?;
        self.audit.validate()?;
        self.validation.validate()?;

        let mut seen_names = std::collections::BTreeSet::new();
        for entry in &self.catalog {
            entry.validate()?;
            if !seen_names.insert(entry.name.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate catalog entry name: {}", entry.name)));
            }
        }
        self.bootstrap.validate()?;
        if self.oauth_portal_url.trim().is_empty() {
            return Err(ConfigError::Invalid("oauth_portal_url must be non-empty".to_string()));
        }
        Ok(())
    }

    /// Returns the path the audit sink should write under, honoring
    /// [`AuditConfig::directory`] as relative to `data_dir` unless it is
    /// already absolute.
    #[must_use]
    pub fn audit_directory(&self) -> PathBuf {
        let configured = Path::new(&self.audit.directory);
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            self.data_dir.join(configured)
        }
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// HTTPS listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address the listener binds.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Operator-facing name surfaced in `/health` and audit events.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// TLS certificate and key, required since the wire surface is
    /// HTTPS-only (no plaintext listener).
    pub tls: ServerTlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind(), server_name: default_server_name(), tls: ServerTlsConfig { cert_path: String::new(), key_path: String::new() } }
    }
}

impl ServerConfig {
    /// Validates the bind address and TLS material paths.
    fn validate(&self) -> Result<(), ConfigError> {
        let trimmed = self.bind.trim();
        let _socket_addr: SocketAddr = trimmed.parse().map_err(|_parse_error| ConfigError::Invalid(format!("server.bind is not a valid socket address: {trimmed}")))?;
        if self.server_name.trim().is_empty() {
            return Err(ConfigError::Invalid("server.server_name must be non-empty".to_string()));
        }
        self.tls.validate()
    }
}

/// TLS material for the HTTPS listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerTlsConfig {
    /// PEM-encoded certificate chain.
    pub cert_path: String,
    /// PEM-encoded private key.
    pub key_path: String,
}

impl ServerTlsConfig {
    /// Validates TLS material path strings.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("server.tls.cert_path", &self.cert_path)?;
        validate_path_string("server.tls.key_path", &self.key_path)?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Session Defaults
// ============================================================================

/// Default lifecycle timings applied to freshly registered sessions.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SessionDefaultsConfig {
    /// Seconds of connection silence before a session goes idle.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    /// Seconds idle before spin-down begins.
    #[serde(default = "default_spindown_delay_seconds")]
    pub spindown_delay_seconds: u64,
    /// Hard session lifetime from registration, after which the session
    /// expires regardless of activity.
    #[serde(default = "default_session_ttl_seconds")]
    pub session_ttl_seconds: u64,
}

impl Default for SessionDefaultsConfig {
    fn default() -> Self {
        Self { idle_timeout_seconds: default_idle_timeout_seconds(), spindown_delay_seconds: default_spindown_delay_seconds(), session_ttl_seconds: default_session_ttl_seconds() }
    }
}

impl SessionDefaultsConfig {
    /// Validates every timing is within its accepted bound.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout_range("session.idle_timeout_seconds", self.idle_timeout_seconds, MIN_IDLE_TIMEOUT_SECONDS, MAX_IDLE_TIMEOUT_SECONDS)?;
        validate_timeout_range("session.spindown_delay_seconds", self.spindown_delay_seconds, 0, MAX_SPINDOWN_DELAY_SECONDS)?;
        validate_timeout_range("session.session_ttl_seconds", self.session_ttl_seconds, MIN_SESSION_TTL_SECONDS, MAX_SESSION_TTL_SECONDS)?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Pool Limits
// ============================================================================

/// Resource limits for the per-user tool-server pool.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PoolLimitsConfig {
    /// Maximum connections any single user may hold at once.
    #[serde(default = "default_max_per_user")]
    pub max_per_user: usize,
    /// Maximum connections the pool may hold in total, across every user.
    #[serde(default = "default_max_total")]
    pub max_total: usize,
}

impl Default for PoolLimitsConfig {
    fn default() -> Self {
        Self { max_per_user: default_max_per_user(), max_total: default_max_total() }
    }
}

impl PoolLimitsConfig {
    /// Validates both limits are non-zero and internally consistent.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_per_user == 0 {
            return Err(ConfigError::Invalid("pool.max_per_user must be greater than zero".to_string()));
        }
        if self.max_total == 0 {
            return Err(ConfigError::Invalid("pool.max_total must be greater than zero".to_string()));
        }
        if self.max_per_user > self.max_total {
            return Err(ConfigError::Invalid("pool.max_per_user must not exceed pool.max_total".to_string()));
        }
        Ok(())
    }

    /// Converts to the orchestrator's resource-limit type.
    #[must_use]
    pub const fn to_pool_limits(self) -> PerUserPoolLimits {
        PerUserPoolLimits { max_per_user: self.max_per_user, max_total: self.max_total }
    }
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Whether the audit sink blocks on a write failure or buffers past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditFailureModeConfig {
    /// `record` fails the call when the write fails (fail-closed).
    #[default]
    Blocking,
    /// `record` enqueues onto a bounded ring and always succeeds
    /// (fail-open).
    Buffered,
}

impl AuditFailureModeConfig {
    /// Converts to the providers crate's runtime enum.
    #[must_use]
    pub const fn to_failure_mode(self) -> FailureMode {
        match self {
            Self::Blocking => FailureMode::Blocking,
            Self::Buffered => FailureMode::Buffered,
        }
    }
}

/// Audit sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Directory audit log files are written under, relative to `data_dir`
    /// unless absolute.
    #[serde(default = "default_audit_directory")]
    pub directory: String,
    /// Base file name; rotated files append a numeric suffix.
    #[serde(default = "default_audit_base_name")]
    pub base_name: String,
    /// Blocking vs buffered failure handling.
    #[serde(default)]
    pub mode: AuditFailureModeConfig,
    /// Override of [`ambassador_providers::audit::DEFAULT_MAX_FILE_BYTES`].
    #[serde(default)]
    pub max_file_bytes: Option<u64>,
    /// Override of [`ambassador_providers::audit::DEFAULT_MAX_AGE_SECONDS`].
    #[serde(default)]
    pub max_age_seconds: Option<u64>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { directory: default_audit_directory(), base_name: default_audit_base_name(), mode: AuditFailureModeConfig::default(), max_file_bytes: None, max_age_seconds: None }
    }
}

impl AuditConfig {
    /// Validates the directory and base name.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("audit.directory", &self.directory)?;
        if self.base_name.trim().is_empty() {
            return Err(ConfigError::Invalid("audit.base_name must be non-empty".to_string()));
        }
        if self.base_name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid("audit.base_name must not contain path separators".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Argument Validation
// ============================================================================

/// Argument-validation tunables layered on top of each tool's declared
/// schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidationConfig {
    /// Overrides every string field's cap with a single ceiling, whichever
    /// is smaller, when set.
    #[serde(default)]
    pub max_string_length: Option<usize>,
    /// Substrings that are never permitted inside a string value.
    #[serde(default)]
    pub disallow_patterns: Vec<String>,
    /// Dotted field paths redacted from the sanitized copy handed to the
    /// audit trail.
    #[serde(default)]
    pub redact_fields: Vec<String>,
}

impl ValidationConfig {
    /// Validates that a configured string-length ceiling is non-zero.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_string_length == Some(0) {
            return Err(ConfigError::Invalid("validation.max_string_length must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Converts to the core crate's runtime validation options.
    #[must_use]
    pub fn to_validation_options(&self) -> ValidationOptions {
        ValidationOptions { max_string_length: self.max_string_length, disallow_patterns: self.disallow_patterns.clone(), redact_fields: self.redact_fields.clone() }
    }
}

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// A downstream tool server seeded into the catalog at startup. The admin
/// registry-ingest surface is out of scope, so every catalog entry this
/// Ambassador ever serves is declared here.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntryConfig {
    /// Unique catalog name.
    pub name: String,
    /// Transport used to reach the server.
    pub transport: TransportKind,
    /// Process isolation mode.
    pub isolation: IsolationMode,
    /// Transport-specific configuration (command/args/env for stdio,
    /// url/headers for http/sse), passed through to the transport's own
    /// config struct.
    pub config: toml::Value,
    /// Whether invoking this server requires per-user credentials.
    #[serde(default)]
    pub requires_user_credentials: bool,
    /// JSON schema describing the credential shape, when required.
    #[serde(default)]
    pub credential_schema: Option<toml::Value>,
    /// Credential auth type.
    pub auth_type: AuthType,
    /// OAuth configuration, required when `auth_type == oauth2`.
    #[serde(default)]
    pub oauth_config: Option<toml::Value>,
}

impl CatalogEntryConfig {
    /// Validates name uniqueness preconditions and the auth/credential
    /// combination.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("catalog entry name must be non-empty".to_string()));
        }
        if self.auth_type == AuthType::OAuth2 && self.oauth_config.is_none() {
            return Err(ConfigError::Invalid(format!("catalog entry '{}' has auth_type = oauth2 but no oauth_config", self.name)));
        }
        if self.requires_user_credentials && self.auth_type == AuthType::None {
            return Err(ConfigError::Invalid(format!("catalog entry '{}' requires user credentials but declares auth_type = none", self.name)));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Bootstrap
// ============================================================================

/// Initial users, tool profiles, and clients seeded at startup, since the
/// admin provisioning surface is out of scope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BootstrapConfig {
    /// Users created if they do not already exist (matched by username).
    #[serde(default)]
    pub users: Vec<BootstrapUserConfig>,
    /// Tool profiles created if they do not already exist (matched by
    /// name).
    #[serde(default)]
    pub tool_profiles: Vec<BootstrapToolProfileConfig>,
    /// Clients created if they do not already exist (matched by key
    /// prefix).
    #[serde(default)]
    pub clients: Vec<BootstrapClientConfig>,
}

impl BootstrapConfig {
    /// Validates every bootstrap section and the cross-references between
    /// them.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut usernames = std::collections::BTreeSet::new();
        for user in &self.users {
            if user.username.trim().is_empty() {
                return Err(ConfigError::Invalid("bootstrap user username must be non-empty".to_string()));
            }
            if !usernames.insert(user.username.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate bootstrap username: {}", user.username)));
            }
        }

        let mut profile_names = std::collections::BTreeSet::new();
        for profile in &self.tool_profiles {
            profile.validate()?;
            if !profile_names.insert(profile.name.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate bootstrap tool profile name: {}", profile.name)));
            }
        }
        for profile in &self.tool_profiles {
            if let Some(parent) = &profile.parent {
                if !profile_names.contains(parent) {
                    return Err(ConfigError::Invalid(format!("tool profile '{}' has unknown parent '{parent}'", profile.name)));
                }
            }
        }

        for client in &self.clients {
            client.validate()?;
            if !usernames.contains(&client.username) {
                return Err(ConfigError::Invalid(format!("bootstrap client references unknown username '{}'", client.username)));
            }
            if let Some(profile) = &client.profile {
                if !profile_names.contains(profile) {
                    return Err(ConfigError::Invalid(format!("bootstrap client references unknown tool profile '{profile}'")));
                }
            }
        }
        Ok(())
    }
}

/// A user seeded at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapUserConfig {
    /// Unique username.
    pub username: String,
    /// Whether the user holds administrative privileges.
    #[serde(default)]
    pub is_admin: bool,
}

/// A tool profile seeded at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapToolProfileConfig {
    /// Unique profile name.
    pub name: String,
    /// Ordered allow-glob patterns.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Ordered deny-glob patterns.
    #[serde(default)]
    pub deny: Vec<String>,
    /// Optional parent profile name this profile inherits from.
    #[serde(default)]
    pub parent: Option<String>,
    /// Per-minute invocation cap.
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
    /// Per-hour invocation cap.
    #[serde(default)]
    pub rate_limit_per_hour: Option<u32>,
    /// Concurrent invocation cap.
    #[serde(default)]
    pub rate_limit_max_concurrent: Option<u32>,
}

impl BootstrapToolProfileConfig {
    /// Validates the profile name and glob pattern lengths.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("bootstrap tool profile name must be non-empty".to_string()));
        }
        for pattern in self.allow.iter().chain(self.deny.iter()) {
            if pattern.is_empty() || pattern.len() > ambassador_core::core::glob::MAX_PATTERN_LENGTH {
                return Err(ConfigError::Invalid(format!("tool profile '{}' has an invalid glob pattern: '{pattern}'", self.name)));
            }
        }
        if self.parent.as_deref() == Some(self.name.as_str()) {
            return Err(ConfigError::Invalid(format!("tool profile '{}' cannot be its own parent", self.name)));
        }
        Ok(())
    }
}

/// A client credential seeded at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapClientConfig {
    /// Username of the owning user; must appear in `bootstrap.users`.
    pub username: String,
    /// The full preshared key handed to the client out of band: an
    /// 8-byte, non-secret prefix followed by the secret remainder. Only
    /// its Argon2id hash is ever persisted.
    pub raw_key: String,
    /// Name of the tool profile this client's invocations are evaluated
    /// against; must appear in `bootstrap.tool_profiles`.
    #[serde(default)]
    pub profile: Option<String>,
    /// Optional ISO 8601 / RFC 3339 hard expiry.
    #[serde(default)]
    pub expires_at: Option<String>,
}

impl BootstrapClientConfig {
    /// Validates the username, raw key shape, and expiry format.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::Invalid("bootstrap client username must be non-empty".to_string()));
        }
        if ambassador_providers::split_key(&self.raw_key).is_none() {
            return Err(ConfigError::Invalid(format!("bootstrap client for '{}' has a raw_key shorter than the required prefix length", self.username)));
        }
        if let Some(expires_at) = &self.expires_at {
            time::OffsetDateTime::parse(expires_at, &time::format_description::well_known::Rfc3339)
                .map_err(|_parse_error| ConfigError::Invalid(format!("bootstrap client for '{}' has an invalid expires_at", self.username)))?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Path Helpers
// ============================================================================

/// Resolves the config path from an explicit override, the environment, or
/// the default filename.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a timeout-like value against inclusive bounds.
fn validate_timeout_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Invalid(format!("{field} must be between {min} and {max} seconds")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default HTTPS bind address.
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Default operator-facing server name.
fn default_server_name() -> String {
    "mcp-ambassador".to_string()
}

/// Default idle timeout, in seconds.
const fn default_idle_timeout_seconds() -> u64 {
    300
}

/// Default spin-down delay, in seconds.
const fn default_spindown_delay_seconds() -> u64 {
    60
}

/// Default hard session TTL, in seconds (24h).
const fn default_session_ttl_seconds() -> u64 {
    86_400
}

/// Default per-user connection cap.
const fn default_max_per_user() -> usize {
    20
}

/// Default process-wide connection cap.
const fn default_max_total() -> usize {
    500
}

/// Default audit directory, relative to `data_dir`.
fn default_audit_directory() -> String {
    DEFAULT_AUDIT_SUBDIR.to_string()
}

/// Default audit log base name.
fn default_audit_base_name() -> String {
    DEFAULT_AUDIT_BASE_NAME.to_string()
}

/// Default OAuth portal redirect URL.
fn default_oauth_portal_url() -> String {
    DEFAULT_OAUTH_PORTAL_URL.to_string()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
            data_dir = "/tmp/ambassador-data"

            [store]
            path = "/tmp/ambassador-data/ambassador.sqlite3"

            [server]
            bind = "127.0.0.1:8443"

            [server.tls]
            cert_path = "/tmp/ambassador-data/cert.pem"
            key_path = "/tmp/ambassador-data/key.pem"
        "#
        .to_string()
    }

    #[test]
    fn loads_a_minimal_valid_config() {
        let dir = tempfile::tempdir().expect("creates temp dir");
        let path = dir.path().join("ambassador.toml");
        fs::write(&path, minimal_toml()).expect("writes config");

        let config = AmbassadorConfig::load(Some(&path)).expect("loads");
        assert_eq!(config.server.bind, "127.0.0.1:8443");
        assert_eq!(config.pool.max_per_user, default_max_per_user());
    }

    #[test]
    fn rejects_invalid_bind_address() {
        let dir = tempfile::tempdir().expect("creates temp dir");
        let path = dir.path().join("ambassador.toml");
        let mut content = minimal_toml();
        content = content.replace("127.0.0.1:8443", "not-an-address");
        fs::write(&path, content).expect("writes config");

        let result = AmbassadorConfig::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_oversized_config_file() {
        let dir = tempfile::tempdir().expect("creates temp dir");
        let path = dir.path().join("ambassador.toml");
        let oversized = "# ".to_string() + &"x".repeat(MAX_CONFIG_FILE_SIZE + 1);
        fs::write(&path, oversized).expect("writes config");

        let result = AmbassadorConfig::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_duplicate_catalog_entry_names() {
        let dir = tempfile::tempdir().expect("creates temp dir");
        let path = dir.path().join("ambassador.toml");
        let content = minimal_toml()
            + r#"
            [[catalog]]
            name = "github"
            transport = "stdio"
            isolation = "shared"
            auth_type = "none"
            config = { command = "github-mcp-server" }

            [[catalog]]
            name = "github"
            transport = "http"
            isolation = "per_user"
            auth_type = "none"
            config = { url = "https://example.invalid" }
        "#;
        fs::write(&path, content).expect("writes config");

        let result = AmbassadorConfig::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_bootstrap_client_for_unknown_username() {
        let dir = tempfile::tempdir().expect("creates temp dir");
        let path = dir.path().join("ambassador.toml");
        let content = minimal_toml()
            + r#"
            [[bootstrap.clients]]
            username = "nobody"
            raw_key = "abcdefgh-secret-remainder"
        "#;
        fs::write(&path, content).expect("writes config");

        let result = AmbassadorConfig::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn accepts_well_formed_bootstrap_section() {
        let dir = tempfile::tempdir().expect("creates temp dir");
        let path = dir.path().join("ambassador.toml");
        let content = minimal_toml()
            + r#"
            [[bootstrap.users]]
            username = "alice"
            is_admin = true

            [[bootstrap.tool_profiles]]
            name = "default"
            allow = ["*"]

            [[bootstrap.clients]]
            username = "alice"
            raw_key = "abcdefgh-secret-remainder"
            profile = "default"
        "#;
        fs::write(&path, content).expect("writes config");

        let config = AmbassadorConfig::load(Some(&path)).expect("loads");
        assert_eq!(config.bootstrap.users.len(), 1);
        assert_eq!(config.bootstrap.clients.len(), 1);
    }
}
