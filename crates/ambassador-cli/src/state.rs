// ambassador-cli/src/state.rs
// ============================================================================
// Module: Application State
// Description: Builds every long-lived component from a validated config
//              and the resolved vault master key, and wires them together.
// Purpose: One place that owns startup order: resolve the master key, open
//          the store, build the provider registry, spawn shared tool
//          servers, seed bootstrap data, then hand the whole graph to the
//          HTTPS listener as shared, cloneable state.
// Dependencies: every library crate in this workspace, tokio
// ============================================================================

//! ## Overview
//! [`AppState::bootstrap`] is the only place outside `main` that touches
//! every crate in the workspace at once. Nothing here binds a socket; it
//! only builds in-process state so the listener in `main.rs` can start once
//! this returns `Ok`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicI64;
use std::time::Duration;
use std::time::Instant;

use ambassador_core::AuditSink;
use ambassador_core::CatalogEntry;
use ambassador_core::CatalogEntryId;
use ambassador_core::Client;
use ambassador_core::ClientId;
use ambassador_core::ClientStatus;
use ambassador_core::GlobPattern;
use ambassador_core::PublicationStatus;
use ambassador_core::RateLimit;
use ambassador_core::ToolProfile;
use ambassador_core::ToolProfileId;
use ambassador_core::Timestamp;
use ambassador_core::User;
use ambassador_core::UserId;
use ambassador_core::UserStatus;
use ambassador_orchestrator::Pipeline;
use ambassador_orchestrator::ToolRouter;
use ambassador_orchestrator::LifecycleManager;
use ambassador_orchestrator::pool::per_user::PerUserPool;
use ambassador_orchestrator::pool::shared::SharedManager;
use ambassador_oauth::OAuthTokenManager;
use ambassador_providers::FileAuditSink;
use ambassador_providers::LocalRbacAuthZ;
use ambassador_providers::PresharedKeyAuthN;
use ambassador_providers::ProviderRegistry;
use ambassador_providers::hash_secret;
use ambassador_providers::split_key;
use ambassador_store_sqlite::Store;
use ambassador_store_sqlite::StoreError;
use ambassador_vault::MasterKey;
use ambassador_vault::MasterKeyError;
use thiserror::Error;

use crate::config::AmbassadorConfig;
use crate::config::CatalogEntryConfig;
use crate::config::SessionDefaultsConfig;

// ============================================================================
// SECTION: Source-IP Rate Limiting
// ============================================================================

/// Requests allowed per window, per source IP, against the OAuth callback.
const OAUTH_CALLBACK_RATE_LIMIT_PER_WINDOW: u32 = 20;
/// Window length, in seconds, for the OAuth callback rate limit.
const OAUTH_CALLBACK_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;
/// Maximum distinct source IPs tracked before the oldest are evicted.
const OAUTH_CALLBACK_RATE_LIMIT_MAX_KEYS: usize = 10_000;

/// Fixed-window request counter keyed by an arbitrary string (the OAuth
/// callback keys this by source IP). Mirrors the request-rate guard every
/// other inbound surface in this workspace already applies at the transport
/// layer, extended here to a single HTTP route that has no other rate limit.
pub struct SourceRateLimiter {
    /// Requests allowed per window, per key.
    max_per_window: u32,
    /// Window length.
    window: Duration,
    /// Maximum distinct keys tracked before the oldest are evicted.
    max_entries: usize,
    /// Per-key window state.
    buckets: Mutex<HashMap<String, RateBucket>>,
}

/// A single key's current window count and its start time.
struct RateBucket {
    /// Requests seen in the current window.
    count: u32,
    /// When the current window started.
    window_started_at: Instant,
    /// When this key was last seen, used for eviction.
    last_seen: Instant,
}

/// Outcome of a [`SourceRateLimiter::check`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The request may proceed.
    Allow,
    /// The request is over the window's limit; retry after the given number
    /// of milliseconds.
    Limited {
        /// Milliseconds until the current window resets.
        retry_after_ms: u64,
    },
}

impl SourceRateLimiter {
    /// Builds a limiter allowing `max_per_window` requests per `window` per
    /// key, tracking at most `max_entries` distinct keys at once.
    #[must_use]
    pub fn new(max_per_window: u32, window: Duration, max_entries: usize) -> Self {
        Self { max_per_window, window, max_entries, buckets: Mutex::new(HashMap::new()) }
    }

    /// Checks and records one request against `key`'s current window.
    ///
    /// Fails open (returns [`RateLimitDecision::Allow`]) if the internal
    /// lock is poisoned, since a poisoned rate limiter must never become a
    /// denial-of-service vector for every subsequent caller.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let Ok(mut buckets) = self.buckets.lock() else {
            return RateLimitDecision::Allow;
        };

        if buckets.len() >= self.max_entries && !buckets.contains_key(key) {
            if let Some(oldest_key) = buckets.iter().min_by_key(|(_, bucket)| bucket.last_seen).map(|(oldest_key, _)| oldest_key.clone()) {
                buckets.remove(&oldest_key);
            }
        }

        let bucket = buckets.entry(key.to_string()).or_insert_with(|| RateBucket { count: 0, window_started_at: now, last_seen: now });
        bucket.last_seen = now;

        if now.duration_since(bucket.window_started_at) >= self.window {
            bucket.window_started_at = now;
            bucket.count = 0;
        }

        if bucket.count >= self.max_per_window {
            let elapsed = now.duration_since(bucket.window_started_at);
            let retry_after_ms = self.window.saturating_sub(elapsed).as_millis().try_into().unwrap_or(u64::MAX);
            return RateLimitDecision::Limited { retry_after_ms };
        }

        bucket.count += 1;
        RateLimitDecision::Allow
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failures that can occur while building [`AppState`].
#[derive(Debug, Error)]
pub enum StartupError {
    /// The vault master key could not be resolved.
    #[error("master key resolution failed: {0}")]
    MasterKey(#[from] MasterKeyError),
    /// The store could not be opened or a seed write failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// A configured provider was rejected by the registry.
    #[error("provider registry error: {0}")]
    Registry(String),
    /// A configured shared catalog entry failed to spawn.
    #[error("failed to spawn shared tool server '{0}': {1}")]
    Spawn(String, String),
    /// A catalog entry's `config` could not be converted to JSON.
    #[error("catalog entry '{0}' has an invalid transport config: {1}")]
    CatalogConfig(String, String),
    /// A bootstrap client's raw key could not be hashed.
    #[error("bootstrap client for '{0}' could not be hashed: {1}")]
    Credential(String, String),
}

// ============================================================================
// SECTION: Application State
// ============================================================================

/// Every long-lived component the HTTPS listener dispatches against.
pub struct AppState {
    /// Operator-facing name surfaced in `/health` and audit events.
    pub server_name: String,
    /// Backing persisted store.
    pub store: Arc<Store>,
    /// Resolved vault master key, used by the OAuth token manager and any
    /// future credential-vault call sites.
    pub master_key: Arc<MasterKey>,
    /// Preshared-key authenticator, used by the session-register handler.
    pub authn: Arc<PresharedKeyAuthN<Store>>,
    /// The AAA pipeline every tool invocation runs through.
    pub pipeline: Arc<Pipeline<LocalRbacAuthZ<Store>>>,
    /// Standalone handle onto the same RBAC rules `pipeline` enforces at
    /// invocation time, used to filter `GET /v1/tools` by the session's
    /// effective profile (spec.md §4.7, `listAuthorized`).
    pub authz: Arc<LocalRbacAuthZ<Store>>,
    /// Merged shared/per-user tool catalog and dispatcher.
    pub router: Arc<ToolRouter>,
    /// Session lifecycle state machine driver.
    pub lifecycle: Arc<LifecycleManager>,
    /// OAuth2 authorization-code + PKCE token manager.
    pub oauth: Arc<OAuthTokenManager>,
    /// Process-wide tool-server pool for `isolation = shared` entries.
    pub shared_manager: Arc<SharedManager>,
    /// Per-user tool-server pool for `isolation = per_user` entries.
    pub per_user_pool: Arc<PerUserPool>,
    /// Audit sink every pipeline decision is recorded to.
    pub audit: Arc<dyn AuditSink>,
    /// Wall-clock time the process started, used to compute `/health` uptime.
    pub started_at: Timestamp,
    /// Count of invocations currently executing, surfaced on `/health`.
    pub inflight: Arc<AtomicI64>,
    /// Lifecycle timings applied to freshly registered sessions.
    pub session_defaults: SessionDefaultsConfig,
    /// Destination the OAuth callback redirects to once a flow settles.
    pub oauth_portal_url: String,
    /// Per-source-IP rate limiter guarding the OAuth callback endpoint,
    /// since it is reachable without a session token or client credential.
    pub oauth_callback_limiter: Arc<SourceRateLimiter>,
}

impl AppState {
    /// Builds every component named above from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] when the master key cannot be resolved, the
    /// store cannot be opened, a configured provider or shared catalog
    /// entry is rejected, or a bootstrap write fails.
    pub async fn bootstrap(config: &AmbassadorConfig) -> Result<Arc<Self>, StartupError> {
        let master_key = Arc::new(MasterKey::resolve(&config.data_dir)?);
        let store = Arc::new(Store::open(&config.store)?);

        let audit: Arc<dyn AuditSink> = Arc::new(FileAuditSink::new(
            config.audit_directory(),
            config.audit.base_name.clone(),
            config.audit.mode.to_failure_mode(),
            config.audit.max_file_bytes.unwrap_or(ambassador_providers::DEFAULT_MAX_FILE_BYTES),
            config.audit.max_age_seconds.unwrap_or(ambassador_providers::DEFAULT_MAX_AGE_SECONDS),
        ));

        let allow_list = BTreeSet::from([
            ambassador_orchestrator::provider::STDIO_PROVIDER_NAME.to_string(),
            ambassador_orchestrator::provider::HTTP_PROVIDER_NAME.to_string(),
        ]);
        let mut registry = ProviderRegistry::new(allow_list);
        registry
            .register(Arc::new(ambassador_orchestrator::StdioProvider))
            .map_err(|error| StartupError::Registry(error.to_string()))?;
        registry
            .register(Arc::new(ambassador_orchestrator::HttpProvider))
            .map_err(|error| StartupError::Registry(error.to_string()))?;
        let registry = Arc::new(registry);

        let shared_manager = Arc::new(SharedManager::new(Arc::clone(&registry)));
        let per_user_pool = Arc::new(PerUserPool::new(Arc::clone(&registry), config.pool.to_pool_limits()));

        seed_bootstrap(&store, config).await?;
        let shared_entries = seed_catalog(&store, config).await?;

        shared_manager
            .spawn(&shared_entries)
            .await
            .map_err(|error| StartupError::Spawn("shared catalog".to_string(), error.to_string()))?;

        let router = Arc::new(ToolRouter::new(Arc::clone(&shared_manager), Arc::clone(&per_user_pool)));

        let authz = Arc::new(LocalRbacAuthZ::new((*store).clone()));
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&store),
            LocalRbacAuthZ::new((*store).clone()),
            Arc::clone(&router),
            Arc::clone(&audit),
            config.validation.to_validation_options(),
        ));

        let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&store), Arc::clone(&per_user_pool), Arc::clone(&audit)));
        let oauth = Arc::new(OAuthTokenManager::new(Arc::clone(&store), Arc::clone(&master_key)));
        let authn = Arc::new(PresharedKeyAuthN::new((*store).clone()));

        Ok(Arc::new(Self {
            server_name: config.server.server_name.clone(),
            store,
            master_key,
            authn,
            pipeline,
            authz,
            router,
            lifecycle,
            oauth,
            shared_manager,
            per_user_pool,
            audit,
            started_at: Timestamp::now(),
            inflight: Arc::new(AtomicI64::new(0)),
            session_defaults: config.session,
            oauth_portal_url: config.oauth_portal_url.clone(),
            oauth_callback_limiter: Arc::new(SourceRateLimiter::new(
                OAUTH_CALLBACK_RATE_LIMIT_PER_WINDOW,
                Duration::from_secs(OAUTH_CALLBACK_RATE_LIMIT_WINDOW_SECONDS),
                OAUTH_CALLBACK_RATE_LIMIT_MAX_KEYS,
            )),
        }))
    }
}

// ============================================================================
// SECTION: Seeding
// ============================================================================

/// Creates every configured user, tool profile, and client that does not
/// already exist, since the admin provisioning surface is out of scope.
async fn seed_bootstrap(store: &Store, config: &AmbassadorConfig) -> Result<(), StartupError> {
    let mut profile_ids = std::collections::BTreeMap::new();
    let now = Timestamp::now();

    for profile_config in &config.bootstrap.tool_profiles {
        if let Some(existing) = store.get_tool_profile_by_name(profile_config.name.clone()).await? {
            profile_ids.insert(profile_config.name.clone(), existing.id);
            continue;
        }
        let parent_id = profile_config.parent.as_ref().and_then(|parent| profile_ids.get(parent).cloned());
        let profile = ToolProfile {
            id: ToolProfileId::generate(),
            name: profile_config.name.clone(),
            allow: parse_globs(&profile_config.allow),
            deny: parse_globs(&profile_config.deny),
            rate_limit: RateLimit {
                per_minute: profile_config.rate_limit_per_minute,
                per_hour: profile_config.rate_limit_per_hour,
                max_concurrent: profile_config.rate_limit_max_concurrent,
            },
            parent_id,
        };
        let id = profile.id.clone();
        store.create_tool_profile(profile).await?;
        profile_ids.insert(profile_config.name.clone(), id);
    }

    let mut user_ids = std::collections::BTreeMap::new();
    for user_config in &config.bootstrap.users {
        if let Some(existing) = store.get_user_by_username(user_config.username.clone()).await? {
            user_ids.insert(user_config.username.clone(), existing.id);
            continue;
        }
        let user = User {
            id: UserId::generate(),
            username: user_config.username.clone(),
            is_admin: user_config.is_admin,
            status: UserStatus::Active,
            vault_salt: None,
            created_at: now,
            updated_at: now,
        };
        let id = user.id.clone();
        store.create_user(user).await?;
        user_ids.insert(user_config.username.clone(), id);
    }

    for client_config in &config.bootstrap.clients {
        let Some((prefix, secret)) = split_key(&client_config.raw_key) else {
            return Err(StartupError::Credential(client_config.username.clone(), "raw key too short".to_string()));
        };
        if store.get_client_by_key_prefix(prefix.to_string()).await?.is_some() {
            continue;
        }
        let Some(user_id) = user_ids.get(&client_config.username).cloned() else {
            return Err(StartupError::Credential(client_config.username.clone(), "unknown bootstrap user".to_string()));
        };
        let secret_hash = hash_secret(secret).map_err(|error| StartupError::Credential(client_config.username.clone(), error.to_string()))?;
        let expires_at = client_config
            .expires_at
            .as_ref()
            .map(|value| time::OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339))
            .transpose()
            .map_err(|error| StartupError::Credential(client_config.username.clone(), error.to_string()))?
            .map(Timestamp::from_offset_date_time);
        let client = Client {
            id: ClientId::generate(),
            user_id,
            key_prefix: prefix.to_string(),
            secret_hash,
            profile_id: client_config.profile.as_ref().and_then(|name| profile_ids.get(name).cloned()),
            status: ClientStatus::Active,
            expires_at,
            metadata: serde_json::Value::Null,
            created_at: now,
        };
        store.create_client(client).await?;
    }

    Ok(())
}

/// Converts configured glob pattern strings into [`GlobPattern`]s, skipping
/// any that fail to parse; [`CatalogEntryConfig::validate`] and
/// `BootstrapToolProfileConfig::validate` already reject malformed patterns
/// before this runs.
fn parse_globs(patterns: &[String]) -> Vec<GlobPattern> {
    patterns.iter().filter_map(|pattern| GlobPattern::parse(pattern).ok()).collect()
}

/// Persists every configured catalog entry that does not already exist and
/// returns the entries whose `isolation = shared`, ready to hand to
/// [`SharedManager::spawn`].
async fn seed_catalog(store: &Store, config: &AmbassadorConfig) -> Result<Vec<CatalogEntry>, StartupError> {
    let mut shared_entries = Vec::new();
    for entry_config in &config.catalog {
        let entry = if let Some(existing) = store.get_catalog_entry_by_name(entry_config.name.clone()).await? {
            existing
        } else {
            let entry = to_catalog_entry(entry_config)?;
            store.create_catalog_entry(entry.clone()).await?;
            entry
        };
        if entry.isolation == ambassador_core::IsolationMode::Shared {
            shared_entries.push(entry);
        }
    }
    Ok(shared_entries)
}

/// Converts a configured catalog entry into the domain type, translating
/// its TOML-sourced `config`/`credential_schema`/`oauth_config` values to
/// JSON.
fn to_catalog_entry(entry_config: &CatalogEntryConfig) -> Result<CatalogEntry, StartupError> {
    let config_json = toml_to_json(&entry_config.name, &entry_config.config)?;
    let credential_schema = entry_config
        .credential_schema
        .as_ref()
        .map(|value| toml_to_json(&entry_config.name, value))
        .transpose()?;
    let oauth_config = entry_config.oauth_config.as_ref().map(|value| toml_to_json(&entry_config.name, value)).transpose()?;

    Ok(CatalogEntry {
        id: CatalogEntryId::generate(),
        name: entry_config.name.clone(),
        transport: entry_config.transport,
        config: config_json,
        isolation: entry_config.isolation,
        requires_user_credentials: entry_config.requires_user_credentials,
        credential_schema,
        auth_type: entry_config.auth_type,
        oauth_config,
        publication_status: PublicationStatus::Published,
        validated: true,
    })
}

/// Converts a [`toml::Value`] into a [`serde_json::Value`], reporting the
/// owning catalog entry's name on failure.
fn toml_to_json(entry_name: &str, value: &toml::Value) -> Result<serde_json::Value, StartupError> {
    serde_json::to_value(value).map_err(|error| StartupError::CatalogConfig(entry_name.to_string(), error.to_string()))
}
