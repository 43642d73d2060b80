// ambassador-cli/src/routes.rs
// ============================================================================
// Module: HTTPS Route Handlers
// Description: Axum handlers for the session-register, tool-catalog,
//              tool-invoke, heartbeat, connection-teardown, OAuth, and
//              health endpoints.
// Purpose: Translate wire requests into calls against AppState's components
//          and map every component error onto the closed public error
//          taxonomy, never leaking an internal cause to the caller.
// Dependencies: ambassador-core, ambassador-orchestrator, ambassador-oauth,
//               ambassador-providers, ambassador-store-sqlite, axum, serde_json
// ============================================================================

//! ## Overview
//! Every handler here authenticates via the `Authorization: Bearer <session
//! token>` header (the client's preshared key only ever appears in the
//! registration body) and maps errors through [`ApiError`], which carries
//! nothing but an [`ErrorKind`] and an internal detail string that is never
//! echoed to the caller. `POST /v1/tools/invoke` delegates its whole
//! request path to [`ambassador_orchestrator::Pipeline::invoke`]; every
//! other handler authenticates the session itself since no other pipeline
//! stage applies to it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::Ordering;

use ambassador_core::AuthNError;
use ambassador_core::AuthZProvider;
use ambassador_core::CatalogEntryId;
use ambassador_core::Connection;
use ambassador_core::ConnectionId;
use ambassador_core::ConnectionStatus;
use ambassador_core::ErrorKind;
use ambassador_core::IsolationMode;
use ambassador_core::PresentedCredential;
use ambassador_core::PublicationStatus;
use ambassador_core::Session;
use ambassador_core::SessionId;
use ambassador_core::Timestamp;
use ambassador_core::UserId;
use ambassador_oauth::OAuthConfig;
use ambassador_oauth::OAuthError;
use ambassador_orchestrator::PipelineError;
use ambassador_orchestrator::generate_session_token;
use ambassador_orchestrator::session_auth::SessionAuthError;
use ambassador_orchestrator::session_auth::verify_session_token;
use ambassador_store_sqlite::StoreError;
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::Request;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Redirect;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use std::net::SocketAddr;

use crate::state::AppState;
use crate::state::RateLimitDecision;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// API version reported in every `GET /v1/tools` response.
const API_VERSION: &str = "1";
/// Maximum accepted request body size, applied before any JSON parsing.
const MAX_BODY_BYTES: usize = 1024 * 1024;
/// Maximum accepted length of the `Authorization` header.
const MAX_AUTH_HEADER_BYTES: usize = 4096;

// ============================================================================
// SECTION: Public Error Mapping
// ============================================================================

/// One error that has crossed an HTTP boundary, carrying the closed public
/// taxonomy plus an internal-only detail string (I-6: never echoed back).
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    detail: String,
    retry_after_ms: Option<u64>,
}

impl ApiError {
    fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into(), retry_after_ms: None }
    }

    fn rate_limited(retry_after_ms: u64) -> Self {
        Self { kind: ErrorKind::RateLimited, detail: "rate limited".to_string(), retry_after_ms: Some(retry_after_ms) }
    }

    const fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden | ErrorKind::ProviderNotAllowed | ErrorKind::ProviderInvalid => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ServiceUnavailable | ErrorKind::ProviderUnhealthy => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::ResourceLimitExceeded => StatusCode::INSUFFICIENT_STORAGE,
            ErrorKind::InvalidOAuthState => StatusCode::BAD_REQUEST,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::DecryptionFailed | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "code": self.kind.public_code(),
                "message": self.kind.public_message(),
            }
        }));
        let mut response = (status, body).into_response();
        if let Some(retry_after_ms) = self.retry_after_ms {
            let retry_after_seconds = retry_after_ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        let kind = match error {
            PipelineError::Unauthorized => ErrorKind::Unauthorized,
            PipelineError::Forbidden => ErrorKind::Forbidden,
            PipelineError::NotFound => ErrorKind::NotFound,
            PipelineError::InvalidArguments(_) => ErrorKind::Validation,
            PipelineError::ToolServer(_) => ErrorKind::ServiceUnavailable,
            PipelineError::Internal(_) => ErrorKind::Internal,
        };
        Self::new(kind, error.to_string())
    }
}

impl From<SessionAuthError> for ApiError {
    fn from(error: SessionAuthError) -> Self {
        Self::new(ErrorKind::Unauthorized, error.to_string())
    }
}

impl From<AuthNError> for ApiError {
    fn from(error: AuthNError) -> Self {
        Self::new(ErrorKind::Unauthorized, error.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => Self::new(ErrorKind::NotFound, "not found".to_string()),
            StoreError::Conflict(detail) => Self::new(ErrorKind::Conflict, detail),
            other => Self::new(ErrorKind::Internal, other.to_string()),
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(error: OAuthError) -> Self {
        let kind = match error {
            OAuthError::UnknownOrExpiredState => ErrorKind::InvalidOAuthState,
            OAuthError::NoCredential => ErrorKind::NotFound,
            OAuthError::Credential(_) | OAuthError::ReservedParameter(_) => ErrorKind::Validation,
            OAuthError::TokenEndpoint(_) | OAuthError::Request(_) | OAuthError::MalformedTokenResponse(_) => ErrorKind::ServiceUnavailable,
            OAuthError::NoVaultSalt => ErrorKind::Internal,
            OAuthError::Vault(_) => ErrorKind::DecryptionFailed,
            OAuthError::Store(_) => ErrorKind::Internal,
        };
        Self::new(kind, error.to_string())
    }
}

// ============================================================================
// SECTION: Security Headers Middleware
// ============================================================================

/// Sets the fixed security headers on every response (spec.md §6): HSTS,
/// `nosniff`, frame-deny, and `no-store`.
pub async fn security_headers(request: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(axum::http::header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_static("max-age=31536000; includeSubDomains"));
    headers.insert(axum::http::header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(axum::http::header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(axum::http::header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

// ============================================================================
// SECTION: Request Parsing Helpers
// ============================================================================

/// Extracts and validates the bearer session token from `Authorization`.
fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::new(ErrorKind::Unauthorized, "missing authorization header"))?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(ApiError::new(ErrorKind::Unauthorized, "authorization header too large"));
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(ApiError::new(ErrorKind::Unauthorized, "invalid authorization header"));
    }
    Ok(token)
}

/// Authenticates the session carried by `headers`, independent of the
/// pipeline (used by every handler except tool invocation, which runs the
/// full pipeline itself).
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Session, ApiError> {
    let token = bearer_token(headers)?;
    Ok(verify_session_token(&state.store, token).await?)
}

/// Enforces [`MAX_BODY_BYTES`] and parses a JSON body, collapsing both an
/// oversized body and malformed JSON to a validation error with a
/// single-line cause (spec.md §7).
fn parse_json_body<T: for<'de> Deserialize<'de>>(bytes: &Bytes) -> Result<T, ApiError> {
    if bytes.len() > MAX_BODY_BYTES {
        return Err(ApiError::new(ErrorKind::Validation, "request body exceeds size limit"));
    }
    serde_json::from_slice(bytes).map_err(|error| ApiError::new(ErrorKind::Validation, format!("malformed request body: {error}")))
}

/// Resolves the caller's source IP for per-IP rate limiting, preferring the
/// connection's observed peer address.
fn source_ip(addr: &SocketAddr) -> String {
    addr.ip().to_string()
}

// ============================================================================
// SECTION: Session Registration
// ============================================================================

/// Body of `POST /v1/sessions/register`.
#[derive(Debug, Deserialize)]
struct RegisterRequest {
    preshared_key: String,
    friendly_name: String,
    #[serde(default)]
    host_tool: Option<String>,
}

/// Response of `POST /v1/sessions/register`.
#[derive(Debug, Serialize)]
struct RegisterResponse {
    session_token: String,
    session_id: String,
    connection_id: String,
}

/// Registers a connection for the client presenting `preshared_key`,
/// reusing and rotating the client's existing session when one is on file
/// (re-registration, spec.md §4.3/§6: the prior token stops verifying the
/// instant the new one is persisted).
async fn register_session(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<RegisterResponse>, ApiError> {
    let request: RegisterRequest = parse_json_body(&body)?;

    let authn_result = state.authn.verify(&PresentedCredential { raw_key: request.preshared_key }).await?;

    let existing = state.store.get_session_by_client(authn_result.client_id.clone()).await?;
    let now = Timestamp::now();
    let session_id = existing.as_ref().map_or_else(SessionId::generate, |session| session.id.clone());

    let (token, token_hash, token_nonce) =
        generate_session_token(&session_id).map_err(|_argon2_error| ApiError::new(ErrorKind::Internal, "failed to mint session token"))?;

    let client = state.store.get_client(authn_result.client_id.clone()).await?;
    let expires_at = now + std::time::Duration::from_secs(state.session_defaults.session_ttl_seconds);

    if let Some(session) = existing {
        state.store.replace_session_token(session.id.clone(), token_hash, token_nonce, expires_at).await?;
    } else {
        state
            .store
            .create_session(Session {
                id: session_id.clone(),
                user_id: authn_result.user_id.clone(),
                client_id: authn_result.client_id.clone(),
                token_hash,
                token_nonce,
                status: ambassador_core::SessionStatus::Active,
                profile_id: client.and_then(|client| client.profile_id),
                created_at: now,
                last_activity_at: now,
                expires_at,
                idle_timeout_seconds: state.session_defaults.idle_timeout_seconds,
                spindown_delay_seconds: state.session_defaults.spindown_delay_seconds,
            })
            .await?;
    }

    spawn_per_user_catalog(&state, &authn_result.user_id).await;

    let friendly_name = match &request.host_tool {
        Some(host_tool) => format!("{} ({host_tool})", request.friendly_name),
        None => request.friendly_name,
    };
    let connection = Connection {
        id: ConnectionId::generate(),
        session_id: session_id.clone(),
        friendly_name,
        last_heartbeat_at: now,
        status: ConnectionStatus::Connected,
    };
    let connection_id = connection.id.clone();
    state.store.create_connection(connection).await?;

    Ok(Json(RegisterResponse { session_token: token, session_id: session_id.to_string(), connection_id: connection_id.to_string() }))
}

/// Provisions `user_id`'s per-user-isolation tool servers from whichever
/// published catalog entries its groups grant access to. Best-effort: a
/// user whose tool servers fail to spawn still gets a registered session,
/// and simply sees `not_found` on a per-user tool invocation until the
/// next successful registration retries this step.
async fn spawn_per_user_catalog(state: &AppState, user_id: &UserId) {
    let Ok(groups) = state.store.list_groups_for_user(user_id.clone()).await else {
        return;
    };
    let group_ids = groups.into_iter().map(|group| group.id).collect();
    let Ok(entries) = state.store.list_catalog_entries_for_groups(group_ids).await else {
        return;
    };
    let per_user_entries: Vec<_> = entries
        .into_iter()
        .filter(|entry| entry.isolation == IsolationMode::PerUser && entry.publication_status == PublicationStatus::Published)
        .collect();
    let _ignored_spawn_failure = state.per_user_pool.spawn(user_id, &per_user_entries).await;
}

// ============================================================================
// SECTION: Tool Catalog
// ============================================================================

/// A single tool's wire representation in `GET /v1/tools`.
#[derive(Debug, Serialize)]
struct ToolSummary {
    name: String,
    description: String,
    input_schema: Value,
    metadata: ToolSummaryMetadata,
}

/// Per-tool metadata in `GET /v1/tools`.
#[derive(Debug, Serialize)]
struct ToolSummaryMetadata {
    mcp_server: String,
}

/// Response of `GET /v1/tools`.
#[derive(Debug, Serialize)]
struct ToolsResponse {
    tools: Vec<ToolSummary>,
    api_version: &'static str,
    timestamp: Timestamp,
}

/// Lists the tools the session's effective profile permits: the merged
/// shared/per-user catalog the pools currently hold for this user, filtered
/// through [`AuthZProvider::authorized_tools`] (spec.md §6, `GET /v1/tools`).
async fn list_tools(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<ToolsResponse>, ApiError> {
    let session = authenticate(&state, &headers).await?;
    let descriptors = state.router.catalog_for(&session.user_id).await;
    let descriptors = state
        .authz
        .authorized_tools(session.profile_id.as_ref(), &descriptors)
        .await
        .map_err(|error| ApiError::new(ErrorKind::Internal, error.to_string()))?;
    let tools = descriptors
        .into_iter()
        .map(|descriptor| {
            let mcp_server = descriptor.name.split('.').next().unwrap_or(descriptor.name.as_str()).to_string();
            ToolSummary { name: descriptor.name, description: descriptor.description, input_schema: descriptor.input_schema, metadata: ToolSummaryMetadata { mcp_server } }
        })
        .collect();
    Ok(Json(ToolsResponse { tools, api_version: API_VERSION, timestamp: Timestamp::now() }))
}

// ============================================================================
// SECTION: Tool Invocation
// ============================================================================

/// Body of `POST /v1/tools/invoke`.
#[derive(Debug, Deserialize)]
struct InvokeRequest {
    tool: String,
    #[serde(default)]
    arguments: Value,
}

/// Response of `POST /v1/tools/invoke`.
#[derive(Debug, Serialize)]
struct InvokeResponse {
    result: Value,
    request_id: String,
    timestamp: Timestamp,
    metadata: InvokeMetadata,
}

/// Invocation-outcome metadata; `error` is populated only when the
/// downstream tool server itself failed, recovered locally rather than
/// surfaced as a non-2xx status (spec.md §7).
#[derive(Debug, Serialize, Default)]
struct InvokeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Runs the full AAA pipeline for one tool invocation.
async fn invoke_tool(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Result<Json<InvokeResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let request: InvokeRequest = parse_json_body(&body)?;
    let request_id = ambassador_core::AuditEventId::generate().to_string();

    state.inflight.fetch_add(1, Ordering::Relaxed);
    let outcome = state.pipeline.invoke(token, &request.tool, request.arguments).await;
    state.inflight.fetch_sub(1, Ordering::Relaxed);

    let (result, error) = match outcome {
        Ok(value) => (value, None),
        Err(PipelineError::ToolServer(detail)) => (Value::Null, Some(detail)),
        Err(other) => return Err(other.into()),
    };

    Ok(Json(InvokeResponse { result, request_id, timestamp: Timestamp::now(), metadata: InvokeMetadata { error } }))
}

// ============================================================================
// SECTION: Heartbeat & Connection Teardown
// ============================================================================

/// Body of `POST /v1/sessions/heartbeat`.
#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    connection_id: String,
}

/// Refreshes a connection's heartbeat and the owning session's activity
/// timestamp, reactivating the session if it had gone idle.
async fn heartbeat(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Result<Json<Value>, ApiError> {
    let session = authenticate(&state, &headers).await?;
    let request: HeartbeatRequest = parse_json_body(&body)?;
    let connection_id = ConnectionId::new(request.connection_id);

    ensure_connection_ownership(&state, &session, &connection_id).await?;

    let now = Timestamp::now();
    state.store.update_connection_heartbeat(connection_id, now).await?;
    state.store.touch_session_activity(session.id, now).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// Marks one connection of the session's owning user as disconnected.
async fn delete_connection(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(connection_id): Path<String>) -> Result<StatusCode, ApiError> {
    let session = authenticate(&state, &headers).await?;
    let connection_id = ConnectionId::new(connection_id);
    ensure_connection_ownership(&state, &session, &connection_id).await?;
    state.store.mark_connection_disconnected(connection_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Confirms `connection_id` belongs to `session`, collapsing a mismatch to
/// the same `not_found` a nonexistent connection id would produce rather
/// than revealing that the id exists under a different session.
async fn ensure_connection_ownership(state: &AppState, session: &Session, connection_id: &ConnectionId) -> Result<(), ApiError> {
    let connections = state.store.list_connections_for_session(session.id.clone()).await?;
    if connections.iter().any(|connection| &connection.id == connection_id) {
        Ok(())
    } else {
        Err(ApiError::new(ErrorKind::NotFound, "connection not found for this session"))
    }
}

// ============================================================================
// SECTION: OAuth Surface
// ============================================================================

/// Body of `POST /v1/users/me/oauth/authorize`.
#[derive(Debug, Deserialize)]
struct OAuthAuthorizeRequest {
    catalog_entry: String,
    #[serde(default)]
    extra_params: Vec<(String, String)>,
}

/// Response of `POST /v1/users/me/oauth/authorize`.
#[derive(Debug, Serialize)]
struct OAuthAuthorizeResponse {
    authorization_url: String,
    state: String,
}

/// Resolves `name`'s catalog entry and its `oauth_config`, failing closed
/// when the entry does not exist or is not configured for OAuth2.
async fn resolve_oauth_entry(state: &AppState, name: &str) -> Result<(CatalogEntryId, OAuthConfig), ApiError> {
    let entry = state
        .store
        .get_catalog_entry_by_name(name.to_string())
        .await?
        .ok_or_else(|| ApiError::new(ErrorKind::NotFound, "catalog entry not found"))?;
    let oauth_config = entry.oauth_config.ok_or_else(|| ApiError::new(ErrorKind::Validation, "catalog entry has no oauth_config"))?;
    let config: OAuthConfig = serde_json::from_value(oauth_config).map_err(|error| ApiError::new(ErrorKind::Internal, error.to_string()))?;
    Ok((entry.id, config))
}

/// Mints an authorization URL for the session's user to connect a
/// downstream tool server's own OAuth2 login.
async fn oauth_authorize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<OAuthAuthorizeResponse>, ApiError> {
    let session = authenticate(&state, &headers).await?;
    let request: OAuthAuthorizeRequest = parse_json_body(&body)?;
    let (catalog_entry_id, config) = resolve_oauth_entry(&state, &request.catalog_entry).await?;

    let authorization_url = state
        .oauth
        .generate_authorization_url(session.user_id, catalog_entry_id, &config, &request.extra_params)
        .await?;
    let state_value = extract_state_param(&authorization_url).unwrap_or_default();
    Ok(Json(OAuthAuthorizeResponse { authorization_url, state: state_value }))
}

/// Pulls the `state` query parameter back out of a freshly minted
/// authorization URL so the caller gets it back alongside the URL without
/// [`ambassador_oauth::OAuthTokenManager`] needing a second return value.
fn extract_state_param(authorization_url: &str) -> Option<String> {
    let url = url::Url::parse(authorization_url).ok()?;
    url.query_pairs().find(|(key, _)| key == "state").map(|(_, value)| value.into_owned())
}

/// Query parameters on `GET /v1/oauth/callback`.
#[derive(Debug, Deserialize)]
struct OAuthCallbackQuery {
    state: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Completes a pending OAuth flow and always redirects to the operator's
/// portal, never to a downstream tool-server URL (spec.md §6). Rate-limited
/// per source IP since this endpoint carries no session token.
async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Redirect {
    if let RateLimitDecision::Limited { .. } = state.oauth_callback_limiter.check(&source_ip(&addr)) {
        return Redirect::to(&format!("{}?status=error&reason=rate_limited", state.oauth_portal_url));
    }

    if let Some(provider_error) = query.error {
        let _ignored_peek_failure = state.store.get_oauth_state(query.state).await;
        return Redirect::to(&format!("{}?status=error&reason={}", state.oauth_portal_url, provider_error));
    }

    let Some(code) = query.code else {
        return Redirect::to(&format!("{}?status=error&reason=missing_code", state.oauth_portal_url));
    };

    let Ok(Some(pending)) = state.store.get_oauth_state(query.state.clone()).await else {
        return Redirect::to(&format!("{}?status=error&reason=invalid_state", state.oauth_portal_url));
    };
    let Some(entry) = (match state.store.get_catalog_entry(pending.catalog_entry_id).await {
        Ok(entry) => entry,
        Err(_store_error) => None,
    }) else {
        return Redirect::to(&format!("{}?status=error&reason=invalid_state", state.oauth_portal_url));
    };
    let Some(oauth_config) = entry.oauth_config else {
        return Redirect::to(&format!("{}?status=error&reason=invalid_state", state.oauth_portal_url));
    };
    let Ok(config) = serde_json::from_value::<OAuthConfig>(oauth_config) else {
        return Redirect::to(&format!("{}?status=error&reason=invalid_state", state.oauth_portal_url));
    };

    match state.oauth.exchange_code_for_tokens(query.state, &code, &config).await {
        Ok(_) => Redirect::to(&format!("{}?status=success", state.oauth_portal_url)),
        Err(_oauth_error) => Redirect::to(&format!("{}?status=error&reason=invalid_state", state.oauth_portal_url)),
    }
}

/// Response of `GET /v1/users/me/oauth/status/:name`.
#[derive(Debug, Serialize)]
struct OAuthStatusResponse {
    status: &'static str,
}

/// Reports whether the session's user has a connected OAuth credential for
/// `name`, without revealing the credential itself.
async fn oauth_status(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(name): Path<String>) -> Result<Json<OAuthStatusResponse>, ApiError> {
    let session = authenticate(&state, &headers).await?;
    let entry = state.store.get_catalog_entry_by_name(name).await?.ok_or_else(|| ApiError::new(ErrorKind::NotFound, "catalog entry not found"))?;
    let credential = state.store.get_user_credential(session.user_id, entry.id).await?;
    let status = match credential.and_then(|credential| credential.oauth_status) {
        Some(ambassador_core::OAuthStatus::Success) => "success",
        Some(ambassador_core::OAuthStatus::Error) => "error",
        Some(ambassador_core::OAuthStatus::NotConnected) | None => "not_connected",
    };
    Ok(Json(OAuthStatusResponse { status }))
}

/// Disconnects the session's user from `name`'s OAuth credential,
/// revoking at the downstream provider on a best-effort basis.
async fn oauth_disconnect(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    let session = authenticate(&state, &headers).await?;
    let (catalog_entry_id, config) = resolve_oauth_entry(&state, &name).await?;
    state.oauth.revoke_tokens(session.user_id, catalog_entry_id, &config).await;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// SECTION: Health
// ============================================================================

/// Response of `GET /health`.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    active_sessions: usize,
    inflight_invocations: i64,
}

/// Reports aggregate, non-identifying process health (spec.md §6: no
/// topology).
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let active_sessions = state.store.list_sessions_by_status(ambassador_core::SessionStatus::Active).await.map(|sessions| sessions.len()).unwrap_or(0);
    let inflight_invocations = state.inflight.load(Ordering::Relaxed);
    let status = if inflight_invocations < 0 { "degraded" } else { "ok" };
    Json(HealthResponse { status, uptime_seconds: Timestamp::now().seconds_since(state.started_at), active_sessions, inflight_invocations })
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the full Axum router over `state`, with security headers applied
/// to every response.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/sessions/register", post(register_session))
        .route("/v1/tools", get(list_tools))
        .route("/v1/tools/invoke", post(invoke_tool))
        .route("/v1/sessions/heartbeat", post(heartbeat))
        .route("/v1/sessions/connections/{id}", delete(delete_connection))
        .route("/v1/users/me/oauth/authorize", post(oauth_authorize))
        .route("/v1/oauth/callback", get(oauth_callback))
        .route("/v1/users/me/oauth/status/{name}", get(oauth_status))
        .route("/v1/users/me/oauth/disconnect/{name}", delete(oauth_disconnect))
        .route("/health", get(health))
        .layer(axum::middleware::from_fn(security_headers))
        .with_state(state)
}
