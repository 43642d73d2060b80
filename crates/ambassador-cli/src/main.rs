// ambassador-cli/src/main.rs
// ============================================================================
// Module: Ambassador Binary Entry Point
// Description: CLI argument parsing, config loading, startup, TLS listener
//              bind, and ordered graceful shutdown for the `ambassador`
//              binary.
// Purpose: The only place in this crate that binds a socket or installs a
//          signal handler; everything it needs is already built by
//          `AppState::bootstrap`.
// Dependencies: clap, axum-server, rustls, rustls-pemfile, tokio, every
//               library crate in this workspace (transitively, via state)
// ============================================================================

//! ## Overview
//! `main` parses CLI flags, layers them over a loaded [`AmbassadorConfig`],
//! builds [`AppState`], binds the HTTPS listener behind `rustls`, and runs
//! until `SIGINT`/`SIGTERM`. Shutdown then runs in the fixed order spec.md
//! §6 requires: stop the lifecycle/health timers, give the audit sink a
//! moment to drain, tear down every downstream tool-server connection, and
//! finally let the store close as this function returns and its last `Arc`
//! drops.

#![forbid(unsafe_code)]

/// Configuration file loading and validation.
mod config;
/// HTTP route handlers and router assembly.
mod routes;
/// Shared application state and startup wiring.
mod state;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::BufReader;
use std::io::Write as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use ambassador_core::Timestamp;
use clap::Parser;
use clap::ValueEnum;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::PrivateKeyDer;
use rustls::pki_types::PrivatePkcs1KeyDer;
use rustls::pki_types::PrivatePkcs8KeyDer;
use rustls::pki_types::PrivateSec1KeyDer;
use rustls_pemfile::Item;
use serde_json::json;
use thiserror::Error;

use crate::config::AmbassadorConfig;
use crate::config::ConfigError;
use crate::state::AppState;
use crate::state::StartupError;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Verbosity of the process-level operational log emitted to stderr as
/// JSON lines, independent of the audit trail recorded through
/// [`ambassador_core::AuditSink`] (spec.md §6: `--log-level`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevel {
    /// Only startup/shutdown failures.
    Error,
    /// Failures plus degraded conditions worth an operator's attention.
    Warn,
    /// Warnings plus the normal startup/shutdown milestones (default).
    Info,
    /// Everything `Info` logs, plus per-phase shutdown detail.
    Debug,
}

impl LogLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// MCP Ambassador: a trusted intermediary between AI-agent hosts and
/// downstream MCP tool servers.
#[derive(Parser, Debug)]
#[command(name = "ambassador", disable_help_subcommand = true)]
struct Cli {
    /// Path to the TOML configuration file (defaults to `ambassador.toml`
    /// or the `AMBASSADOR_CONFIG` environment variable).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Overrides the configured listener host.
    #[arg(long, value_name = "HOST")]
    host: Option<String>,
    /// Overrides the configured listener port.
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,
    /// Overrides the configured data directory.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    /// Overrides the configured server name surfaced in `/health` and audit
    /// events.
    #[arg(long, value_name = "NAME")]
    server_name: Option<String>,
    /// Operational log verbosity.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

/// Default HTTPS port when neither the config nor `--port` specify one
/// (spec.md §6).
const DEFAULT_PORT: u16 = 8443;

// ============================================================================
// SECTION: Process Log
// ============================================================================

/// Writes one JSON-line operational log entry to stderr if `level` is at or
/// below the process's configured verbosity, bypassing the `println!`
/// family entirely so this crate's `print_stdout`/`print_stderr` lints stay
/// meaningful for accidental debug output elsewhere.
fn log_line(configured: LogLevel, level: LogLevel, message: &str, detail: serde_json::Value) {
    if level > configured {
        return;
    }
    let line = json!({
        "timestamp": Timestamp::now().as_offset_date_time().to_string(),
        "level": level.as_str(),
        "message": message,
        "detail": detail,
    });
    let mut stderr = std::io::stderr();
    let _ignored_log_write_failure = writeln!(stderr, "{line}");
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Top-level startup failure, reported on stderr before a non-zero exit
/// (spec.md §6: exits non-zero on initialization failure).
#[derive(Debug, Error)]
enum LaunchError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// A component failed to build from the validated configuration.
    #[error("startup error: {0}")]
    Startup(#[from] StartupError),
    /// TLS certificate or key material could not be loaded.
    #[error("tls error: {0}")]
    Tls(String),
    /// The listener itself failed to bind or serve.
    #[error("listener error: {0}")]
    Listener(String),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code (spec.md §6).
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_level = cli.log_level;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log_line(log_level, LogLevel::Error, "ambassador exited with an error", json!({ "cause": error.to_string() }));
            ExitCode::FAILURE
        }
    }
}

/// Loads configuration, applies CLI overrides, builds [`AppState`], and
/// serves until shutdown.
async fn run(cli: Cli) -> Result<(), LaunchError> {
    let log_level = cli.log_level;
    let mut config = AmbassadorConfig::load(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    log_line(log_level, LogLevel::Info, "configuration loaded", json!({ "bind": config.server.bind, "server_name": config.server.server_name }));

    let state = AppState::bootstrap(&config).await?;
    log_line(log_level, LogLevel::Info, "application state bootstrapped", json!({}));

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .map_err(|_parse_error| LaunchError::Listener(format!("invalid bind address: {}", config.server.bind)))?;
    let tls_config = build_tls_config(&config.server.tls).map_err(LaunchError::Tls)?;

    let app = routes::router(Arc::clone(&state));
    let handle = axum_server::Handle::new();

    let background = spawn_background_tasks(&state, log_level);

    log_line(log_level, LogLevel::Info, "listening", json!({ "bind": addr.to_string() }));

    let serve_handle = handle.clone();
    let server = tokio::spawn(async move {
        axum_server::bind_rustls(addr, tls_config)
            .handle(serve_handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
    });

    wait_for_shutdown_signal().await;
    log_line(log_level, LogLevel::Info, "shutdown signal received", json!({}));

    shutdown(&state, background, &handle, log_level).await;

    match server.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(LaunchError::Listener(error.to_string())),
        Err(join_error) => Err(LaunchError::Listener(join_error.to_string())),
    }
}

/// Applies `--host`/`--port`/`--data-dir`/`--server-name` over whatever the
/// loaded config carries, leaving every other field untouched.
fn apply_overrides(config: &mut AmbassadorConfig, cli: &Cli) {
    if cli.host.is_some() || cli.port.is_some() {
        let existing: SocketAddr = config.server.bind.parse().unwrap_or_else(|_parse_error| SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)));
        let host = cli.host.clone().unwrap_or_else(|| existing.ip().to_string());
        let port = cli.port.unwrap_or_else(|| existing.port());
        config.server.bind = format!("{host}:{port}");
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir.clone_from(data_dir);
    }
    if let Some(server_name) = &cli.server_name {
        config.server.server_name.clone_from(server_name);
    }
}

// ============================================================================
// SECTION: TLS
// ============================================================================

/// Builds a `rustls` server config from the configured certificate/key
/// files, preferring h2 over http/1.1 (spec.md §6: HTTPS only).
fn build_tls_config(tls: &config::ServerTlsConfig) -> Result<axum_server::tls_rustls::RustlsConfig, String> {
    let _ignored_already_installed = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let certs = load_certificates(&tls.cert_path)?;
    let key = load_private_key(&tls.key_path)?;
    let mut server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|error| format!("tls config invalid: {error}"))?;
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(server_config)))
}

/// Loads a PEM-encoded certificate chain from disk.
fn load_certificates(path: &str) -> Result<Vec<CertificateDer<'static>>, String> {
    let file = File::open(path).map_err(|error| format!("tls cert open failed ({path}): {error}"))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader).map_err(|error| format!("tls cert read failed ({path}): {error}"))?;
    if certs.is_empty() {
        return Err(format!("tls cert file contains no certificates: {path}"));
    }
    Ok(certs.into_iter().map(CertificateDer::from).collect())
}

/// Loads a PEM-encoded private key from disk, accepting PKCS8, PKCS1, and
/// SEC1 encodings.
fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, String> {
    let file = File::open(path).map_err(|error| format!("tls key open failed ({path}): {error}"))?;
    let mut reader = BufReader::new(file);
    let items = rustls_pemfile::read_all(&mut reader).map_err(|error| format!("tls key read failed ({path}): {error}"))?;
    for item in items {
        match item {
            Item::PKCS8Key(key) => return Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key))),
            Item::RSAKey(key) => return Ok(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(key))),
            Item::ECKey(key) => return Ok(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(key))),
            _ => {}
        }
    }
    Err(format!("tls key file contains no private key: {path}"))
}

// ============================================================================
// SECTION: Background Tasks
// ============================================================================

/// Handles to every periodic background task, so shutdown can abort them
/// before tearing down the components they depend on.
struct BackgroundTasks {
    /// Join handles for every spawned periodic task, aborted on shutdown.
    handles: Vec<tokio::task::JoinHandle<()>>,
}

/// Spawns the session lifecycle evaluator/sweeper and the shared/per-user
/// connection health loops, plus the OAuth pending-state janitor.
fn spawn_background_tasks(state: &Arc<AppState>, log_level: LogLevel) -> BackgroundTasks {
    let mut handles = Vec::new();

    handles.push(tokio::spawn(ambassador_orchestrator::lifecycle::run_evaluator(
        Arc::clone(&state.lifecycle),
        Duration::from_secs(ambassador_orchestrator::lifecycle::DEFAULT_EVALUATE_INTERVAL_SECONDS),
    )));
    handles.push(tokio::spawn(ambassador_orchestrator::lifecycle::run_sweeper(
        Arc::clone(&state.lifecycle),
        Duration::from_secs(ambassador_orchestrator::lifecycle::DEFAULT_SWEEP_INTERVAL_SECONDS),
    )));
    handles.push(tokio::spawn(ambassador_orchestrator::pool::shared::run_health_loop(
        Arc::clone(&state.shared_manager),
        Arc::clone(&state.audit),
        Duration::from_secs(ambassador_orchestrator::pool::shared::DEFAULT_HEALTH_INTERVAL_SECONDS),
    )));
    handles.push(tokio::spawn(ambassador_orchestrator::pool::per_user::run_health_loop(
        Arc::clone(&state.per_user_pool),
        Arc::clone(&state.audit),
        Duration::from_secs(ambassador_orchestrator::pool::per_user::DEFAULT_HEALTH_INTERVAL_SECONDS),
    )));

    let oauth = Arc::clone(&state.oauth);
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(OAUTH_STATE_CLEANUP_INTERVAL_SECONDS));
        loop {
            ticker.tick().await;
            let _ignored_cleanup_failure = oauth.cleanup_expired_states().await;
        }
    }));

    log_line(log_level, LogLevel::Debug, "background tasks started", json!({ "count": handles.len() }));
    BackgroundTasks { handles }
}

/// How often expired OAuth authorization-flow state rows are swept.
const OAUTH_STATE_CLEANUP_INTERVAL_SECONDS: u64 = 300;

// ============================================================================
// SECTION: Shutdown
// ============================================================================

/// Waits for `SIGINT` or (on Unix) `SIGTERM`.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ignored_signal_error = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_signal_install_error) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Runs the ordered shutdown sequence spec.md §6 requires: stop the
/// lifecycle/health timers, give the audit sink a moment to drain, shut
/// down every downstream tool-server connection, then let the HTTPS
/// listener and store close as this function returns.
async fn shutdown(state: &Arc<AppState>, background: BackgroundTasks, handle: &axum_server::Handle, log_level: LogLevel) {
    log_line(log_level, LogLevel::Debug, "stopping lifecycle timers", json!({}));
    for task in background.handles {
        task.abort();
    }

    log_line(log_level, LogLevel::Debug, "flushing audit sink", json!({}));
    if let Err(error) = state.audit.flush().await {
        log_line(log_level, LogLevel::Warn, "audit sink did not drain cleanly", json!({ "error": error.to_string() }));
    }

    log_line(log_level, LogLevel::Debug, "shutting down downstream connections", json!({}));
    let _ignored_shared_teardown_failure = state.shared_manager.terminate().await;
    let _ignored_per_user_teardown_failure = state.per_user_pool.terminate_all().await;

    handle.graceful_shutdown(Some(Duration::from_secs(5)));

    log_line(log_level, LogLevel::Info, "store will close once this process exits", json!({}));
}
