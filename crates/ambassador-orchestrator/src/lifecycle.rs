// ambassador-orchestrator/src/lifecycle.rs
// ============================================================================
// Module: Session Lifecycle Manager
// Description: Drives session state transitions (active/idle/spinning
//              down/suspended/expired) and tears down a session's per-user
//              connections before each transition out of active (spec.md
//              §4.3).
// Purpose: Free per-user tool-server resources for sessions that have gone
//          quiet without waiting for an explicit client disconnect, while
//          letting a re-registering client resume a suspended session
//          instead of starting over.
// Dependencies: ambassador_core, ambassador_store_sqlite, crate::pool, tokio
// ============================================================================

//! ## Overview
//! Two background tasks own the state machine: [`run_evaluator`] walks
//! active and idle sessions every `evaluate_interval` (default 30s) and
//! advances each one that has gone quiet; [`run_sweeper`] walks expired
//! sessions every `sweep_interval` (default 1h) and deletes ones that
//! expired more than 24h ago. `active -> idle -> spinning_down ->
//! suspended` is collapsed into a single evaluator pass per session: the
//! moment a session is found idle past its spindown delay, its per-user
//! pool connections are terminated and it lands directly in `suspended`,
//! with one audit event per logical transition. Re-registration (moving a
//! suspended session back to active) is driven by whatever handles the
//! `POST /v1/sessions/register` call, via [`LifecycleManager::reactivate`];
//! it is not something the evaluator does on its own, since only a fresh
//! client request can indicate a suspended session should resume.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use ambassador_core::AuditEvent;
use ambassador_core::AuditSink;
use ambassador_core::Session;
use ambassador_core::SessionId;
use ambassador_core::SessionStatus;
use ambassador_core::Timestamp;
use ambassador_store_sqlite::Store;
use ambassador_store_sqlite::StoreError;
use serde_json::json;
use thiserror::Error;

use crate::pool::per_user::PerUserPool;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default interval between evaluator passes, in seconds (spec.md §4.3).
pub const DEFAULT_EVALUATE_INTERVAL_SECONDS: u64 = 30;
/// Default interval between sweeper passes, in seconds (spec.md §4.3).
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 3_600;
/// How long an expired session is retained before the sweeper deletes it,
/// in seconds (spec.md §4.3: 24h after the hard expiry cap).
pub const EXPIRED_RETENTION_SECONDS: u64 = 86_400;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors transitioning or reactivating a session.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(String),
    /// No session exists with the given id.
    #[error("session not found")]
    NotFound,
    /// The session is not in a state `reactivate` can act on.
    #[error("session is not suspended")]
    NotSuspended,
}

impl From<StoreError> for LifecycleError {
    fn from(error: StoreError) -> Self {
        Self::Store(error.to_string())
    }
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Drives session state transitions and the per-user pool teardown that
/// must precede each one (spec.md §4.3).
pub struct LifecycleManager {
    store: Arc<Store>,
    pool: Arc<PerUserPool>,
    audit: Arc<dyn AuditSink>,
}

impl LifecycleManager {
    /// Builds a manager over `store` and `pool`, auditing every transition
    /// through `audit`.
    #[must_use]
    pub fn new(store: Arc<Store>, pool: Arc<PerUserPool>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, pool, audit }
    }

    async fn audit_transition(&self, session: &Session, previous: SessionStatus, new: SessionStatus) {
        let event = AuditEvent {
            timestamp: Timestamp::now(),
            user_id: Some(session.user_id.clone()),
            client_id: Some(session.client_id.clone()),
            event_type: "session_transition".to_string(),
            detail: json!({
                "session_id": session.id.as_str(),
                "previous_status": status_label(previous),
                "new_status": status_label(new),
            }),
            outcome: "success".to_string(),
        };
        let _ignored_sink_failure = self.audit.record(event).await;
    }

    /// Evaluates one session and advances it if it has gone quiet,
    /// terminating its per-user connections before any transition out of
    /// `active` (logging termination failure but not letting it block the
    /// transition: a session that has gone idle should still be marked as
    /// such even if its pool teardown could not be confirmed).
    async fn evaluate_one(&self, session: Session) -> Result<(), LifecycleError> {
        let now = Timestamp::now();

        if session.expires_at.is_before(now) && !matches!(session.status, SessionStatus::Expired) {
            self.store.update_session_status(session.id.clone(), SessionStatus::Expired).await?;
            self.audit_transition(&session, session.status, SessionStatus::Expired).await;
            return Ok(());
        }

        match session.status {
            SessionStatus::Active => {
                let connected = self.store.count_connected_for_session(session.id.clone()).await?;
                let silent = now.seconds_since(session.last_activity_at) >= u64::from(session.idle_timeout_seconds);
                if connected == 0 || silent {
                    self.store.update_session_status(session.id.clone(), SessionStatus::Idle).await?;
                    self.audit_transition(&session, SessionStatus::Active, SessionStatus::Idle).await;
                }
            }
            SessionStatus::Idle => {
                let idle_for = now.seconds_since(session.last_activity_at);
                let threshold = session.idle_timeout_seconds + session.spindown_delay_seconds;
                if idle_for >= threshold {
                    self.audit_transition(&session, SessionStatus::Idle, SessionStatus::SpinningDown).await;
                    let _ignored_teardown_failure = self.pool.terminate(&session.user_id).await;
                    self.store.update_session_status(session.id.clone(), SessionStatus::Suspended).await?;
                    self.audit_transition(&session, SessionStatus::SpinningDown, SessionStatus::Suspended).await;
                }
            }
            SessionStatus::SpinningDown | SessionStatus::Suspended | SessionStatus::Expired => {}
        }
        Ok(())
    }

    /// Reactivates a suspended session on re-registration (spec.md §4.3).
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] when `session_id` does not
    /// exist, or [`LifecycleError::NotSuspended`] when it is not currently
    /// suspended.
    pub async fn reactivate(&self, session_id: &SessionId) -> Result<Session, LifecycleError> {
        let session = self.store.get_session(session_id.clone()).await?.ok_or(LifecycleError::NotFound)?;
        if !matches!(session.status, SessionStatus::Suspended) {
            return Err(LifecycleError::NotSuspended);
        }
        self.store.update_session_status(session_id.clone(), SessionStatus::Active).await?;
        self.store.touch_session_activity(session_id.clone(), Timestamp::now()).await?;
        self.audit_transition(&session, SessionStatus::Suspended, SessionStatus::Active).await;
        Ok(Session { status: SessionStatus::Active, last_activity_at: Timestamp::now(), ..session })
    }

    /// Runs one evaluator pass over every active and idle session.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Store`] only when listing sessions itself
    /// fails; a single session's transition failing is logged as an audit
    /// event but does not abort the pass.
    pub async fn evaluate_once(&self) -> Result<(), LifecycleError> {
        for status in [SessionStatus::Active, SessionStatus::Idle] {
            let sessions = self.store.list_sessions_by_status(status).await?;
            for session in sessions {
                let _ignored_per_session_failure = self.evaluate_one(session).await;
            }
        }
        Ok(())
    }

    /// Deletes every expired session that has been expired for more than
    /// [`EXPIRED_RETENTION_SECONDS`] (spec.md §4.3: `expired -> deleted`).
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Store`] when listing or deleting fails.
    pub async fn sweep_once(&self) -> Result<u64, LifecycleError> {
        let now = Timestamp::now();
        let mut deleted = 0u64;
        for session in self.store.list_sessions_by_status(SessionStatus::Expired).await? {
            if now.seconds_since(session.expires_at) >= EXPIRED_RETENTION_SECONDS {
                self.store.delete_session(session.id.clone()).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Idle => "idle",
        SessionStatus::SpinningDown => "spinning_down",
        SessionStatus::Suspended => "suspended",
        SessionStatus::Expired => "expired",
    }
}

// ============================================================================
// SECTION: Background Tasks
// ============================================================================

/// Runs [`LifecycleManager::evaluate_once`] on a fixed interval until the
/// process shuts down.
pub async fn run_evaluator(manager: Arc<LifecycleManager>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let _ignored_pass_failure = manager.evaluate_once().await;
    }
}

/// Runs [`LifecycleManager::sweep_once`] on a fixed interval until the
/// process shuts down.
pub async fn run_sweeper(manager: Arc<LifecycleManager>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let _ignored_pass_failure = manager.sweep_once().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;
    use ambassador_core::ClientId;
    use ambassador_core::ToolProfileId;
    use ambassador_core::UserId;
    use ambassador_providers::ProviderRegistry;
    use std::collections::BTreeSet;
    use std::time::Duration as StdDuration;

    use crate::pool::per_user::PerUserPoolLimits;
    use crate::session_auth::generate_session_token;

    fn test_pool() -> Arc<PerUserPool> {
        Arc::new(PerUserPool::new(Arc::new(ProviderRegistry::new(BTreeSet::new())), PerUserPoolLimits::default()))
    }

    struct NullAudit;

    #[async_trait::async_trait]
    impl AuditSink for NullAudit {
        async fn record(&self, _event: AuditEvent) -> Result<(), ambassador_core::AuditError> {
            Ok(())
        }

        async fn flush(&self) -> Result<(), ambassador_core::AuditError> {
            Ok(())
        }
    }

    async fn insert_session(store: &Store, status: SessionStatus, last_activity_age: StdDuration) -> Session {
        let session_id = SessionId::generate();
        let (_, hash, nonce) = generate_session_token(&session_id).expect("generates");
        let now = Timestamp::now();
        let session = Session {
            id: session_id,
            user_id: UserId::generate(),
            client_id: ClientId::generate(),
            token_hash: hash,
            token_nonce: nonce,
            status,
            profile_id: None::<ToolProfileId>,
            created_at: now,
            last_activity_at: now - last_activity_age,
            expires_at: now + StdDuration::from_secs(86_400),
            idle_timeout_seconds: 300,
            spindown_delay_seconds: 60,
        };
        store.create_session(session.clone()).await.expect("inserts");
        session
    }

    #[tokio::test]
    async fn active_session_goes_idle_after_silence() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let session = insert_session(&store, SessionStatus::Active, StdDuration::from_secs(400)).await;
        let manager = LifecycleManager::new(store.clone(), test_pool(), Arc::new(NullAudit));

        manager.evaluate_once().await.expect("evaluates");

        let updated = store.get_session(session.id).await.expect("fetches").expect("exists");
        assert_eq!(updated.status, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn idle_session_moves_straight_to_suspended_after_spindown_delay() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let session = insert_session(&store, SessionStatus::Idle, StdDuration::from_secs(10_000)).await;
        let manager = LifecycleManager::new(store.clone(), test_pool(), Arc::new(NullAudit));

        manager.evaluate_once().await.expect("evaluates");

        let updated = store.get_session(session.id).await.expect("fetches").expect("exists");
        assert_eq!(updated.status, SessionStatus::Suspended);
    }

    #[tokio::test]
    async fn reactivate_moves_suspended_session_back_to_active() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let session = insert_session(&store, SessionStatus::Suspended, StdDuration::from_secs(1)).await;
        let manager = LifecycleManager::new(store.clone(), test_pool(), Arc::new(NullAudit));

        let reactivated = manager.reactivate(&session.id).await.expect("reactivates");
        assert_eq!(reactivated.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn reactivate_rejects_a_non_suspended_session() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let session = insert_session(&store, SessionStatus::Active, StdDuration::from_secs(1)).await;
        let manager = LifecycleManager::new(store.clone(), test_pool(), Arc::new(NullAudit));

        let result = manager.reactivate(&session.id).await;
        assert!(matches!(result, Err(LifecycleError::NotSuspended)));
    }

    #[tokio::test]
    async fn hard_expiry_wins_over_any_other_transition() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let session_id = SessionId::generate();
        let (_, hash, nonce) = generate_session_token(&session_id).expect("generates");
        let now = Timestamp::now();
        let session = Session {
            id: session_id.clone(),
            user_id: UserId::generate(),
            client_id: ClientId::generate(),
            token_hash: hash,
            token_nonce: nonce,
            status: SessionStatus::Active,
            profile_id: None,
            created_at: now,
            last_activity_at: now,
            expires_at: now - StdDuration::from_secs(1),
            idle_timeout_seconds: 300,
            spindown_delay_seconds: 60,
        };
        store.create_session(session).await.expect("inserts");
        let manager = LifecycleManager::new(store.clone(), test_pool(), Arc::new(NullAudit));

        manager.evaluate_once().await.expect("evaluates");

        let updated = store.get_session(session_id).await.expect("fetches").expect("exists");
        assert_eq!(updated.status, SessionStatus::Expired);
    }
}
