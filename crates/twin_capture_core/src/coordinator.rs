//! crates/twin_capture_core/src/coordinator.rs
//!
//! The session coordination protocol: create, join, start and stop. Every
//! transition is a single conditional update against the [`SessionStore`], keyed
//! by the status the caller expects the session to be in.

use crate::domain::{DeviceId, JoinCode, Session, SessionStatus};
use crate::ports::{PortError, SessionMatch, SessionPatch, SessionStore};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

//=========================================================================================
// Coordinator Errors
//=========================================================================================

/// Failures surfaced to the client that initiated a coordinator operation.
/// The coordinator never retries any of them on its own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// Transient infrastructure failure. The whole operation may be retried.
    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    /// No waiting session carries this code. Retrying with the same code is pointless.
    #[error("Join code is invalid or already bound")]
    InvalidOrAlreadyBoundCode,

    /// The session was not in the status this transition starts from.
    #[error("Session {session_id} is {actual}, expected {expected}")]
    InvalidTransition {
        session_id: Uuid,
        expected: SessionStatus,
        actual: SessionStatus,
    },

    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    /// The change feed dropped. Local state is stale until a fresh record arrives.
    #[error("Subscription lost: {0}")]
    SubscriptionLost(String),
}

impl CoordinatorError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::StoreUnavailable(_) | CoordinatorError::SubscriptionLost(_)
        )
    }

    fn from_port(err: PortError, session_id: Option<Uuid>) -> Self {
        match (err, session_id) {
            (PortError::NotFound(_), Some(id)) => CoordinatorError::SessionNotFound(id),
            (PortError::SubscriptionLost(msg), _) => CoordinatorError::SubscriptionLost(msg),
            (other, _) => CoordinatorError::StoreUnavailable(other.to_string()),
        }
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

//=========================================================================================
// Commands Contract
//=========================================================================================

/// The operations a controller or recorder client may invoke.
#[async_trait]
pub trait SessionCommands: Send + Sync {
    async fn create_session(&self, controller: &DeviceId) -> CoordinatorResult<Session>;

    async fn join_session(&self, join_code: &str, recorder: &DeviceId)
        -> CoordinatorResult<Session>;

    async fn start_recording(&self, session_id: Uuid) -> CoordinatorResult<Session>;

    async fn stop_recording(&self, session_id: Uuid) -> CoordinatorResult<Session>;

    async fn get_session(&self, session_id: Uuid) -> CoordinatorResult<Session>;
}

//=========================================================================================
// The Coordinator
//=========================================================================================

#[derive(Clone)]
pub struct SessionCoordinator {
    store: Arc<dyn SessionStore>,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Runs a status-guarded transition on one session.
    ///
    /// The decision is made entirely by the store's conditional update. The follow-up
    /// read only happens after a rejected update, to say why it was rejected.
    async fn transition(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        patch: SessionPatch,
    ) -> CoordinatorResult<Session> {
        let predicate = SessionMatch::by_id(session_id, expected);
        let updated = self
            .store
            .conditional_update(&predicate, &patch)
            .await
            .map_err(|e| {
                error!(%session_id, "Conditional update failed: {}", e);
                CoordinatorError::from_port(e, Some(session_id))
            })?;

        match updated {
            Some(session) => {
                info!(%session_id, status = %session.status, "Session transitioned");
                Ok(session)
            }
            None => {
                let current = self
                    .store
                    .get(session_id)
                    .await
                    .map_err(|e| CoordinatorError::from_port(e, Some(session_id)))?;
                warn!(
                    %session_id,
                    expected = %expected,
                    actual = %current.status,
                    "Rejected transition to {}", patch.status
                );
                Err(CoordinatorError::InvalidTransition {
                    session_id,
                    expected,
                    actual: current.status,
                })
            }
        }
    }
}

#[async_trait]
impl SessionCommands for SessionCoordinator {
    async fn create_session(&self, controller: &DeviceId) -> CoordinatorResult<Session> {
        let session = Session::new(controller.clone());
        let stored = self.store.insert(&session).await.map_err(|e| {
            error!(controller = %controller, "Failed to create session: {}", e);
            CoordinatorError::StoreUnavailable(e.to_string())
        })?;
        info!(
            session_id = %stored.id,
            join_code = %stored.join_code,
            controller = %controller,
            "Session created"
        );
        Ok(stored)
    }

    async fn join_session(
        &self,
        join_code: &str,
        recorder: &DeviceId,
    ) -> CoordinatorResult<Session> {
        // A malformed code can never match a stored one.
        let code = JoinCode::parse(join_code).map_err(|_| {
            warn!(join_code, "Rejected malformed join code");
            CoordinatorError::InvalidOrAlreadyBoundCode
        })?;

        let predicate = SessionMatch::by_join_code(code.clone(), SessionStatus::Waiting);
        let patch = SessionPatch {
            recorder_device_id: Some(recorder.clone()),
            ..SessionPatch::status(SessionStatus::Connected)
        };

        let updated = self
            .store
            .conditional_update(&predicate, &patch)
            .await
            .map_err(|e| {
                error!(join_code = %code, "Join failed: {}", e);
                CoordinatorError::from_port(e, None)
            })?;

        match updated {
            Some(session) => {
                info!(
                    session_id = %session.id,
                    join_code = %code,
                    recorder = %recorder,
                    "Recorder joined session"
                );
                Ok(session)
            }
            None => {
                warn!(join_code = %code, recorder = %recorder, "No waiting session for join code");
                Err(CoordinatorError::InvalidOrAlreadyBoundCode)
            }
        }
    }

    async fn start_recording(&self, session_id: Uuid) -> CoordinatorResult<Session> {
        let patch = SessionPatch {
            recording_started_at: Some(Utc::now()),
            ..SessionPatch::status(SessionStatus::Recording)
        };
        self.transition(session_id, SessionStatus::Connected, patch)
            .await
    }

    async fn stop_recording(&self, session_id: Uuid) -> CoordinatorResult<Session> {
        let patch = SessionPatch {
            recording_ended_at: Some(Utc::now()),
            ..SessionPatch::status(SessionStatus::Finished)
        };
        self.transition(session_id, SessionStatus::Recording, patch)
            .await
    }

    async fn get_session(&self, session_id: Uuid) -> CoordinatorResult<Session> {
        self.store
            .get(session_id)
            .await
            .map_err(|e| CoordinatorError::from_port(e, Some(session_id)))
    }
}
