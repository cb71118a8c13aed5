//! crates/twin_capture_core/src/ports.rs
//!
//! Defines the service contracts (traits) the coordination core depends on.
//! These traits form the boundary of the hexagonal architecture, so the protocol
//! logic stays independent of the concrete store, feed and collaborators.

use crate::domain::{AudioArtifact, DeliveryReceipt, DeviceId, JoinCode, Session, SessionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Subscription lost: {0}")]
    SubscriptionLost(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Conditional Update Vocabulary
//=========================================================================================

/// The predicate half of a conditional update.
///
/// `status` is always part of the match. A store must apply the patch only when every
/// present field matches, and must do so as one atomic step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMatch {
    pub id: Option<Uuid>,
    pub join_code: Option<JoinCode>,
    pub status: SessionStatus,
}

impl SessionMatch {
    pub fn by_id(id: Uuid, status: SessionStatus) -> Self {
        Self {
            id: Some(id),
            join_code: None,
            status,
        }
    }

    pub fn by_join_code(join_code: JoinCode, status: SessionStatus) -> Self {
        Self {
            id: None,
            join_code: Some(join_code),
            status,
        }
    }

    pub fn matches(&self, session: &Session) -> bool {
        self.id.map_or(true, |id| session.id == id)
            && self
                .join_code
                .as_ref()
                .map_or(true, |code| &session.join_code == code)
            && session.status == self.status
    }
}

/// The write half of a conditional update. Absent fields are left untouched, so a
/// patch can never clear a write-once field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPatch {
    pub status: SessionStatus,
    pub recorder_device_id: Option<DeviceId>,
    pub recording_started_at: Option<DateTime<Utc>>,
    pub recording_ended_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status,
            recorder_device_id: None,
            recording_started_at: None,
            recording_ended_at: None,
        }
    }

    pub fn apply_to(&self, session: &mut Session) {
        session.status = self.status;
        if let Some(recorder) = &self.recorder_device_id {
            session.recorder_device_id = Some(recorder.clone());
        }
        if let Some(started) = self.recording_started_at {
            session.recording_started_at = Some(started);
        }
        if let Some(ended) = self.recording_ended_at {
            session.recording_ended_at = Some(ended);
        }
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> PortResult<Session>;

    /// Applies `patch` to the single session matching `predicate`, atomically.
    /// Returns `None` without writing anything when no session matches.
    async fn conditional_update(
        &self,
        predicate: &SessionMatch,
        patch: &SessionPatch,
    ) -> PortResult<Option<Session>>;

    async fn get(&self, id: Uuid) -> PortResult<Session>;
}

/// Identifies one live subscription on a [`ChangeFeed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Full session records in the order the store committed them. An `Err` item
/// means the subscription is gone and no further items will follow.
pub type SessionStream = Pin<Box<dyn Stream<Item = PortResult<Session>> + Send>>;

pub struct Subscription {
    pub id: SubscriptionId,
    pub session_id: Uuid,
    pub updates: SessionStream,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Attaches to every future committed mutation of one session.
    async fn subscribe(&self, session_id: Uuid) -> PortResult<Subscription>;

    /// Ends the subscription's stream. Has no effect on the stored session.
    async fn unsubscribe(&self, id: SubscriptionId);
}

#[async_trait]
pub trait AudioCapture: Send + Sync {
    async fn start(&self) -> PortResult<()>;

    /// Stops capturing and yields the encoded recording.
    async fn stop(&self) -> PortResult<AudioArtifact>;
}

#[async_trait]
pub trait DeliveryService: Send + Sync {
    /// Hands a finished recording to whoever should receive it.
    async fn deliver(
        &self,
        artifact: &AudioArtifact,
        duration_seconds: u64,
        timestamp: DateTime<Utc>,
    ) -> PortResult<DeliveryReceipt>;
}
