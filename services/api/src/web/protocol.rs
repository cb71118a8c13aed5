//! services/api/src/web/protocol.rs
//!
//! Defines the wire representation of a session and the WebSocket message
//! protocol of the change feed endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use twin_capture_core::domain::Session;
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Session Record on the Wire
//=========================================================================================

/// The full session record, as every client receives it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct SessionDto {
    pub id: Uuid,
    pub session_code: String,
    pub controller_id: String,
    pub recorder_id: Option<String>,
    /// One of `waiting`, `connected`, `recording`, `finished`.
    pub status: String,
    pub recording_start_time: Option<DateTime<Utc>>,
    pub recording_end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Session> for SessionDto {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            session_code: session.join_code.to_string(),
            controller_id: session.controller_device_id.to_string(),
            recorder_id: session.recorder_device_id.map(|d| d.to_string()),
            status: session.status.as_str().to_string(),
            recording_start_time: session.recording_started_at,
            recording_end_time: session.recording_ended_at,
            created_at: session.created_at,
        }
    }
}

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// Text messages a client may send on the feed socket.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Asks for the current record, e.g. after the client noticed it fell behind.
    Refresh,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Text messages the server sends on the feed socket.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The current record, sent right after attaching and on every `refresh`.
    Snapshot { session: SessionDto },

    /// A committed mutation of the session.
    SessionUpdated { session: SessionDto },

    /// The feed dropped. The client's view is stale until it reconnects.
    SubscriptionLost { message: String },

    /// Reports a fatal error to the client.
    Error { message: String },
}
