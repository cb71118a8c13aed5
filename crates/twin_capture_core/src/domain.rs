//! crates/twin_capture_core/src/domain.rs
//!
//! Defines the pure, core data structures for the pairing protocol.
//! These structs are independent of any database or serialization format.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Session Status
//=========================================================================================

/// The lifecycle of a paired session. Only ever advances, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionStatus {
    Waiting,
    Connected,
    Recording,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown session status: {0}")]
pub struct UnknownStatus(pub String);

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Connected => "connected",
            SessionStatus::Recording => "recording",
            SessionStatus::Finished => "finished",
        }
    }

    /// True once a recorder has bound to the session.
    pub fn is_connected(&self) -> bool {
        *self >= SessionStatus::Connected
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(SessionStatus::Waiting),
            "connected" => Ok(SessionStatus::Connected),
            "recording" => Ok(SessionStatus::Recording),
            "finished" => Ok(SessionStatus::Finished),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

//=========================================================================================
// Join Code
//=========================================================================================

/// Characters a join code is drawn from. Excludes `0`, `O`, `1` and `I`.
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of characters in every join code.
pub const JOIN_CODE_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid join code")]
pub struct InvalidJoinCode(pub String);

/// A short, human-typeable code used by the recorder to find a waiting session.
///
/// Codes are not unique at the storage level. The join operation only matches
/// sessions that are still `waiting`, which makes collisions harmless in practice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinCode(String);

impl JoinCode {
    /// Draws a fresh code uniformly from [`JOIN_CODE_ALPHABET`].
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..JOIN_CODE_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..JOIN_CODE_ALPHABET.len());
                JOIN_CODE_ALPHABET[idx] as char
            })
            .collect();
        Self(code)
    }

    /// Normalizes user input: surrounding whitespace is dropped and letters are uppercased.
    pub fn parse(input: &str) -> Result<Self, InvalidJoinCode> {
        let normalized = input.trim().to_ascii_uppercase();
        if normalized.len() != JOIN_CODE_LEN
            || !normalized.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(InvalidJoinCode(input.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JoinCode {
    type Err = InvalidJoinCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JoinCode::parse(s)
    }
}

//=========================================================================================
// Device Identity
//=========================================================================================

/// An opaque identifier a client process generates once for its lifetime.
///
/// It is never authenticated. It only populates the write-once binding fields and
/// lets a client tell its own mutations apart from its peer's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of a pairing a device is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Controller,
    Recorder,
}

//=========================================================================================
// Session
//=========================================================================================

/// The single shared record two paired devices coordinate through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub join_code: JoinCode,
    pub controller_device_id: DeviceId,
    pub recorder_device_id: Option<DeviceId>,
    pub status: SessionStatus,
    pub recording_started_at: Option<DateTime<Utc>>,
    pub recording_ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A fresh `waiting` session owned by `controller`.
    pub fn new(controller: DeviceId) -> Self {
        Self {
            id: Uuid::new_v4(),
            join_code: JoinCode::generate(),
            controller_device_id: controller,
            recorder_device_id: None,
            status: SessionStatus::Waiting,
            recording_started_at: None,
            recording_ended_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    pub fn is_recording(&self) -> bool {
        self.status == SessionStatus::Recording
    }

    pub fn role_of(&self, device: &DeviceId) -> Option<Role> {
        if &self.controller_device_id == device {
            Some(Role::Controller)
        } else if self.recorder_device_id.as_ref() == Some(device) {
            Some(Role::Recorder)
        } else {
            None
        }
    }

    /// Whole seconds between the start and end timestamps, once both exist.
    pub fn recording_duration_secs(&self) -> Option<u64> {
        let started = self.recording_started_at?;
        let ended = self.recording_ended_at?;
        Some((ended - started).num_seconds().max(0) as u64)
    }
}

//=========================================================================================
// Collaborator Payloads
//=========================================================================================

/// Encoded audio produced by the capture collaborator when a recording stops.
#[derive(Debug, Clone)]
pub struct AudioArtifact {
    pub data: Bytes,
    pub content_type: String,
}

/// Acknowledgement from the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn statuses_are_ordered_by_lifecycle() {
        assert!(SessionStatus::Waiting < SessionStatus::Connected);
        assert!(SessionStatus::Connected < SessionStatus::Recording);
        assert!(SessionStatus::Recording < SessionStatus::Finished);
    }

    #[test]
    fn status_round_trips_through_its_storage_name() {
        for status in [
            SessionStatus::Waiting,
            SessionStatus::Connected,
            SessionStatus::Recording,
            SessionStatus::Finished,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>(), Ok(status));
        }
        assert!("paused".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn connected_covers_every_status_after_join() {
        assert!(!SessionStatus::Waiting.is_connected());
        assert!(SessionStatus::Connected.is_connected());
        assert!(SessionStatus::Recording.is_connected());
        assert!(SessionStatus::Finished.is_connected());
    }

    #[test]
    fn generated_codes_use_the_unambiguous_alphabet() {
        for _ in 0..200 {
            let code = JoinCode::generate();
            assert_eq!(code.as_str().len(), JOIN_CODE_LEN);
            assert!(code.as_str().bytes().all(|b| JOIN_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn parse_is_case_insensitive_and_trims() {
        let code = JoinCode::parse("  x7k2qp ").unwrap();
        assert_eq!(code.as_str(), "X7K2QP");
    }

    #[test]
    fn parse_rejects_wrong_length_and_symbols() {
        assert!(JoinCode::parse("X7K2Q").is_err());
        assert!(JoinCode::parse("X7K2QPZ").is_err());
        assert!(JoinCode::parse("X7-2QP").is_err());
        assert!(JoinCode::parse("").is_err());
    }

    #[test]
    fn new_session_is_waiting_with_only_the_controller_bound() {
        let session = Session::new(DeviceId::new("dev-A"));
        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(session.controller_device_id.as_str(), "dev-A");
        assert!(session.recorder_device_id.is_none());
        assert!(session.recording_started_at.is_none());
        assert!(session.recording_ended_at.is_none());
    }

    #[test]
    fn generated_device_ids_are_distinct() {
        let a = DeviceId::generate();
        let b = DeviceId::generate();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn role_of_distinguishes_both_sides() {
        let mut session = Session::new(DeviceId::new("dev-A"));
        session.recorder_device_id = Some(DeviceId::new("dev-B"));
        assert_eq!(session.role_of(&DeviceId::new("dev-A")), Some(Role::Controller));
        assert_eq!(session.role_of(&DeviceId::new("dev-B")), Some(Role::Recorder));
        assert_eq!(session.role_of(&DeviceId::new("dev-C")), None);
    }

    #[test]
    fn duration_needs_both_timestamps() {
        let mut session = Session::new(DeviceId::new("dev-A"));
        let t0 = Utc::now();
        session.recording_started_at = Some(t0);
        assert_eq!(session.recording_duration_secs(), None);
        session.recording_ended_at = Some(t0 + Duration::seconds(95));
        assert_eq!(session.recording_duration_secs(), Some(95));
    }
}
