//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `SessionStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{FromRow, PgPool};
use twin_capture_core::domain::{DeviceId, JoinCode, Session, SessionStatus};
use twin_capture_core::ports::{
    PortError, PortResult, SessionMatch, SessionPatch, SessionStore,
};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `SessionStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

/// One row of `recording_sessions`. Also the payload of the change notifications
/// the table's trigger emits, hence `Deserialize`.
#[derive(FromRow, Deserialize, Debug)]
pub(crate) struct SessionRecord {
    id: Uuid,
    session_code: String,
    controller_id: String,
    recorder_id: Option<String>,
    status: String,
    recording_start_time: Option<DateTime<Utc>>,
    recording_end_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub(crate) fn to_domain(self) -> PortResult<Session> {
        let status = self
            .status
            .parse::<SessionStatus>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let join_code = JoinCode::parse(&self.session_code)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Session {
            id: self.id,
            join_code,
            controller_device_id: DeviceId::new(self.controller_id),
            recorder_device_id: self.recorder_id.map(DeviceId::new),
            status,
            recording_started_at: self.recording_start_time,
            recording_ended_at: self.recording_end_time,
            created_at: self.created_at,
        })
    }
}

const SESSION_COLUMNS: &str = "id, session_code, controller_id, recorder_id, status, \
     recording_start_time, recording_end_time, created_at";

fn map_sqlx_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound("Session not found".to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => PortError::Unavailable(e.to_string()),
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// `SessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionStore for DbAdapter {
    async fn insert(&self, session: &Session) -> PortResult<Session> {
        let query = format!(
            "INSERT INTO recording_sessions \
             (id, session_code, controller_id, recorder_id, status, recording_start_time, recording_end_time, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {}",
            SESSION_COLUMNS
        );
        let record = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(session.id)
            .bind(session.join_code.as_str())
            .bind(session.controller_device_id.as_str())
            .bind(session.recorder_device_id.as_ref().map(|d| d.as_str()))
            .bind(session.status.as_str())
            .bind(session.recording_started_at)
            .bind(session.recording_ended_at)
            .bind(session.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        record.to_domain()
    }

    /// The whole compare-and-set is one `UPDATE`. The inner `SELECT … FOR UPDATE`
    /// picks a single row even when join codes collide; a concurrent writer that
    /// loses the row lock re-evaluates the status predicate and matches nothing.
    async fn conditional_update(
        &self,
        predicate: &SessionMatch,
        patch: &SessionPatch,
    ) -> PortResult<Option<Session>> {
        let query = format!(
            "UPDATE recording_sessions SET \
                 status = $1, \
                 recorder_id = COALESCE($2, recorder_id), \
                 recording_start_time = COALESCE($3, recording_start_time), \
                 recording_end_time = COALESCE($4, recording_end_time) \
             WHERE id = ( \
                 SELECT id FROM recording_sessions \
                 WHERE ($5::uuid IS NULL OR id = $5) \
                   AND ($6::text IS NULL OR session_code = $6) \
                   AND status = $7 \
                 ORDER BY created_at DESC \
                 LIMIT 1 \
                 FOR UPDATE \
             ) \
             AND status = $7 \
             RETURNING {}",
            SESSION_COLUMNS
        );
        let record = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(patch.status.as_str())
            .bind(patch.recorder_device_id.as_ref().map(|d| d.as_str()))
            .bind(patch.recording_started_at)
            .bind(patch.recording_ended_at)
            .bind(predicate.id)
            .bind(predicate.join_code.as_ref().map(|c| c.as_str()))
            .bind(predicate.status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        record.map(SessionRecord::to_domain).transpose()
    }

    async fn get(&self, id: Uuid) -> PortResult<Session> {
        let query = format!(
            "SELECT {} FROM recording_sessions WHERE id = $1",
            SESSION_COLUMNS
        );
        let record = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::NotFound(format!("Session {} not found", id)),
                other => map_sqlx_error(other),
            })?;
        record.to_domain()
    }
}
