//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::{ApiError, ErrorBody};
use crate::web::{protocol::SessionDto, state::AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use twin_capture_core::domain::{AudioArtifact, DeviceId};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_session_handler,
        join_session_handler,
        get_session_handler,
        start_recording_handler,
        stop_recording_handler,
        deliver_recording_handler,
    ),
    components(
        schemas(
            SessionDto,
            CreateSessionRequest,
            JoinSessionRequest,
            DeliveryRequest,
            DeliveryResponse,
            ErrorBody,
        )
    ),
    tags(
        (name = "Twin Capture API", description = "Pairs a controller and a recorder device and coordinates their recording session.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request and Response Structs
//=========================================================================================

/// Sent by the controller to open a new session.
#[derive(Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    pub device_id: String,
}

/// Sent by the recorder to bind itself to a waiting session.
#[derive(Deserialize, ToSchema)]
pub struct JoinSessionRequest {
    pub join_code: String,
    pub device_id: String,
}

/// A finished recording to be emailed.
#[derive(Deserialize, ToSchema)]
pub struct DeliveryRequest {
    /// Base64 encoded WAV audio.
    pub audio_data: String,
    /// Length of the recording in seconds.
    pub duration: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct DeliveryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn parse_device_id(raw: &str) -> Result<DeviceId, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest("device_id must not be empty".to_string()));
    }
    Ok(DeviceId::new(trimmed))
}

//=========================================================================================
// Session Handlers
//=========================================================================================

/// Create a new session as its controller.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created and waiting for a recorder", body = SessionDto),
        (status = 400, description = "Missing device id", body = ErrorBody),
        (status = 503, description = "Session store unavailable", body = ErrorBody)
    )
)]
pub async fn create_session_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let controller = parse_device_id(&req.device_id)?;
    let session = app_state.commands.create_session(&controller).await?;
    Ok((StatusCode::CREATED, Json(SessionDto::from(session))))
}

/// Join a waiting session as its recorder.
#[utoipa::path(
    post,
    path = "/sessions/join",
    request_body = JoinSessionRequest,
    responses(
        (status = 200, description = "Recorder bound; session is connected", body = SessionDto),
        (status = 409, description = "Code unknown or already bound", body = ErrorBody),
        (status = 503, description = "Session store unavailable", body = ErrorBody)
    )
)]
pub async fn join_session_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<JoinSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let recorder = parse_device_id(&req.device_id)?;
    let session = app_state
        .commands
        .join_session(&req.join_code, &recorder)
        .await?;
    Ok(Json(SessionDto::from(session)))
}

/// Read the current session record.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    params(("id" = Uuid, Path, description = "The session id.")),
    responses(
        (status = 200, description = "The current record", body = SessionDto),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn get_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = app_state.commands.get_session(id).await?;
    Ok(Json(SessionDto::from(session)))
}

/// Move a connected session to `recording`.
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    params(("id" = Uuid, Path, description = "The session id.")),
    responses(
        (status = 200, description = "Recording started", body = SessionDto),
        (status = 404, description = "No such session", body = ErrorBody),
        (status = 409, description = "Session is not connected", body = ErrorBody)
    )
)]
pub async fn start_recording_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = app_state.commands.start_recording(id).await?;
    Ok(Json(SessionDto::from(session)))
}

/// Move a recording session to `finished`.
#[utoipa::path(
    post,
    path = "/sessions/{id}/stop",
    params(("id" = Uuid, Path, description = "The session id.")),
    responses(
        (status = 200, description = "Recording finished", body = SessionDto),
        (status = 404, description = "No such session", body = ErrorBody),
        (status = 409, description = "Session is not recording", body = ErrorBody)
    )
)]
pub async fn stop_recording_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = app_state.commands.stop_recording(id).await?;
    Ok(Json(SessionDto::from(session)))
}

//=========================================================================================
// Delivery Handler
//=========================================================================================

/// Email a finished recording.
///
/// A failed delivery is reported in the body; it has no effect on any session.
#[utoipa::path(
    post,
    path = "/deliveries",
    request_body = DeliveryRequest,
    responses(
        (status = 200, description = "Recording sent", body = DeliveryResponse),
        (status = 400, description = "Audio is not valid base64", body = ErrorBody),
        (status = 500, description = "The email provider failed", body = DeliveryResponse),
        (status = 503, description = "Delivery is not configured", body = ErrorBody)
    )
)]
pub async fn deliver_recording_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<DeliveryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let delivery = app_state
        .delivery
        .as_ref()
        .ok_or(ApiError::DeliveryDisabled)?;

    let audio = base64::engine::general_purpose::STANDARD
        .decode(req.audio_data.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("audio_data is not valid base64: {}", e)))?;
    info!(duration = req.duration, bytes = audio.len(), "Delivering recording");

    let artifact = AudioArtifact {
        data: Bytes::from(audio),
        content_type: "audio/wav".to_string(),
    };

    match delivery.deliver(&artifact, req.duration, req.timestamp).await {
        Ok(receipt) => Ok((
            StatusCode::OK,
            Json(DeliveryResponse {
                success: true,
                message: Some("Email enviado com sucesso!".to_string()),
                email_id: receipt.id,
                error: None,
            }),
        )),
        Err(e) => {
            error!("Failed to deliver recording: {:?}", e);
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DeliveryResponse {
                    success: false,
                    message: None,
                    email_id: None,
                    error: Some(e.to_string()),
                }),
            ))
        }
    }
}
