use api_lib::{
    adapters::{FeedHub, MemorySessionStore},
    config::Config,
    web::{self, protocol::SessionDto, rest::DeliveryResponse, state::AppState},
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use twin_capture_core::{
    AudioArtifact, DeliveryReceipt, DeliveryService, PortError, PortResult, SessionCoordinator,
};
use uuid::Uuid;

fn test_config() -> Arc<Config> {
    Arc::new(Config::from_lookup(|_| None).unwrap())
}

fn app() -> Router {
    web::router(Arc::new(AppState::in_memory(test_config(), None)))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(app: &Router, device_id: &str) -> SessionDto {
    let (status, body) = send(
        app,
        Method::POST,
        "/sessions",
        Some(json!({ "device_id": device_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    serde_json::from_value(body).unwrap()
}

#[tokio::test]
async fn session_lifecycle_over_http() {
    let app = app();
    let created = create(&app, "dev-A").await;
    assert_eq!(created.status, "waiting");
    assert_eq!(created.controller_id, "dev-A");
    assert!(created.recorder_id.is_none());

    let (status, body) = send(
        &app,
        Method::POST,
        "/sessions/join",
        Some(json!({ "join_code": created.session_code.to_lowercase(), "device_id": "dev-B" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let joined: SessionDto = serde_json::from_value(body).unwrap();
    assert_eq!(joined.status, "connected");
    assert_eq!(joined.recorder_id.as_deref(), Some("dev-B"));

    let uri = format!("/sessions/{}/start", created.id);
    let (status, body) = send(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "recording");
    assert!(!body["recording_start_time"].is_null());

    let uri = format!("/sessions/{}/stop", created.id);
    let (status, body) = send(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "finished");

    let uri = format!("/sessions/{}", created.id);
    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "finished");
    assert!(!body["recording_end_time"].is_null());
}

#[tokio::test]
async fn conflicts_are_reported_with_error_codes() {
    let app = app();
    let created = create(&app, "dev-A").await;

    let uri = format!("/sessions/{}/start", created.id);
    let (status, body) = send(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");

    let join = json!({ "join_code": created.session_code, "device_id": "dev-B" });
    let (status, _) = send(&app, Method::POST, "/sessions/join", Some(join.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::POST, "/sessions/join", Some(join)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_or_already_bound_code");
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let app = app();
    let uri = format!("/sessions/{}", Uuid::new_v4());
    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "session_not_found");
}

#[tokio::test]
async fn empty_device_id_is_a_bad_request() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/sessions",
        Some(json!({ "device_id": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn unavailable_store_maps_to_service_unavailable() {
    let config = test_config();
    let hub = Arc::new(FeedHub::new(config.feed_capacity));
    let store = Arc::new(MemorySessionStore::new(hub.clone()));
    let state = AppState {
        commands: Arc::new(SessionCoordinator::new(store.clone())),
        feed: hub,
        delivery: None,
        config,
    };
    let app = web::router(Arc::new(state));
    store.set_available(false);

    let (status, body) = send(
        &app,
        Method::POST,
        "/sessions",
        Some(json!({ "device_id": "dev-A" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "store_unavailable");
}

//=========================================================================================
// Deliveries
//=========================================================================================

struct StubDelivery {
    fail: bool,
}

#[async_trait]
impl DeliveryService for StubDelivery {
    async fn deliver(
        &self,
        artifact: &AudioArtifact,
        _duration_seconds: u64,
        _timestamp: DateTime<Utc>,
    ) -> PortResult<DeliveryReceipt> {
        assert_eq!(&artifact.data[..], b"RIFFWAVE");
        if self.fail {
            return Err(PortError::Unexpected("provider rejected the email".to_string()));
        }
        Ok(DeliveryReceipt {
            id: Some("email-42".to_string()),
        })
    }
}

fn app_with_delivery(fail: bool) -> Router {
    let delivery: Arc<dyn DeliveryService> = Arc::new(StubDelivery { fail });
    web::router(Arc::new(AppState::in_memory(test_config(), Some(delivery))))
}

fn delivery_body(audio: &str) -> Value {
    json!({
        "audio_data": audio,
        "duration": 65,
        "timestamp": "2025-01-02T10:11:12.345Z",
    })
}

#[tokio::test]
async fn delivery_succeeds_with_an_email_id() {
    let app = app_with_delivery(false);
    let audio = base64::engine::general_purpose::STANDARD.encode(b"RIFFWAVE");

    let (status, body) = send(&app, Method::POST, "/deliveries", Some(delivery_body(&audio))).await;
    assert_eq!(status, StatusCode::OK);
    let response: DeliveryResponse = serde_json::from_value(body).unwrap();
    assert!(response.success);
    assert_eq!(response.email_id.as_deref(), Some("email-42"));
}

#[tokio::test]
async fn delivery_failure_is_reported_in_the_body() {
    let app = app_with_delivery(true);
    let audio = base64::engine::general_purpose::STANDARD.encode(b"RIFFWAVE");

    let (status, body) = send(&app, Method::POST, "/deliveries", Some(delivery_body(&audio))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let response: DeliveryResponse = serde_json::from_value(body).unwrap();
    assert!(!response.success);
    assert!(response.error.is_some());
}

#[tokio::test]
async fn delivery_rejects_invalid_audio() {
    let app = app_with_delivery(false);
    let (status, body) = send(
        &app,
        Method::POST,
        "/deliveries",
        Some(delivery_body("not base64!!")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn delivery_without_a_provider_is_unavailable() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/deliveries",
        Some(delivery_body("UklGRg==")),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "delivery_disabled");
}
