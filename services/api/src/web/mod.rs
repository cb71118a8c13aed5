pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the handlers so the router below and the binary can reach them easily.
pub use rest::{
    create_session_handler, deliver_recording_handler, get_session_handler,
    join_session_handler, start_recording_handler, stop_recording_handler,
};
pub use ws_handler::ws_handler;

use axum::{
    http::{header::{ACCEPT, CONTENT_TYPE}, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::web::state::AppState;

/// Builds every API route on top of the shared state.
pub fn router(app_state: Arc<AppState>) -> Router {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);
    match app_state.config.cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(_) => warn!(
            "Ignoring invalid CORS_ORIGIN '{}'",
            app_state.config.cors_origin
        ),
    }

    Router::new()
        .route("/sessions", post(create_session_handler))
        .route("/sessions/join", post(join_session_handler))
        .route("/sessions/{id}", get(get_session_handler))
        .route("/sessions/{id}/start", post(start_recording_handler))
        .route("/sessions/{id}/stop", post(stop_recording_handler))
        .route("/sessions/{id}/feed", get(ws_handler))
        .route("/deliveries", post(deliver_recording_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
