//! services/api/src/web/ws_handler.rs
//!
//! The change feed over WebSocket. A client attaches to one session and receives
//! the full record after every committed mutation, in commit order. Closing the
//! socket drops the subscription and nothing else.

use crate::web::{
    protocol::{ClientMessage, ServerMessage, SessionDto},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use twin_capture_core::domain::Session;
use twin_capture_core::ports::Subscription;
use uuid::Uuid;

/// The sending half of a feed socket, plus the newest record already sent on it.
/// Records buffered between subscribing and the first snapshot can be older than
/// that snapshot; they are never sent after it.
struct FeedSink {
    sink: SplitSink<WebSocket, Message>,
    latest: Option<Session>,
}

type WsSender = Arc<Mutex<FeedSink>>;

fn is_current(latest: Option<&Session>, incoming: &Session) -> bool {
    latest.map_or(true, |latest| incoming.status >= latest.status)
}

impl FeedSink {
    async fn send(&mut self, msg: &ServerMessage) -> bool {
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize server message: {}", e);
                return false;
            }
        };
        self.sink.send(Message::Text(json.into())).await.is_ok()
    }

    /// Sends a snapshot. One that lost a race against a forwarded update is
    /// replaced by the newer record the client already has.
    async fn send_snapshot(&mut self, session: Session) -> bool {
        let session = match &self.latest {
            Some(latest) if !is_current(Some(latest), &session) => latest.clone(),
            _ => session,
        };
        self.latest = Some(session.clone());
        let msg = ServerMessage::Snapshot {
            session: SessionDto::from(session),
        };
        self.send(&msg).await
    }

    /// Forwards a committed record unless it is behind what was already sent.
    async fn send_update(&mut self, session: Session) -> bool {
        if !is_current(self.latest.as_ref(), &session) {
            debug!(session_id = %session.id, status = %session.status, "Skipping stale feed record");
            return true;
        }
        self.latest = Some(session.clone());
        let msg = ServerMessage::SessionUpdated {
            session: SessionDto::from(session),
        };
        self.send(&msg).await
    }
}

/// The handler for upgrading HTTP requests to feed connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, session_id))
}

async fn send_snapshot(app_state: &AppState, ws_sender: &WsSender, session_id: Uuid) -> bool {
    match app_state.commands.get_session(session_id).await {
        Ok(session) => ws_sender.lock().await.send_snapshot(session).await,
        Err(e) => {
            warn!(%session_id, "Failed to load session for feed: {}", e);
            let msg = ServerMessage::Error {
                message: e.to_string(),
            };
            ws_sender.lock().await.send(&msg).await;
            false
        }
    }
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, session_id: Uuid) {
    info!(%session_id, "New feed connection");

    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(FeedSink {
        sink: sender,
        latest: None,
    }));

    // --- 1. Attach ---
    // Subscribe before reading the snapshot so no commit falls between the two.
    let subscription = match app_state.feed.subscribe(session_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(%session_id, "Failed to subscribe: {}", e);
            let msg = ServerMessage::SubscriptionLost {
                message: e.to_string(),
            };
            ws_sender.lock().await.send(&msg).await;
            return;
        }
    };
    let subscription_id = subscription.id;

    if !send_snapshot(&app_state, &ws_sender, session_id).await {
        app_state.feed.unsubscribe(subscription_id).await;
        return;
    }

    // --- 2. Forward feed events ---
    let forward_task = tokio::spawn(forward_updates(subscription, ws_sender.clone()));

    // --- 3. Client message loop ---
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Refresh) => {
                    if !send_snapshot(&app_state, &ws_sender, session_id).await {
                        break;
                    }
                }
                Err(e) => warn!("Failed to deserialize client message: {}", e),
            },
            Message::Close(_) => {
                info!(%session_id, "Client sent close message.");
                break;
            }
            _ => {}
        }
    }

    // --- 4. Cleanup ---
    app_state.feed.unsubscribe(subscription_id).await;
    forward_task.abort();
    info!(%session_id, "Feed connection closed.");
}

async fn forward_updates(mut subscription: Subscription, ws_sender: WsSender) {
    while let Some(item) = subscription.updates.next().await {
        match item {
            Ok(session) => {
                if !ws_sender.lock().await.send_update(session).await {
                    warn!("Failed to forward session update; client is gone.");
                    return;
                }
            }
            Err(e) => {
                warn!(session_id = %subscription.session_id, "Feed lost: {}", e);
                let msg = ServerMessage::SubscriptionLost {
                    message: e.to_string(),
                };
                let mut feed = ws_sender.lock().await;
                feed.send(&msg).await;
                let _ = feed.sink.send(Message::Close(None)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twin_capture_core::domain::{DeviceId, SessionStatus};

    #[test]
    fn records_behind_the_last_sent_one_are_not_current() {
        let mut connected = Session::new(DeviceId::new("dev-A"));
        connected.status = SessionStatus::Connected;
        let mut recording = connected.clone();
        recording.status = SessionStatus::Recording;

        assert!(is_current(None, &connected));
        assert!(is_current(Some(&connected), &recording));
        assert!(is_current(Some(&recording), &recording));
        assert!(!is_current(Some(&recording), &connected));
    }
}
