//! crates/twin_capture_core/src/recorder.rs
//!
//! Drives the audio capture and delivery collaborators from the recorder's view
//! of the session. The status transitions are authoritative: capture follows
//! them, and a failed delivery never moves the session out of `finished`.

use crate::client::{ClientSnapshot, SessionView};
use crate::domain::DeliveryReceipt;
use crate::ports::{AudioCapture, DeliveryService};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What happened as a result of one observed transition. Reported to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderOutcome {
    CaptureStarted {
        session_id: Uuid,
    },
    CaptureFailed {
        session_id: Uuid,
        error: String,
    },
    Delivered {
        session_id: Uuid,
        duration_seconds: u64,
        receipt: DeliveryReceipt,
    },
    DeliveryFailed {
        session_id: Uuid,
        error: String,
    },
}

pub struct RecorderAgent {
    capture: Arc<dyn AudioCapture>,
    delivery: Arc<dyn DeliveryService>,
    capturing: Option<Uuid>,
    /// The latest session whose recording was handed off or abandoned. A client
    /// follows one session at a time, so only the latest needs remembering.
    last_handled: Option<Uuid>,
}

impl RecorderAgent {
    pub fn new(capture: Arc<dyn AudioCapture>, delivery: Arc<dyn DeliveryService>) -> Self {
        Self {
            capture,
            delivery,
            capturing: None,
            last_handled: None,
        }
    }

    /// Reacts to one observed view. Each session is captured and delivered at most once.
    pub async fn observe(&mut self, view: &SessionView) -> Option<RecorderOutcome> {
        match view {
            SessionView::Recording(session)
                if self.capturing.is_none() && self.last_handled != Some(session.id) =>
            {
                let session_id = session.id;
                match self.capture.start().await {
                    Ok(()) => {
                        info!(%session_id, "Audio capture started");
                        self.capturing = Some(session_id);
                        Some(RecorderOutcome::CaptureStarted { session_id })
                    }
                    Err(e) => {
                        error!(%session_id, "Failed to start audio capture: {}", e);
                        self.last_handled = Some(session_id);
                        Some(RecorderOutcome::CaptureFailed {
                            session_id,
                            error: e.to_string(),
                        })
                    }
                }
            }
            SessionView::Finished(session) if self.capturing == Some(session.id) => {
                let session_id = session.id;
                self.capturing = None;
                self.last_handled = Some(session_id);

                let artifact = match self.capture.stop().await {
                    Ok(artifact) => artifact,
                    Err(e) => {
                        error!(%session_id, "Failed to stop audio capture: {}", e);
                        return Some(RecorderOutcome::CaptureFailed {
                            session_id,
                            error: e.to_string(),
                        });
                    }
                };

                let duration_seconds = session.recording_duration_secs().unwrap_or(0);
                let timestamp = session.recording_ended_at.unwrap_or_else(Utc::now);
                info!(%session_id, duration_seconds, bytes = artifact.data.len(), "Delivering recording");

                match self
                    .delivery
                    .deliver(&artifact, duration_seconds, timestamp)
                    .await
                {
                    Ok(receipt) => Some(RecorderOutcome::Delivered {
                        session_id,
                        duration_seconds,
                        receipt,
                    }),
                    Err(e) => {
                        error!(%session_id, "Delivery failed: {}", e);
                        Some(RecorderOutcome::DeliveryFailed {
                            session_id,
                            error: e.to_string(),
                        })
                    }
                }
            }
            // The view can skip `recording` entirely when both transitions land
            // between two observations.
            SessionView::Finished(session)
                if self.capturing.is_none() && self.last_handled != Some(session.id) =>
            {
                let session_id = session.id;
                warn!(%session_id, "Recording finished before capture started");
                self.last_handled = Some(session_id);
                Some(RecorderOutcome::CaptureFailed {
                    session_id,
                    error: "recording finished before capture started".to_string(),
                })
            }
            SessionView::Uninitialized => {
                if let Some(session_id) = self.capturing.take() {
                    warn!(%session_id, "Disconnected while capturing, discarding audio");
                    self.last_handled = Some(session_id);
                    if let Err(e) = self.capture.stop().await {
                        warn!(%session_id, "Failed to stop audio capture: {}", e);
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// Follows a client's view until cancelled or until the client goes away.
    pub async fn run(
        mut self,
        mut views: watch::Receiver<ClientSnapshot>,
        cancel: CancellationToken,
        outcomes: mpsc::Sender<RecorderOutcome>,
    ) {
        loop {
            let view = views.borrow_and_update().view.clone();
            if let Some(outcome) = self.observe(&view).await {
                if outcomes.send(outcome).await.is_err() {
                    break;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = views.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
