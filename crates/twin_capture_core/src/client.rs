//! crates/twin_capture_core/src/client.rs
//!
//! The client side of the protocol, shared by the controller and the recorder.
//!
//! A [`SessionClient`] keeps a local [`SessionView`] of its session. The view is fed by
//! the change feed: coordinator results only seed the initiator's own view and
//! trigger a re-fetch when a transition is rejected. Observers watch the view
//! through a `tokio::sync::watch` channel, so feed handling never blocks commands.

use crate::coordinator::{CoordinatorError, CoordinatorResult, SessionCommands};
use crate::domain::{DeviceId, Role, Session, SessionStatus};
use crate::ports::{ChangeFeed, Subscription};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

//=========================================================================================
// Local View
//=========================================================================================

/// The client's local state machine, one variant per session status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionView {
    #[default]
    Uninitialized,
    Waiting(Session),
    Connected(Session),
    Recording(Session),
    Finished(Session),
}

impl SessionView {
    pub fn from_session(session: Session) -> Self {
        match session.status {
            SessionStatus::Waiting => SessionView::Waiting(session),
            SessionStatus::Connected => SessionView::Connected(session),
            SessionStatus::Recording => SessionView::Recording(session),
            SessionStatus::Finished => SessionView::Finished(session),
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionView::Uninitialized => None,
            SessionView::Waiting(s)
            | SessionView::Connected(s)
            | SessionView::Recording(s)
            | SessionView::Finished(s) => Some(s),
        }
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.session().map(|s| s.status)
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session().map(|s| s.id)
    }

    /// Whether `incoming` may replace this view wholesale. Records for another
    /// session, or older than what is already shown, are redeliveries and are dropped.
    fn admits(&self, incoming: &Session) -> bool {
        match self.session() {
            None => true,
            Some(current) => current.id == incoming.id && incoming.status >= current.status,
        }
    }
}

/// What observers of a client see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub view: SessionView,
    /// Set when the feed dropped; cleared by the next fresh record.
    pub stale: bool,
}

fn apply(state: &watch::Sender<ClientSnapshot>, session: Session) {
    state.send_if_modified(|snapshot| {
        if !snapshot.view.admits(&session) {
            return false;
        }
        let next = SessionView::from_session(session);
        let changed = snapshot.view != next || snapshot.stale;
        snapshot.view = next;
        snapshot.stale = false;
        changed
    });
}

fn mark_stale(state: &watch::Sender<ClientSnapshot>) {
    state.send_if_modified(|snapshot| !std::mem::replace(&mut snapshot.stale, true));
}

//=========================================================================================
// Configuration and Errors
//=========================================================================================

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// This process's identity, fixed for the client's lifetime.
    pub device_id: DeviceId,
    pub resubscribe_delay: Duration,
    pub max_resubscribe_attempts: u32,
}

impl ClientConfig {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            resubscribe_delay: Duration::from_millis(500),
            max_resubscribe_attempts: 10,
        }
    }

    /// A config with a freshly generated device identity.
    pub fn generated() -> Self {
        Self::new(DeviceId::generate())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("Not attached to any session")]
    NotAttached,

    #[error("Only the {0:?} can do this")]
    WrongRole(Role),
}

//=========================================================================================
// Session Client
//=========================================================================================

struct Attachment {
    session_id: Uuid,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Attachment {
    async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct SessionClient {
    config: ClientConfig,
    commands: Arc<dyn SessionCommands>,
    feed: Arc<dyn ChangeFeed>,
    state: Arc<watch::Sender<ClientSnapshot>>,
    attachment: Mutex<Option<Attachment>>,
}

impl SessionClient {
    pub fn new(
        config: ClientConfig,
        commands: Arc<dyn SessionCommands>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        let (state, _) = watch::channel(ClientSnapshot::default());
        Self {
            config,
            commands,
            feed,
            state: Arc::new(state),
            attachment: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.config.device_id
    }

    pub fn watch(&self) -> watch::Receiver<ClientSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        self.state.borrow().clone()
    }

    /// This device's side of the current session, if attached.
    pub fn role(&self) -> Option<Role> {
        self.state
            .borrow()
            .view
            .session()
            .and_then(|s| s.role_of(&self.config.device_id))
    }

    /// Creates a session as its controller and attaches to it.
    pub async fn create_session(&self) -> Result<Session, ClientError> {
        let session = self.commands.create_session(&self.config.device_id).await?;
        self.attach(session.id, Some(session.clone())).await?;
        Ok(session)
    }

    /// Binds this device as the recorder of the waiting session behind `join_code`.
    pub async fn join_session(&self, join_code: &str) -> Result<Session, ClientError> {
        let session = self
            .commands
            .join_session(join_code, &self.config.device_id)
            .await?;
        self.attach(session.id, Some(session.clone())).await?;
        Ok(session)
    }

    pub async fn start_recording(&self) -> Result<Session, ClientError> {
        let session_id = self.require_role(Role::Controller)?;
        let result = self.commands.start_recording(session_id).await;
        self.settle(result).await
    }

    pub async fn stop_recording(&self) -> Result<Session, ClientError> {
        let session_id = self.require_role(Role::Controller)?;
        let result = self.commands.stop_recording(session_id).await;
        self.settle(result).await
    }

    /// Re-reads the session from the store and folds it into the view.
    pub async fn refresh(&self) -> Result<Session, ClientError> {
        let session_id = self
            .state
            .borrow()
            .view
            .session_id()
            .ok_or(ClientError::NotAttached)?;
        let session = self.commands.get_session(session_id).await?;
        self.apply_if_attached(session.clone()).await;
        Ok(session)
    }

    /// Opens a new feed subscription for the current session after a loss.
    pub async fn resubscribe(&self) -> Result<(), ClientError> {
        let session_id = self
            .state
            .borrow()
            .view
            .session_id()
            .ok_or(ClientError::NotAttached)?;
        self.attach(session_id, None).await
    }

    /// Drops the subscription and forgets the session locally. The stored session
    /// and the peer's view are left untouched.
    pub async fn disconnect(&self) {
        let previous = self.attachment.lock().await.take();
        if let Some(attachment) = previous {
            info!(session_id = %attachment.session_id, "Disconnecting from session");
            attachment.shutdown().await;
        }
        self.state.send_replace(ClientSnapshot::default());
    }

    fn require_role(&self, role: Role) -> Result<Uuid, ClientError> {
        let snapshot = self.state.borrow();
        let session = snapshot.view.session().ok_or(ClientError::NotAttached)?;
        if session.role_of(&self.config.device_id) != Some(role) {
            return Err(ClientError::WrongRole(role));
        }
        Ok(session.id)
    }

    async fn settle(&self, result: CoordinatorResult<Session>) -> Result<Session, ClientError> {
        match result {
            Ok(session) => {
                self.apply_if_attached(session.clone()).await;
                Ok(session)
            }
            Err(err @ CoordinatorError::InvalidTransition { .. }) => {
                if let Err(refresh_err) = self.refresh().await {
                    warn!("Failed to re-fetch after rejected transition: {}", refresh_err);
                }
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Folds a command result into the view, unless the client has meanwhile
    /// disconnected or moved to another session. Only attached sessions have a
    /// feed behind them.
    async fn apply_if_attached(&self, session: Session) {
        let attachment = self.attachment.lock().await;
        match attachment.as_ref() {
            Some(current) if current.session_id == session.id => apply(&self.state, session),
            _ => debug!(session_id = %session.id, "Dropping result for a session no longer attached"),
        }
    }

    async fn attach(&self, session_id: Uuid, seed: Option<Session>) -> Result<(), ClientError> {
        let mut attachment = self.attachment.lock().await;
        if let Some(previous) = attachment.take() {
            previous.shutdown().await;
        }

        self.state.send_modify(|snapshot| {
            if snapshot.view.session_id() != Some(session_id) {
                *snapshot = ClientSnapshot::default();
            }
            match seed {
                Some(session) => {
                    if snapshot.view.admits(&session) {
                        snapshot.view = SessionView::from_session(session);
                    }
                    snapshot.stale = false;
                }
                None => snapshot.stale = true,
            }
        });

        let subscription = self.feed.subscribe(session_id).await.map_err(|e| {
            warn!(%session_id, "Failed to subscribe to session feed: {}", e);
            mark_stale(&self.state);
            CoordinatorError::SubscriptionLost(e.to_string())
        })?;
        debug!(%session_id, subscription = %subscription.id, "Subscribed to session feed");

        let cancel = CancellationToken::new();
        let reconciler = Reconciler {
            session_id,
            commands: self.commands.clone(),
            feed: self.feed.clone(),
            state: self.state.clone(),
            resubscribe_delay: self.config.resubscribe_delay,
            max_resubscribe_attempts: self.config.max_resubscribe_attempts,
        };
        let task = tokio::spawn(reconciler.run(subscription, cancel.clone()));

        *attachment = Some(Attachment {
            session_id,
            cancel,
            task: Some(task),
        });
        Ok(())
    }
}

//=========================================================================================
// Feed Reconciliation Task
//=========================================================================================

struct Reconciler {
    session_id: Uuid,
    commands: Arc<dyn SessionCommands>,
    feed: Arc<dyn ChangeFeed>,
    state: Arc<watch::Sender<ClientSnapshot>>,
    resubscribe_delay: Duration,
    max_resubscribe_attempts: u32,
}

impl Reconciler {
    async fn run(self, mut subscription: Subscription, cancel: CancellationToken) {
        // Mutations committed before the subscription existed are picked up here.
        self.refetch().await;

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = subscription.updates.next() => item,
            };

            let reason = match item {
                Some(Ok(session)) => {
                    debug!(session_id = %self.session_id, status = %session.status, "Feed update");
                    apply(&self.state, session);
                    continue;
                }
                Some(Err(e)) => e.to_string(),
                None => "feed closed the stream".to_string(),
            };

            warn!(session_id = %self.session_id, "Subscription lost: {}", reason);
            mark_stale(&self.state);
            self.feed.unsubscribe(subscription.id).await;

            match self.resubscribe(&cancel).await {
                Some(next) => {
                    subscription = next;
                    self.refetch().await;
                }
                None => return,
            }
        }

        self.feed.unsubscribe(subscription.id).await;
    }

    async fn refetch(&self) {
        match self.commands.get_session(self.session_id).await {
            Ok(session) => apply(&self.state, session),
            Err(e) => warn!(session_id = %self.session_id, "Failed to re-fetch session: {}", e),
        }
    }

    async fn resubscribe(&self, cancel: &CancellationToken) -> Option<Subscription> {
        for attempt in 1..=self.max_resubscribe_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
            }
            match self.feed.subscribe(self.session_id).await {
                Ok(subscription) => {
                    info!(session_id = %self.session_id, attempt, "Resubscribed to session feed");
                    return Some(subscription);
                }
                Err(e) => warn!(session_id = %self.session_id, attempt, "Resubscribe failed: {}", e),
            }
        }
        error!(
            session_id = %self.session_id,
            "Giving up on the session feed after {} attempts", self.max_resubscribe_attempts
        );
        None
    }
}
