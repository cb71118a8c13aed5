//! services/api/src/adapters/feed.rs
//!
//! The in-process change feed. One `broadcast` channel per session fans every
//! committed record out to the subscribers attached to that session. Stores (or
//! the Postgres notification bridge) call [`FeedHub::publish`] in commit order.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use twin_capture_core::domain::Session;
use twin_capture_core::ports::{ChangeFeed, PortError, PortResult, Subscription, SubscriptionId};
use uuid::Uuid;

#[derive(Default)]
struct HubInner {
    channels: HashMap<Uuid, broadcast::Sender<Session>>,
    subscriptions: HashMap<SubscriptionId, (Uuid, CancellationToken)>,
}

impl HubInner {
    /// Forgets a session's channel once nobody listens to it any more.
    fn prune(&mut self, session_id: Uuid) {
        let idle = self
            .channels
            .get(&session_id)
            .is_some_and(|sender| sender.receiver_count() == 0);
        if idle {
            self.channels.remove(&session_id);
            self.subscriptions
                .retain(|_, (subscribed_to, _)| *subscribed_to != session_id);
            debug!(%session_id, "Dropped feed channel with no subscribers");
        }
    }
}

// Critical sections never await, so a plain mutex is enough and lets the
// receiver guard clean up from `Drop`.
fn lock(inner: &Mutex<HubInner>) -> MutexGuard<'_, HubInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns one subscriber's receiver. Dropping it (stream ended or dropped by the
/// caller) releases the subscription and, for the last subscriber, the channel.
struct FeedReceiver {
    receiver: Option<broadcast::Receiver<Session>>,
    id: SubscriptionId,
    session_id: Uuid,
    inner: Arc<Mutex<HubInner>>,
}

impl FeedReceiver {
    async fn recv(&mut self) -> Result<Session, RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for FeedReceiver {
    fn drop(&mut self) {
        self.receiver.take();
        let mut inner = lock(&self.inner);
        inner.subscriptions.remove(&self.id);
        inner.prune(self.session_id);
    }
}

/// A `ChangeFeed` backed by per-session broadcast channels.
pub struct FeedHub {
    capacity: usize,
    inner: Arc<Mutex<HubInner>>,
}

impl FeedHub {
    /// `capacity` is how many records a slow subscriber may fall behind before
    /// older intermediate records are skipped for it.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Arc::new(Mutex::new(HubInner::default())),
        }
    }

    /// Republishes a committed record to everyone attached to its session.
    pub fn publish(&self, session: &Session) {
        let mut inner = lock(&self.inner);
        let Some(sender) = inner.channels.get(&session.id) else {
            return;
        };
        if sender.send(session.clone()).is_err() {
            inner.prune(session.id);
        }
    }

    /// Ends every live subscription with `SubscriptionLost`. Used when the upstream
    /// source of records may have missed commits.
    pub fn invalidate_all(&self) {
        let mut inner = lock(&self.inner);
        let dropped = inner.channels.len();
        inner.channels.clear();
        inner.subscriptions.clear();
        if dropped > 0 {
            warn!(channels = dropped, "Invalidated all feed subscriptions");
        }
    }

    pub fn subscriber_count(&self, session_id: Uuid) -> usize {
        lock(&self.inner)
            .channels
            .get(&session_id)
            .map_or(0, |sender| sender.receiver_count())
    }
}

#[async_trait]
impl ChangeFeed for FeedHub {
    async fn subscribe(&self, session_id: Uuid) -> PortResult<Subscription> {
        let id = SubscriptionId::new();
        let token = CancellationToken::new();
        let receiver = {
            let mut inner = lock(&self.inner);
            let capacity = self.capacity;
            let receiver = inner
                .channels
                .entry(session_id)
                .or_insert_with(|| broadcast::channel(capacity).0)
                .subscribe();
            inner.subscriptions.insert(id, (session_id, token.clone()));
            receiver
        };
        debug!(%session_id, subscription = %id, "Feed subscription opened");

        let mut receiver = FeedReceiver {
            receiver: Some(receiver),
            id,
            session_id,
            inner: self.inner.clone(),
        };
        let updates = async_stream::stream! {
            loop {
                let received = tokio::select! {
                    _ = token.cancelled() => break,
                    received = receiver.recv() => received,
                };
                match received {
                    Ok(session) => yield Ok(session),
                    Err(RecvError::Lagged(skipped)) => {
                        // The newest records are still queued, so the final state arrives.
                        warn!(%session_id, skipped, "Feed subscriber lagged");
                    }
                    Err(RecvError::Closed) => {
                        yield Err(PortError::SubscriptionLost(format!(
                            "feed for session {} was closed",
                            session_id
                        )));
                        break;
                    }
                }
            }
            drop(receiver);
        };

        Ok(Subscription {
            id,
            session_id,
            updates: Box::pin(updates),
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        let removed = lock(&self.inner).subscriptions.remove(&id);
        if let Some((session_id, token)) = removed {
            token.cancel();
            debug!(%session_id, subscription = %id, "Feed subscription closed");
        }
    }
}
