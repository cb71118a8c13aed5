//! services/api/src/adapters/memory.rs
//!
//! An in-process implementation of the `SessionStore` port. Every write happens
//! inside one critical section, which is what makes `conditional_update` atomic.
//! Committed records are published to the attached [`FeedHub`] before the lock
//! is released, so the feed sees commits in order.

use crate::adapters::feed::FeedHub;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use twin_capture_core::domain::Session;
use twin_capture_core::ports::{
    PortError, PortResult, SessionMatch, SessionPatch, SessionStore,
};
use uuid::Uuid;

pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    feed: Arc<FeedHub>,
    available: AtomicBool,
}

impl MemorySessionStore {
    pub fn new(feed: Arc<FeedHub>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            feed,
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the store going down (or coming back). While unavailable every
    /// operation fails with `PortError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> PortResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PortError::Unavailable("in-memory store is offline".to_string()))
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &Session) -> PortResult<Session> {
        self.ensure_available()?;
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.id) {
            return Err(PortError::Unexpected(format!(
                "Session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id, session.clone());
        self.feed.publish(session);
        Ok(session.clone())
    }

    async fn conditional_update(
        &self,
        predicate: &SessionMatch,
        patch: &SessionPatch,
    ) -> PortResult<Option<Session>> {
        self.ensure_available()?;
        let mut sessions = self.sessions.lock().await;

        // Join codes may collide; the newest matching session wins.
        let target = sessions
            .values()
            .filter(|session| predicate.matches(session))
            .max_by_key(|session| session.created_at)
            .map(|session| session.id);

        let Some(id) = target else {
            return Ok(None);
        };
        let Some(session) = sessions.get_mut(&id) else {
            return Ok(None);
        };
        patch.apply_to(session);
        let updated = session.clone();
        self.feed.publish(&updated);
        Ok(Some(updated))
    }

    async fn get(&self, id: Uuid) -> PortResult<Session> {
        self.ensure_available()?;
        let sessions = self.sessions.lock().await;
        sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twin_capture_core::domain::{DeviceId, SessionStatus};

    fn store() -> MemorySessionStore {
        MemorySessionStore::new(Arc::new(FeedHub::new(8)))
    }

    #[tokio::test]
    async fn conditional_update_is_a_no_op_when_the_predicate_fails() {
        let store = store();
        let session = store.insert(&Session::new(DeviceId::new("dev-A"))).await.unwrap();

        let result = store
            .conditional_update(
                &SessionMatch::by_id(session.id, SessionStatus::Connected),
                &SessionPatch::status(SessionStatus::Recording),
            )
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(store.get(session.id).await.unwrap(), session);
    }

    #[tokio::test]
    async fn colliding_codes_bind_only_the_newest_waiting_session() {
        let store = store();
        let older = Session::new(DeviceId::new("dev-A"));
        let mut newer = Session::new(DeviceId::new("dev-Z"));
        newer.join_code = older.join_code.clone();
        newer.created_at = older.created_at + chrono::Duration::seconds(1);
        store.insert(&older).await.unwrap();
        store.insert(&newer).await.unwrap();

        let bound = store
            .conditional_update(
                &SessionMatch::by_join_code(older.join_code.clone(), SessionStatus::Waiting),
                &SessionPatch::status(SessionStatus::Connected),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(bound.id, newer.id);
        assert_eq!(store.get(older.id).await.unwrap().status, SessionStatus::Waiting);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = store();
        store.set_available(false);
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PortError::Unavailable(_)));
    }
}
