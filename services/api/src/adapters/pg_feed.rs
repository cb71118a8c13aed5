//! services/api/src/adapters/pg_feed.rs
//!
//! Bridges Postgres change notifications into the in-process [`FeedHub`].
//!
//! The `recording_sessions` trigger emits the full row on every committed write.
//! Postgres delivers notifications in commit order, so republishing them one by one
//! keeps each subscriber's view ordered. If the listening connection drops, commits
//! may have been missed, so every subscriber is told its subscription was lost.

use crate::adapters::db::SessionRecord;
use crate::adapters::feed::FeedHub;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The channel the `recording_sessions_notify` trigger publishes on.
pub const SESSION_CHANNEL: &str = "recording_sessions_changes";

pub struct PgFeedBridge {
    pool: PgPool,
    hub: Arc<FeedHub>,
}

impl PgFeedBridge {
    pub fn new(pool: PgPool, hub: Arc<FeedHub>) -> Self {
        Self { pool, hub }
    }

    /// Listens until cancelled. Only fails if the initial `LISTEN` cannot be set up.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(SESSION_CHANNEL).await?;
        info!("Listening for session changes on '{}'", SESSION_CHANNEL);

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = listener.try_recv() => received,
            };

            match received {
                Ok(Some(notification)) => {
                    let record = match serde_json::from_str::<SessionRecord>(notification.payload()) {
                        Ok(record) => record,
                        Err(e) => {
                            error!("Malformed session notification: {}", e);
                            continue;
                        }
                    };
                    match record.to_domain() {
                        Ok(session) => self.hub.publish(&session),
                        Err(e) => error!("Invalid session in notification: {}", e),
                    }
                }
                Ok(None) => {
                    // The listener reconnects on the next call.
                    warn!("Lost the notification connection; invalidating subscriptions");
                    self.hub.invalidate_all();
                }
                Err(e) => {
                    error!("Notification listener error: {}", e);
                    self.hub.invalidate_all();
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }

        info!("Session change listener stopped");
        Ok(())
    }
}
