//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::adapters::{FeedHub, MemorySessionStore};
use crate::config::Config;
use std::sync::Arc;
use twin_capture_core::coordinator::{SessionCommands, SessionCoordinator};
use twin_capture_core::ports::{ChangeFeed, DeliveryService};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub commands: Arc<dyn SessionCommands>,
    pub feed: Arc<dyn ChangeFeed>,
    /// `None` when no email provider is configured.
    pub delivery: Option<Arc<dyn DeliveryService>>,
    pub config: Arc<Config>,
}

impl AppState {
    /// State backed by the in-memory store, with the hub as its change feed.
    pub fn in_memory(config: Arc<Config>, delivery: Option<Arc<dyn DeliveryService>>) -> Self {
        let hub = Arc::new(FeedHub::new(config.feed_capacity));
        let store = Arc::new(MemorySessionStore::new(hub.clone()));
        Self {
            commands: Arc::new(SessionCoordinator::new(store)),
            feed: hub,
            delivery,
            config,
        }
    }
}
