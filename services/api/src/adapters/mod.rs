pub mod db;
pub mod email;
pub mod feed;
pub mod memory;
pub mod pg_feed;

pub use db::DbAdapter;
pub use email::ResendDeliveryAdapter;
pub use feed::FeedHub;
pub use memory::MemorySessionStore;
pub use pg_feed::PgFeedBridge;
