//! Content cache-and-synchronization engine.
//!
//! Every content request is arbitrated between a persistent local cache and
//! the network: fresh records are served locally, stale or missing ones are
//! refreshed, and a failed refresh falls back to whatever the cache holds.
//! Fetching a full collection preloads its items, and a navigation refresh
//! prunes collections that are no longer reachable.

pub mod cache;
pub mod config;
pub mod content;
pub mod logging;
pub mod sync;

pub use cache::{CacheStore, NoopStorage, SqliteStorage, Source, Synced};
pub use content::{HttpSource, Item, RemoteSource, Section};
pub use sync::{SyncEngine, SyncError, SyncListener};
