//! Persistent cache for content, collection entries and navigation.
//!
//! Records are stored as opaque JSON plus an expiration timestamp:
//! - Single content items keyed by id
//! - Collection entries keyed by alias and position, partially fillable
//! - One navigation record

pub mod index;
pub mod records;
pub mod staleness;
pub mod storage;
pub mod writer;

pub use records::{CachedRecord, Source, Synced};
pub use storage::{CacheStats, CacheStore, NoopStorage, SqliteStorage};
