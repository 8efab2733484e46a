pub mod engine;
pub mod error;
pub mod listener;
pub mod prune;

pub use engine::{CollectionPage, EngineBuilder, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use listener::SyncListener;
