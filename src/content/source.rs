//! The network side of the engine.

use chrono::{DateTime, Utc};
use std::future::Future;

use crate::sync::error::SyncResult;

/// A raw payload as returned by the server, with its declared expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
  /// Serialized JSON body
  pub payload: String,
  pub expires_at: DateTime<Utc>,
}

/// Fetches content from the network.
///
/// Failures are already classified: `ServerError` for non-2xx and transport
/// failures, `NotFoundOrEmpty` for missing content.
pub trait RemoteSource: Send + Sync + 'static {
  /// A single content item.
  fn fetch_item(&self, id: &str) -> impl Future<Output = SyncResult<Fetched>> + Send;

  /// A window of a collection as a JSON array in server order. With `full`,
  /// every entry also carries its complete item.
  fn fetch_collection(
    &self,
    alias: &str,
    from: usize,
    size: usize,
    full: bool,
  ) -> impl Future<Output = SyncResult<Fetched>> + Send;

  /// The navigation as a JSON array of sections.
  fn fetch_navigation(&self) -> impl Future<Output = SyncResult<Fetched>> + Send;
}
