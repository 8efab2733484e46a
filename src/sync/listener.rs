//! Optional diagnostic sink for failures that never reach a caller.

use super::error::SyncError;

/// Receives failures of fire-and-forget work.
///
/// Both methods default to doing nothing; implement only what you need.
pub trait SyncListener: Send + Sync {
  /// A preload (explicit, or a nested item of a full collection) failed.
  fn on_preload_failed(&self, _id: &str, _error: &SyncError) {}

  /// A background cache write failed or was dropped.
  fn on_write_failed(&self, _op: &str, _error: &str) {}
}
