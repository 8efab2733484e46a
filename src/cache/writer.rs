//! Background write queue.
//!
//! Callers submit writes and move on. A single worker applies them in
//! submission order, so the last submitted write for a key wins. Failures are
//! logged and routed to the listener; they never reach the caller.

use color_eyre::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::records::{CollectionItemRecord, ContentRecord, NavigationRecord};
use super::storage::CacheStore;
use crate::sync::listener::SyncListener;

/// A write to apply to the store
#[derive(Debug)]
pub enum WriteOp {
  Content(ContentRecord),
  CollectionItems(Vec<CollectionItemRecord>),
  Navigation(NavigationRecord),
  /// Delete every collection whose alias is not kept
  Prune { keep: BTreeSet<String> },
  DeleteCollection(String),
  Purge,
  /// Acknowledged once every earlier op has been applied
  Flush(oneshot::Sender<()>),
  /// Stop the worker after acknowledging
  Stop(oneshot::Sender<()>),
}

impl WriteOp {
  fn describe(&self) -> String {
    match self {
      WriteOp::Content(r) => format!("content {}", r.id),
      WriteOp::CollectionItems(rs) => match rs.first() {
        Some(first) => format!("collection {} ({} entries)", first.collection_alias, rs.len()),
        None => "collection (0 entries)".to_string(),
      },
      WriteOp::Navigation(_) => "navigation".to_string(),
      WriteOp::Prune { keep } => format!("prune (keeping {} aliases)", keep.len()),
      WriteOp::DeleteCollection(alias) => format!("delete collection {}", alias),
      WriteOp::Purge => "purge".to_string(),
      WriteOp::Flush(_) => "flush".to_string(),
      WriteOp::Stop(_) => "stop".to_string(),
    }
  }
}

/// Handle for submitting writes to the background worker.
#[derive(Clone)]
pub struct WriteQueue {
  tx: mpsc::UnboundedSender<WriteOp>,
  listener: Option<Arc<dyn SyncListener>>,
}

impl WriteQueue {
  /// Spawn the worker on the current tokio runtime.
  pub fn spawn<S>(store: Arc<S>, listener: Option<Arc<dyn SyncListener>>) -> (Self, JoinHandle<()>)
  where
    S: CacheStore + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();
    let worker_listener = listener.clone();

    let handle = tokio::spawn(async move {
      while let Some(op) = rx.recv().await {
        match op {
          WriteOp::Flush(ack) => {
            let _ = ack.send(());
          }
          WriteOp::Stop(ack) => {
            let _ = ack.send(());
            break;
          }
          op => {
            let description = op.describe();
            let store = Arc::clone(&store);
            let result = tokio::task::spawn_blocking(move || apply(store.as_ref(), op)).await;

            let error = match result {
              Ok(Ok(())) => None,
              Ok(Err(e)) => Some(e.to_string()),
              Err(e) => Some(format!("write task failed: {}", e)),
            };
            if let Some(error) = error {
              warn!(op = %description, error = %error, "cache write failed");
              if let Some(listener) = &worker_listener {
                listener.on_write_failed(&description, &error);
              }
            }
          }
        }
      }
      debug!("cache write worker stopped");
    });

    (Self { tx, listener }, handle)
  }

  /// Queue a write without waiting for it.
  pub fn submit(&self, op: WriteOp) {
    if let Err(mpsc::error::SendError(op)) = self.tx.send(op) {
      let description = op.describe();
      warn!(op = %description, "cache write dropped, worker stopped");
      if let Some(listener) = &self.listener {
        listener.on_write_failed(&description, "write worker stopped");
      }
    }
  }

  /// Wait until every write submitted before this call has been applied.
  pub async fn flush(&self) {
    let (ack, done) = oneshot::channel();
    if self.tx.send(WriteOp::Flush(ack)).is_ok() {
      let _ = done.await;
    }
  }

  /// Apply pending writes, then stop the worker. Later submissions are dropped.
  pub async fn stop(&self) {
    let (ack, done) = oneshot::channel();
    if self.tx.send(WriteOp::Stop(ack)).is_ok() {
      let _ = done.await;
    }
  }
}

fn apply<S: CacheStore + ?Sized>(store: &S, op: WriteOp) -> Result<()> {
  match op {
    WriteOp::Content(record) => store.put_content(&record),
    WriteOp::CollectionItems(records) => store.put_collection_items(&records),
    WriteOp::Navigation(record) => store.put_navigation(&record),
    WriteOp::Prune { keep } => {
      let deleted = store.delete_collections_except(&keep)?;
      if deleted > 0 {
        info!(deleted, kept = keep.len(), "pruned unreachable collections");
      }
      Ok(())
    }
    WriteOp::DeleteCollection(alias) => {
      let deleted = store.delete_collection(&alias)?;
      debug!(alias = %alias, deleted, "deleted collection");
      Ok(())
    }
    WriteOp::Purge => store.purge(),
    WriteOp::Flush(_) | WriteOp::Stop(_) => Ok(()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use chrono::Utc;
  use std::sync::Mutex;

  #[derive(Default)]
  struct Failures(Mutex<Vec<String>>);

  impl SyncListener for Failures {
    fn on_write_failed(&self, op: &str, _error: &str) {
      self.0.lock().unwrap().push(op.to_string());
    }
  }

  fn content(id: &str, payload: &str) -> ContentRecord {
    ContentRecord {
      id: id.to_string(),
      payload: payload.to_string(),
      expires_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn test_writes_apply_in_submission_order() {
    let store = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (queue, _handle) = WriteQueue::spawn(Arc::clone(&store), None);

    for n in 0..10 {
      queue.submit(WriteOp::Content(content("a", &n.to_string())));
    }
    queue.flush().await;

    assert_eq!(store.get_content("a").unwrap().unwrap().payload, "9");
  }

  #[tokio::test]
  async fn test_submit_after_stop_reports_dropped_write() {
    let store = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let failures = Arc::new(Failures::default());
    let (queue, handle) = WriteQueue::spawn(
      Arc::clone(&store),
      Some(Arc::clone(&failures) as Arc<dyn SyncListener>),
    );

    queue.submit(WriteOp::Content(content("a", "1")));
    queue.stop().await;
    handle.await.unwrap();
    queue.submit(WriteOp::Content(content("b", "2")));

    assert!(store.get_content("a").unwrap().is_some());
    assert!(store.get_content("b").unwrap().is_none());
    assert_eq!(*failures.0.lock().unwrap(), vec!["content b".to_string()]);
  }
}
