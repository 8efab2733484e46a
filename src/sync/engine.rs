//! Synchronization engine: decides per request between cache and network.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{SyncError, SyncResult};
use super::listener::SyncListener;
use super::prune::PrunePlan;
use crate::cache::index::Window;
use crate::cache::records::{
  CachedRecord, CollectionItemRecord, ContentRecord, NavigationRecord, Synced,
};
use crate::cache::staleness::{self, ExpiryPolicy};
use crate::cache::storage::CacheStore;
use crate::cache::writer::{WriteOp, WriteQueue};
use crate::content::source::{Fetched, RemoteSource};
use crate::content::types::{CollectionEntry, Item, Section};

/// Ordered collection window, keyed by collection index.
pub type CollectionPage = BTreeMap<usize, CollectionEntry>;

/// Builder for [`SyncEngine`].
pub struct EngineBuilder<S, R> {
  store: Arc<S>,
  remote: Arc<R>,
  listener: Option<Arc<dyn SyncListener>>,
  ttl_override: Option<Duration>,
  preload_collections: bool,
}

impl<S, R> EngineBuilder<S, R>
where
  S: CacheStore + 'static,
  R: RemoteSource,
{
  pub fn listener(mut self, listener: Arc<dyn SyncListener>) -> Self {
    self.listener = Some(listener);
    self
  }

  /// Expire every record `ttl` after it is fetched, ignoring the server's expiry.
  pub fn ttl_override(mut self, ttl: Option<Duration>) -> Self {
    self.ttl_override = ttl;
    self
  }

  /// Whether `get_collection` requests the expanded form and preloads items.
  pub fn preload_collections(mut self, preload: bool) -> Self {
    self.preload_collections = preload;
    self
  }

  /// Start the background writer and return the engine.
  ///
  /// Must be called from within a tokio runtime.
  pub fn build(self) -> SyncEngine<S, R> {
    let (writes, _worker) = WriteQueue::spawn(Arc::clone(&self.store), self.listener.clone());

    SyncEngine {
      store: self.store,
      remote: self.remote,
      writes,
      listener: self.listener,
      expiry: ExpiryPolicy::new(self.ttl_override),
      preload_collections: self.preload_collections,
    }
  }
}

/// Cache-aside engine over a persistent store and a remote source.
///
/// Reads are awaited by the caller; writes that follow a network fetch are
/// queued and not awaited, so an immediate re-read of the store may still see
/// the previous state.
pub struct SyncEngine<S, R> {
  store: Arc<S>,
  remote: Arc<R>,
  writes: WriteQueue,
  listener: Option<Arc<dyn SyncListener>>,
  expiry: ExpiryPolicy,
  preload_collections: bool,
}

impl<S, R> Clone for SyncEngine<S, R> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      remote: Arc::clone(&self.remote),
      writes: self.writes.clone(),
      listener: self.listener.clone(),
      expiry: self.expiry,
      preload_collections: self.preload_collections,
    }
  }
}

impl<S, R> SyncEngine<S, R>
where
  S: CacheStore + 'static,
  R: RemoteSource,
{
  pub fn builder(store: Arc<S>, remote: Arc<R>) -> EngineBuilder<S, R> {
    EngineBuilder {
      store,
      remote,
      listener: None,
      ttl_override: None,
      preload_collections: true,
    }
  }

  // ==========================================================================
  // Single item
  // ==========================================================================

  /// Fetch a single content item.
  ///
  /// 1. Unless `ignore_cache`, serve a fresh cached record without a network call
  /// 2. Otherwise fetch from network and queue the cache write
  /// 3. On server failure, return the cached record even if stale
  pub async fn get_item(&self, id: &str, ignore_cache: bool) -> SyncResult<Synced<Item>> {
    if ignore_cache {
      let fetched = self.remote.fetch_item(id).await?;
      return self.accept_item(id, fetched);
    }

    let key = id.to_string();
    let cached = self.read("content", move |store| store.get_content(&key)).await;

    if let Some(hit) = self.fresh_hit::<Item, _>(cached.as_ref()) {
      debug!(id, "content cache hit");
      return Ok(hit);
    }

    match self.remote.fetch_item(id).await {
      Ok(fetched) => self.accept_item(id, fetched),
      Err(e) if e.allows_fallback() => match cached {
        Some(record) => {
          warn!(id, error = %e, "content refresh failed, serving cached copy");
          Ok(Synced::fallback(parse(&record.payload)?, record.expires_at))
        }
        None => Err(e),
      },
      Err(e) => Err(e),
    }
  }

  fn accept_item(&self, id: &str, fetched: Fetched) -> SyncResult<Synced<Item>> {
    let item: Item = parse(&fetched.payload)?;
    let expires_at = self.expires_at(&fetched);

    self.writes.submit(WriteOp::Content(ContentRecord {
      id: id.to_string(),
      payload: fetched.payload,
      expires_at,
    }));

    Ok(Synced::from_network(item, expires_at))
  }

  /// Warm the cache for `id` in the background.
  ///
  /// Failures only reach the listener.
  pub fn preload(&self, id: impl Into<String>) -> JoinHandle<()> {
    let engine = self.clone();
    let id = id.into();

    tokio::spawn(async move {
      if let Err(e) = engine.get_item(&id, false).await {
        warn!(id = %id, error = %e, "preload failed");
        engine.report_preload_failure(&id, &e);
      }
    })
  }

  // ==========================================================================
  // Collections
  // ==========================================================================

  /// Fetch a collection window using the configured preloading default.
  pub async fn get_collection(
    &self,
    alias: &str,
    from: usize,
    size: usize,
    ignore_cache: bool,
  ) -> SyncResult<Synced<CollectionPage>> {
    self
      .get_collection_with(alias, from, size, ignore_cache, self.preload_collections)
      .await
  }

  /// Fetch the entries of `alias` at indices `[from, from + size)`.
  ///
  /// With `full`, the expanded response is requested and every nested item is
  /// written as its own content record.
  pub async fn get_collection_with(
    &self,
    alias: &str,
    from: usize,
    size: usize,
    ignore_cache: bool,
    full: bool,
  ) -> SyncResult<Synced<CollectionPage>> {
    let window = Window::new(alias, from, size).ok_or_else(|| {
      SyncError::NotFoundOrEmpty(format!("collection {} has no window at {}+{}", alias, from, size))
    })?;

    if ignore_cache {
      return self.refresh_collection(&window, full).await;
    }

    let (key, range) = (alias.to_string(), window.range());
    let cached = self
      .read("collection", move |store| store.get_collection_window(&key, range))
      .await;
    let state = window.evaluate(&cached, Utc::now());

    if !state.needs_refresh() {
      match decode_window(&cached) {
        Ok(page) => {
          debug!(alias, from, size, "collection cache hit");
          return Ok(Synced::from_cache(page, lead_expiry(&cached)));
        }
        Err(e) => warn!(alias, from, error = %e, "cached collection unreadable, refreshing"),
      }
    }

    debug!(alias, from, size, ?state, "refreshing collection window");
    match self.refresh_collection(&window, full).await {
      Ok(page) => Ok(page),
      Err(e) if e.allows_fallback() => {
        let page = decode_partial(&cached);
        if page.is_empty() {
          return Err(e);
        }
        warn!(
          alias,
          from,
          cached = page.len(),
          error = %e,
          "collection refresh failed, serving cached entries"
        );
        Ok(Synced::fallback(page, lead_expiry(&cached)))
      }
      Err(e) => Err(e),
    }
  }

  async fn refresh_collection(
    &self,
    window: &Window,
    full: bool,
  ) -> SyncResult<Synced<CollectionPage>> {
    let fetched = self
      .remote
      .fetch_collection(&window.alias, window.from, window.size, full)
      .await?;

    let raw: Vec<Value> = parse(&fetched.payload)?;
    if raw.is_empty() {
      return Err(SyncError::empty(format!("collection {}", window.alias)));
    }

    let mut page = CollectionPage::new();
    let mut payloads = Vec::with_capacity(raw.len());
    for (position, value) in raw.into_iter().enumerate() {
      let Some(index) = window.index_of(position) else {
        break;
      };
      let entry = CollectionEntry::deserialize(&value)?;
      payloads.push(value.to_string());
      page.insert(index, entry);
    }

    let expires_at = self.expires_at(&fetched);
    self
      .writes
      .submit(WriteOp::CollectionItems(window.records(payloads, expires_at)));

    if full {
      self.preload_entries(&page, expires_at);
    }

    Ok(Synced::from_network(page, expires_at))
  }

  /// Write every nested complete item as its own content record.
  fn preload_entries(&self, page: &CollectionPage, expires_at: DateTime<Utc>) {
    let mut preloaded = 0usize;

    for entry in page.values() {
      let (Some(raw), Some(parsed)) = (entry.item.as_ref(), entry.full_item()) else {
        continue;
      };

      match parsed {
        Ok(item) => {
          self.writes.submit(WriteOp::Content(ContentRecord {
            id: item.id().to_string(),
            payload: raw.to_string(),
            expires_at,
          }));
          preloaded += 1;
        }
        Err(e) => {
          let error = SyncError::from(e);
          warn!(id = %entry.id, error = %error, "nested item not preloaded");
          self.report_preload_failure(&entry.id, &error);
        }
      }
    }

    debug!(preloaded, "preloaded collection items");
  }

  /// Drop every cached entry of `alias`.
  pub fn delete_collection(&self, alias: &str) {
    self.writes.submit(WriteOp::DeleteCollection(alias.to_string()));
  }

  // ==========================================================================
  // Navigation
  // ==========================================================================

  /// Fetch the site navigation.
  ///
  /// A successful network refresh also prunes cached collections the new
  /// navigation no longer references. A cache hit never prunes.
  pub async fn get_navigation(&self, ignore_cache: bool) -> SyncResult<Synced<Vec<Section>>> {
    if ignore_cache {
      let fetched = self.remote.fetch_navigation().await?;
      return self.accept_navigation(fetched).await;
    }

    let cached = self.read("navigation", |store| store.get_navigation()).await;

    if let Some(hit) = self.fresh_hit::<Vec<Section>, _>(cached.as_ref()) {
      debug!("navigation cache hit");
      return Ok(hit);
    }

    match self.remote.fetch_navigation().await {
      Ok(fetched) => self.accept_navigation(fetched).await,
      Err(e) if e.allows_fallback() => match cached {
        Some(record) => {
          warn!(error = %e, "navigation refresh failed, serving cached copy");
          Ok(Synced::fallback(parse(&record.payload)?, record.expires_at))
        }
        None => Err(e),
      },
      Err(e) => Err(e),
    }
  }

  async fn accept_navigation(&self, fetched: Fetched) -> SyncResult<Synced<Vec<Section>>> {
    let sections: Vec<Section> = parse(&fetched.payload)?;
    if sections.is_empty() {
      return Err(SyncError::empty("navigation"));
    }

    let expires_at = self.expires_at(&fetched);
    self.writes.submit(WriteOp::Navigation(NavigationRecord {
      payload: fetched.payload,
      expires_at,
    }));

    let cached_aliases = self
      .read("collection aliases", |store| store.collection_aliases())
      .await;
    let plan = PrunePlan::new(&sections, &cached_aliases);
    if !plan.is_noop() {
      info!(dropping = ?plan.drop, "navigation changed, pruning collections");
    }
    // Queued even when nothing is cached yet: an earlier write may still be pending.
    self.writes.submit(WriteOp::Prune { keep: plan.keep });

    Ok(Synced::from_network(sections, expires_at))
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  /// Remove every cached record.
  pub fn clear(&self) {
    self.writes.submit(WriteOp::Purge);
  }

  /// Wait until every queued write has been applied.
  pub async fn flush(&self) {
    self.writes.flush().await;
  }

  /// Apply queued writes and stop the writer. Later writes are dropped.
  pub async fn shutdown(&self) {
    self.writes.stop().await;
  }

  // ==========================================================================
  // Helpers
  // ==========================================================================

  /// Run a cache read on the blocking pool; a failing read counts as a miss.
  async fn read<T, F>(&self, what: &str, f: F) -> T
  where
    T: Default + Send + 'static,
    F: FnOnce(&S) -> Result<T> + Send + 'static,
  {
    let store = Arc::clone(&self.store);
    match tokio::task::spawn_blocking(move || f(store.as_ref())).await {
      Ok(Ok(value)) => value,
      Ok(Err(e)) => {
        warn!(what, error = %e, "cache read failed, treating as miss");
        T::default()
      }
      Err(e) => {
        warn!(what, error = %e, "cache read task failed, treating as miss");
        T::default()
      }
    }
  }

  /// Parse a record that has not expired. Unreadable records count as misses.
  fn fresh_hit<T, C>(&self, record: Option<&C>) -> Option<Synced<T>>
  where
    T: DeserializeOwned,
    C: CachedRecord,
  {
    let record = record?;
    if staleness::is_stale(Some(record)) {
      return None;
    }

    match parse(record.payload()) {
      Ok(data) => Some(Synced::from_cache(data, record.expires_at())),
      Err(e) => {
        warn!(error = %e, "cached payload unreadable, refreshing");
        None
      }
    }
  }

  fn expires_at(&self, fetched: &Fetched) -> DateTime<Utc> {
    self.expiry.expires_at(fetched.expires_at, Utc::now())
  }

  fn report_preload_failure(&self, id: &str, error: &SyncError) {
    if let Some(listener) = &self.listener {
      listener.on_preload_failed(id, error);
    }
  }
}

fn parse<T: DeserializeOwned>(payload: &str) -> SyncResult<T> {
  Ok(serde_json::from_str(payload)?)
}

fn lead_expiry(cached: &BTreeMap<usize, CollectionItemRecord>) -> DateTime<Utc> {
  cached
    .first_key_value()
    .map(|(_, record)| record.expires_at)
    .unwrap_or_else(Utc::now)
}

/// Parse every cached entry; any unreadable entry fails the window.
fn decode_window(cached: &BTreeMap<usize, CollectionItemRecord>) -> SyncResult<CollectionPage> {
  let mut page = CollectionPage::new();
  for (&index, record) in cached {
    page.insert(index, parse(&record.payload)?);
  }
  Ok(page)
}

/// Parse the cached entries that are readable.
fn decode_partial(cached: &BTreeMap<usize, CollectionItemRecord>) -> CollectionPage {
  cached
    .iter()
    .filter_map(|(&index, record)| match parse::<CollectionEntry>(&record.payload) {
      Ok(entry) => Some((index, entry)),
      Err(e) => {
        warn!(alias = %record.collection_alias, index, error = %e, "skipping unreadable cached entry");
        None
      }
    })
    .collect()
}
