//! Persisted record kinds and the result wrapper returned by the engine.

use chrono::{DateTime, Utc};

/// A row in the persistent cache.
///
/// Every record carries exactly one expiration timestamp; staleness is derived
/// from it and the current UTC time only.
pub trait CachedRecord {
  /// Instant after which the record needs a network refresh.
  fn expires_at(&self) -> DateTime<Utc>;

  /// Opaque serialized payload.
  fn payload(&self) -> &str;
}

/// A single content item keyed by its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
  pub id: String,
  pub payload: String,
  pub expires_at: DateTime<Utc>,
}

/// One entry of a collection at a zero-based position.
///
/// `(collection_alias, index)` is unique. Indices of an alias need not be contiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionItemRecord {
  pub collection_alias: String,
  pub index: usize,
  pub payload: String,
  pub expires_at: DateTime<Utc>,
}

/// The site navigation. At most one is live at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRecord {
  pub payload: String,
  pub expires_at: DateTime<Utc>,
}

impl CachedRecord for ContentRecord {
  fn expires_at(&self) -> DateTime<Utc> {
    self.expires_at
  }

  fn payload(&self) -> &str {
    &self.payload
  }
}

impl CachedRecord for CollectionItemRecord {
  fn expires_at(&self) -> DateTime<Utc> {
    self.expires_at
  }

  fn payload(&self) -> &str {
    &self.payload
  }
}

impl CachedRecord for NavigationRecord {
  fn expires_at(&self) -> DateTime<Utc> {
    self.expires_at
  }

  fn payload(&self) -> &str {
    &self.payload
  }
}

/// Result of an engine operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct Synced<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: Source,
  /// Expiration of the record the data was served from (or written to)
  pub expires_at: DateTime<Utc>,
}

impl<T> Synced<T> {
  pub fn from_network(data: T, expires_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: Source::Network,
      expires_at,
    }
  }

  pub fn from_cache(data: T, expires_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: Source::CacheFresh,
      expires_at,
    }
  }

  /// Stale cache served because the network refresh failed.
  pub fn fallback(data: T, expires_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: Source::CacheFallback,
      expires_at,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache after a failed refresh (possibly stale)
  CacheFallback,
}
