//! Failure classification surfaced to callers.

use thiserror::Error;

/// Classified failure of an engine operation.
///
/// Callers never see transport or storage errors directly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
  /// The server answered successfully but the result was empty or invalid.
  #[error("not found or empty: {0}")]
  NotFoundOrEmpty(String),

  /// Non-2xx response or transport failure, with no usable cache fallback.
  #[error("server error: {0}")]
  ServerError(String),

  /// A cached or network payload did not have the expected shape.
  #[error("deserialization error: {0}")]
  Deserialization(String),
}

impl SyncError {
  pub fn empty(what: impl std::fmt::Display) -> Self {
    Self::NotFoundOrEmpty(format!("{} result was empty", what))
  }

  /// Whether a cached copy may be served instead of this failure.
  ///
  /// Only connection and server failures qualify. An empty or missing result
  /// is an answer from the server and is passed on as is.
  pub fn allows_fallback(&self) -> bool {
    matches!(self, Self::ServerError(_))
  }
}

impl From<serde_json::Error> for SyncError {
  fn from(e: serde_json::Error) -> Self {
    Self::Deserialization(e.to_string())
  }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
