//! Staleness policy.
//!
//! Only time and the absence of a record decide staleness. Connectivity,
//! restarts and the like never do.

use chrono::{DateTime, Duration, Utc};

use super::records::CachedRecord;

/// Whether `record` needs a network refresh at `now`.
///
/// An absent record is always stale. A present one is stale iff `now > expires_at`.
pub fn is_stale_at<R: CachedRecord>(record: Option<&R>, now: DateTime<Utc>) -> bool {
  match record {
    Some(record) => now > record.expires_at(),
    None => true,
  }
}

/// [`is_stale_at`] against the current UTC time.
pub fn is_stale<R: CachedRecord>(record: Option<&R>) -> bool {
  is_stale_at(record, Utc::now())
}

/// Computes the expiration to persist for a freshly fetched payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryPolicy {
  /// Replaces the server-declared expiration with `now + ttl` when set
  ttl_override: Option<Duration>,
}

impl ExpiryPolicy {
  pub fn new(ttl_override: Option<Duration>) -> Self {
    Self { ttl_override }
  }

  pub fn expires_at(&self, server_expires_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    match self.ttl_override {
      Some(ttl) => now.checked_add_signed(ttl).unwrap_or(now),
      None => server_expires_at,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::records::ContentRecord;
  use chrono::TimeZone;

  fn record(expires_at: DateTime<Utc>) -> ContentRecord {
    ContentRecord {
      id: "a".to_string(),
      payload: "{}".to_string(),
      expires_at,
    }
  }

  #[test]
  fn test_absent_record_is_stale() {
    assert!(is_stale_at::<ContentRecord>(None, Utc::now()));
  }

  #[test]
  fn test_staleness_is_determined_by_expiry() {
    let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let r = record(t);

    for secs in [1, 60, 86_400] {
      assert!(!is_stale_at(Some(&r), t - Duration::seconds(secs)));
      assert!(is_stale_at(Some(&r), t + Duration::seconds(secs)));
    }
    // Exactly at expiry the record is still usable.
    assert!(!is_stale_at(Some(&r), t));
  }

  #[test]
  fn test_expiry_policy_uses_server_value_by_default() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let server = now + Duration::minutes(3);
    assert_eq!(ExpiryPolicy::default().expires_at(server, now), server);
  }

  #[test]
  fn test_expiry_policy_override() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let server = now + Duration::minutes(3);
    let policy = ExpiryPolicy::new(Some(Duration::hours(1)));
    assert_eq!(policy.expires_at(server, now), now + Duration::hours(1));
  }
}
