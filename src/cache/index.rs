//! Collection index: positions of a paginated collection mapped to cached entries.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Range;

use super::records::CollectionItemRecord;
use super::staleness;

/// A page of a collection: `size` positions starting at `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
  pub alias: String,
  pub from: usize,
  pub size: usize,
}

/// What the cache holds for a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
  /// Nothing cached in the range
  Missing,
  /// Some positions are cached, others are not
  Partial,
  /// Complete, but the lead record has expired
  Stale,
  /// Complete and the lead record is fresh
  Fresh,
}

impl WindowState {
  pub fn needs_refresh(self) -> bool {
    !matches!(self, WindowState::Fresh)
  }
}

impl Window {
  /// `None` when the window would end past `usize::MAX`.
  pub fn new(alias: impl Into<String>, from: usize, size: usize) -> Option<Self> {
    from.checked_add(size)?;
    Some(Self {
      alias: alias.into(),
      from,
      size,
    })
  }

  /// Indices covered by this window.
  pub fn range(&self) -> Range<usize> {
    self.from..self.from.saturating_add(self.size)
  }

  /// Collection index of the entry at `position` in a server response for this window.
  pub fn index_of(&self, position: usize) -> Option<usize> {
    self.from.checked_add(position)
  }

  /// Classify the cached records of this window.
  ///
  /// Freshness is sampled from the lowest cached index only. Records written at
  /// different times can therefore be served past their own expiry, or refreshed
  /// while still valid.
  pub fn evaluate(
    &self,
    cached: &BTreeMap<usize, CollectionItemRecord>,
    now: DateTime<Utc>,
  ) -> WindowState {
    let Some((_, lead)) = cached.first_key_value() else {
      return WindowState::Missing;
    };

    let range = self.range();
    let covered = cached.keys().filter(|index| range.contains(*index)).count();
    if covered < range.len() {
      WindowState::Partial
    } else if staleness::is_stale_at(Some(lead), now) {
      WindowState::Stale
    } else {
      WindowState::Fresh
    }
  }

  /// Build the records for a server response, one per entry in response order.
  pub fn records<I>(&self, payloads: I, expires_at: DateTime<Utc>) -> Vec<CollectionItemRecord>
  where
    I: IntoIterator<Item = String>,
  {
    payloads
      .into_iter()
      .enumerate()
      .map_while(|(position, payload)| {
        Some(CollectionItemRecord {
          collection_alias: self.alias.clone(),
          index: self.index_of(position)?,
          payload,
          expires_at,
        })
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, TimeZone};

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
  }

  fn cached(indices: &[usize], expires: &[DateTime<Utc>]) -> BTreeMap<usize, CollectionItemRecord> {
    indices
      .iter()
      .zip(expires)
      .map(|(&index, &expires_at)| {
        (
          index,
          CollectionItemRecord {
            collection_alias: "top".to_string(),
            index,
            payload: "{}".to_string(),
            expires_at,
          },
        )
      })
      .collect()
  }

  #[test]
  fn test_records_are_offset_by_from() {
    let window = Window::new("top", 20, 3).unwrap();
    let records = window.records(vec!["a".into(), "b".into()], now());
    assert_eq!(records.iter().map(|r| r.index).collect::<Vec<_>>(), vec![20, 21]);
    assert!(records.iter().all(|r| r.collection_alias == "top"));
  }

  #[test]
  fn test_window_past_usize_max_is_rejected() {
    assert!(Window::new("top", usize::MAX, 1).is_none());
    assert!(Window::new("top", usize::MAX - 1, 1).is_some());

    let window = Window::new("top", usize::MAX - 1, 1).unwrap();
    assert_eq!(window.index_of(1), Some(usize::MAX));
    assert_eq!(window.index_of(2), None);
    let records = window.records(vec!["a".into(), "b".into(), "c".into()], now());
    assert_eq!(records.iter().map(|r| r.index).collect::<Vec<_>>(), vec![usize::MAX - 1, usize::MAX]);
  }

  #[test]
  fn test_empty_cache_is_missing() {
    let window = Window::new("top", 0, 2).unwrap();
    assert_eq!(window.evaluate(&BTreeMap::new(), now()), WindowState::Missing);
  }

  #[test]
  fn test_gap_makes_window_partial() {
    let window = Window::new("top", 0, 3).unwrap();
    let later = now() + Duration::hours(1);
    let state = window.evaluate(&cached(&[0, 2], &[later, later]), now());
    assert_eq!(state, WindowState::Partial);
    assert!(state.needs_refresh());
  }

  #[test]
  fn test_lead_record_decides_freshness() {
    let window = Window::new("top", 0, 2).unwrap();
    let past = now() - Duration::minutes(1);
    let later = now() + Duration::hours(1);

    // Fresh lead hides an expired tail.
    assert_eq!(
      window.evaluate(&cached(&[0, 1], &[later, past]), now()),
      WindowState::Fresh
    );
    // Expired lead refreshes a fresh tail.
    assert_eq!(
      window.evaluate(&cached(&[0, 1], &[past, later]), now()),
      WindowState::Stale
    );
  }
}
