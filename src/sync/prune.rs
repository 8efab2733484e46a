//! Pruning of collections that the navigation no longer references.
//!
//! Collections are discovered through navigation, so once a section disappears
//! server-side its cached entries can never be reached again.

use std::collections::BTreeSet;

use crate::content::types::{section_aliases, Section};

/// The aliases to keep after a navigation refresh and the cached ones to drop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
  pub keep: BTreeSet<String>,
  pub drop: BTreeSet<String>,
}

impl PrunePlan {
  /// Plan against the aliases currently present in the cache.
  pub fn new(sections: &[Section], cached: &BTreeSet<String>) -> Self {
    let keep = section_aliases(sections);
    let drop = cached.difference(&keep).cloned().collect();
    Self { keep, drop }
  }

  pub fn is_noop(&self) -> bool {
    self.drop.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn section(id: &str, children: Vec<Section>) -> Section {
    Section {
      id: id.to_string(),
      name: id.to_string(),
      children,
    }
  }

  fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_drops_only_unreferenced_aliases() {
    let sections = vec![section("a", vec![]), section("c", vec![])];
    let plan = PrunePlan::new(&sections, &set(&["a", "b", "c"]));
    assert_eq!(plan.drop, set(&["b"]));
    assert_eq!(plan.keep, set(&["a", "c"]));
  }

  #[test]
  fn test_nested_sections_are_kept() {
    let sections = vec![section("news", vec![section("news/local", vec![])])];
    let plan = PrunePlan::new(&sections, &set(&["news/local"]));
    assert!(plan.is_noop());
  }
}
