//! Payload shapes returned to callers.
//!
//! The cache stores these as opaque JSON; they are only parsed at the engine
//! boundary. Single items are a sum type chosen by the `type` field.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// A single content item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Item {
  Story(Story),
  Video(Video),
  Gallery(Gallery),
  /// Any other element type, kept verbatim
  Element(Element),
}

impl Item {
  pub fn id(&self) -> &str {
    match self {
      Item::Story(s) => &s.id,
      Item::Video(v) => &v.id,
      Item::Gallery(g) => &g.id,
      Item::Element(e) => &e.id,
    }
  }

  /// Value of the `type` discriminator.
  pub fn kind(&self) -> &str {
    match self {
      Item::Story(s) => &s.kind,
      Item::Video(v) => &v.kind,
      Item::Gallery(g) => &g.kind,
      Item::Element(e) => &e.kind,
    }
  }
}

impl<'de> Deserialize<'de> for Item {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let kind = value
      .get("type")
      .and_then(Value::as_str)
      .map(str::to_owned)
      .ok_or_else(|| D::Error::missing_field("type"))?;

    let item = match kind.as_str() {
      "story" => Story::deserialize(value).map(Item::Story),
      "video" => Video::deserialize(value).map(Item::Video),
      "gallery" => Gallery::deserialize(value).map(Item::Gallery),
      _ => Element::deserialize(value).map(Item::Element),
    };

    item.map_err(D::Error::custom)
  }
}

/// Article/story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub headline: String,
  pub subheadline: Option<String>,
  pub description: Option<String>,
  #[serde(default)]
  pub authors: Vec<String>,
  pub published_at: Option<DateTime<Utc>>,
  /// Body elements, kept as raw JSON
  #[serde(default)]
  pub content_elements: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStream {
  pub url: String,
  pub stream_type: Option<String>,
  pub bitrate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub headline: String,
  pub duration_ms: Option<u64>,
  #[serde(default)]
  pub streams: Vec<VideoStream>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
  pub url: String,
  pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gallery {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub headline: String,
  #[serde(default)]
  pub images: Vec<Image>,
}

/// Generic element of a type this crate does not model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

/// One entry of a collection.
///
/// In the expanded ("full") form the entry carries the complete item under
/// `item`. It stays raw JSON here so a malformed nested item never fails the
/// entry itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
  pub id: String,
  #[serde(rename = "type", default)]
  pub kind: String,
  pub headline: Option<String>,
  pub description: Option<String>,
  pub thumbnail_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub item: Option<Value>,
}

impl CollectionEntry {
  /// Parse the nested complete item, if the entry carries one.
  pub fn full_item(&self) -> Option<serde_json::Result<Item>> {
    self.item.as_ref().map(|raw| Item::deserialize(raw))
  }
}

/// A navigation section. Its `id` is the alias of the collection it shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub children: Vec<Section>,
}

/// Collect the aliases referenced by a section tree, children included.
pub fn section_aliases(sections: &[Section]) -> BTreeSet<String> {
  let mut aliases = BTreeSet::new();
  let mut stack: Vec<&Section> = sections.iter().collect();
  while let Some(section) = stack.pop() {
    aliases.insert(section.id.clone());
    stack.extend(section.children.iter());
  }
  aliases
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_item_dispatches_on_type() {
    let story: Item = serde_json::from_value(json!({
      "id": "s1", "type": "story", "headline": "Hello", "authors": ["A"]
    }))
    .unwrap();
    assert!(matches!(story, Item::Story(ref s) if s.headline == "Hello"));

    let video: Item = serde_json::from_value(json!({
      "id": "v1", "type": "video", "streams": [{"url": "https://v/1.m3u8"}]
    }))
    .unwrap();
    assert!(matches!(video, Item::Video(ref v) if v.streams.len() == 1));

    let other: Item = serde_json::from_value(json!({
      "id": "e1", "type": "link_list", "links": [1, 2]
    }))
    .unwrap();
    assert_eq!(other.kind(), "link_list");
    assert!(matches!(other, Item::Element(ref e) if e.fields.contains_key("links")));
  }

  #[test]
  fn test_item_without_type_is_rejected() {
    let err = serde_json::from_value::<Item>(json!({"id": "x"})).unwrap_err();
    assert!(err.to_string().contains("type"));
  }

  #[test]
  fn test_malformed_story_is_not_downgraded_to_element() {
    assert!(serde_json::from_value::<Item>(json!({"type": "story", "headline": "no id"})).is_err());
  }

  #[test]
  fn test_serialized_item_keeps_discriminator() {
    let item: Item = serde_json::from_value(json!({"id": "g", "type": "gallery"})).unwrap();
    let value = serde_json::to_value(&item).unwrap();
    assert_eq!(value["type"], "gallery");
    assert_eq!(serde_json::from_value::<Item>(value).unwrap(), item);
  }

  #[test]
  fn test_collection_entry_full_item() {
    let entry: CollectionEntry = serde_json::from_value(json!({
      "id": "s1", "type": "story",
      "item": {"id": "s1", "type": "story", "headline": "Full"}
    }))
    .unwrap();
    let item = entry.full_item().unwrap().unwrap();
    assert_eq!(item.id(), "s1");

    let bare: CollectionEntry = serde_json::from_value(json!({"id": "s2"})).unwrap();
    assert!(bare.full_item().is_none());
  }

  #[test]
  fn test_section_aliases_include_children() {
    let sections: Vec<Section> = serde_json::from_value(json!([
      {"id": "/news", "children": [{"id": "/news/local"}]},
      {"id": "/sports"}
    ]))
    .unwrap();
    let aliases = section_aliases(&sections);
    assert_eq!(
      aliases.into_iter().collect::<Vec<_>>(),
      vec!["/news", "/news/local", "/sports"]
    );
  }
}
