//! Content payloads and the network source they come from.

pub mod client;
pub mod source;
pub mod types;

pub use client::HttpSource;
pub use source::{Fetched, RemoteSource};
pub use types::{CollectionEntry, Item, Section};
