use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, CACHE_CONTROL, EXPIRES};
use tracing::{debug, warn};
use url::Url;

use crate::config::{Config, RemoteConfig};
use crate::content::source::{Fetched, RemoteSource};
use crate::sync::error::{SyncError, SyncResult};

/// Content API client over HTTP
#[derive(Clone)]
pub struct HttpSource {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
  /// Expiry used when the response carries no caching headers
  default_ttl: Duration,
}

impl HttpSource {
  pub fn new(config: &RemoteConfig) -> Result<Self> {
    let mut base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid base url {}: {}", config.base_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("Base url {} cannot carry paths", config.base_url));
    }
    // Keep the last path segment when joining endpoints.
    if !base_url.path().ends_with('/') {
      base_url.set_path(&format!("{}/", base_url.path()));
    }

    let client = reqwest::Client::builder()
      .timeout(std::time::Duration::from_secs(config.timeout_secs))
      .user_agent(concat!("content-sync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token: Config::get_api_token(),
      default_ttl: config.default_ttl()?,
    })
  }

  fn endpoint(&self, path: &str, query: &[(&str, String)]) -> SyncResult<Url> {
    let mut url = self
      .base_url
      .join(path)
      .map_err(|e| SyncError::ServerError(format!("Invalid endpoint {}: {}", path, e)))?;
    if !query.is_empty() {
      url
        .query_pairs_mut()
        .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
    }
    Ok(url)
  }

  async fn get(&self, url: Url) -> SyncResult<Fetched> {
    let mut request = self.client.get(url.clone());
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request
      .send()
      .await
      .map_err(|e| SyncError::ServerError(format!("Request to {} failed: {}", url, e)))?;

    let status = response.status();
    debug!(url = %url, status = status.as_u16(), "content response");
    if !status.is_success() {
      return Err(SyncError::ServerError(format!("{} returned {}", url, status)));
    }

    let now = Utc::now();
    let expires_at = expiry_from_headers(response.headers(), now)
      .or_else(|| now.checked_add_signed(self.default_ttl))
      .unwrap_or(now);

    let payload = response
      .text()
      .await
      .map_err(|e| SyncError::ServerError(format!("Failed to read body of {}: {}", url, e)))?;
    if payload.trim().is_empty() {
      return Err(SyncError::empty(url));
    }

    Ok(Fetched {
      payload,
      expires_at,
    })
  }
}

impl RemoteSource for HttpSource {
  async fn fetch_item(&self, id: &str) -> SyncResult<Fetched> {
    let url = self.endpoint("content", &[("id", id.to_string())])?;
    self.get(url).await
  }

  async fn fetch_collection(
    &self,
    alias: &str,
    from: usize,
    size: usize,
    full: bool,
  ) -> SyncResult<Fetched> {
    let url = self.endpoint(
      "collections",
      &[
        ("alias", alias.to_string()),
        ("from", from.to_string()),
        ("size", size.to_string()),
        ("full", full.to_string()),
      ],
    )?;
    self.get(url).await
  }

  async fn fetch_navigation(&self) -> SyncResult<Fetched> {
    let url = self.endpoint("navigation", &[])?;
    self.get(url).await
  }
}

/// Expiration declared by the response: `Cache-Control: max-age` wins over `Expires`.
///
/// A `max-age` that does not fit a timestamp counts as undeclared.
fn expiry_from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
  let max_age = headers
    .get(CACHE_CONTROL)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| {
      v.split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|secs| secs.trim_matches('"').parse::<i64>().ok())
    });
  if let Some(secs) = max_age {
    match Duration::try_seconds(secs).and_then(|ttl| now.checked_add_signed(ttl)) {
      Some(expires_at) => return Some(expires_at),
      None => warn!(max_age = secs, "ignoring out of range max-age"),
    }
  }

  headers
    .get(EXPIRES)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
    .map(|dt| dt.with_timezone(&Utc))
}
