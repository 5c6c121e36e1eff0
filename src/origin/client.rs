use async_trait::async_trait;
use reqwest::header::{HeaderName, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::types::{FetchRequest, FetchResponse};
use crate::error::{CacheError, Result};

/// Anything that can answer fetch requests: the real origin, or a fake in tests.
///
/// Transport failures are `NetworkFailure`; HTTP error statuses are returned
/// as responses and left to the caller to judge.
#[async_trait]
pub trait Origin: Send + Sync {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;

  /// Resolve a request path to the absolute URL it targets.
  fn resolve(&self, path: &str) -> Result<Url>;
}

/// HTTP origin client
#[derive(Clone)]
pub struct HttpOrigin {
  client: Client,
  base_url: Url,
}

impl HttpOrigin {
  pub fn new(base_url: &str) -> Result<Self> {
    Self::with_client(Client::new(), base_url)
  }

  pub fn with_client(client: Client, base_url: &str) -> Result<Self> {
    // A trailing slash makes relative paths resolve beneath the base
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base_url = Url::parse(&normalized).map_err(|e| CacheError::parse(base_url.to_string(), e))?;
    Ok(Self { client, base_url })
  }
}

#[async_trait]
impl Origin for HttpOrigin {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    let url = self.resolve(&request.path)?;

    let mut builder = self.client.get(url.clone());
    if let Some(etag) = &request.if_none_match {
      builder = builder.header(IF_NONE_MATCH, etag);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| CacheError::NetworkFailure(format!("Error fetching {}: {}", url, e)))?;

    let status = response.status().as_u16();
    let header = |name: HeaderName| {
      response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
    };
    let etag = header(ETAG);
    let content_type = header(CONTENT_TYPE);

    let body = response
      .bytes()
      .await
      .map_err(|e| CacheError::NetworkFailure(format!("Error reading {}: {}", url, e)))?
      .to_vec();

    debug!(%url, status, etag = ?etag, "Fetched");

    Ok(FetchResponse {
      status,
      etag,
      content_type,
      body,
    })
  }

  fn resolve(&self, path: &str) -> Result<Url> {
    match Url::parse(path) {
      Ok(absolute) => Ok(absolute),
      Err(url::ParseError::RelativeUrlWithoutBase) => self
        .base_url
        .join(path)
        .map_err(|e| CacheError::parse(path.to_string(), e)),
      Err(e) => Err(CacheError::parse(path.to_string(), e)),
    }
  }
}
