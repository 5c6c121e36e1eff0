//! In-process origin for unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

use super::{FetchRequest, FetchResponse, Origin};
use crate::error::{CacheError, Result};

enum Route {
  Resource { body: Vec<u8>, etag: Option<String> },
  Status(u16),
  Offline,
}

/// Serves registered paths, honouring `If-None-Match`, and records every request.
pub struct FakeOrigin {
  routes: Mutex<HashMap<String, Route>>,
  requests: Mutex<Vec<FetchRequest>>,
  base: Url,
}

impl FakeOrigin {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      requests: Mutex::new(Vec::new()),
      base: Url::parse("https://example.test/").unwrap(),
    }
  }

  /// Route key: the path beneath the base, so `/a`, `a` and `https://example.test/a` coincide.
  fn route_key(&self, path: &str) -> String {
    match self.base.join(path) {
      Ok(url) => url.path().trim_start_matches('/').to_string(),
      Err(_) => path.to_string(),
    }
  }

  pub fn serve(&self, path: &str, body: &str, etag: Option<&str>) {
    let key = self.route_key(path);
    self.routes.lock().unwrap().insert(
      key,
      Route::Resource {
        body: body.as_bytes().to_vec(),
        etag: etag.map(String::from),
      },
    );
  }

  pub fn status(&self, path: &str, status: u16) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(self.route_key(path), Route::Status(status));
  }

  pub fn offline(&self, path: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(self.route_key(path), Route::Offline);
  }

  pub fn requests(&self) -> Vec<FetchRequest> {
    self.requests.lock().unwrap().clone()
  }

  pub fn request_count(&self, path: &str) -> usize {
    let key = self.route_key(path);
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .filter(|r| self.route_key(&r.path) == key)
      .count()
  }
}

#[async_trait]
impl Origin for FakeOrigin {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    self.requests.lock().unwrap().push(request.clone());

    let key = self.route_key(&request.path);
    let routes = self.routes.lock().unwrap();
    match routes.get(&key) {
      Some(Route::Resource { body, etag }) => {
        if etag.is_some() && request.if_none_match == *etag {
          return Ok(FetchResponse::new(304, Vec::new()));
        }
        let mut response = FetchResponse::new(200, body.clone());
        response.etag = etag.clone();
        Ok(response)
      }
      Some(Route::Status(status)) => Ok(FetchResponse::new(*status, Vec::new())),
      Some(Route::Offline) => Err(CacheError::NetworkFailure(format!(
        "{} unreachable",
        request.path
      ))),
      None => Ok(FetchResponse::new(404, Vec::new())),
    }
  }

  fn resolve(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| CacheError::parse(path.to_string(), e))
  }
}
