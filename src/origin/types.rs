/// A request against the content origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  /// Path relative to the origin base URL, or an absolute URL
  pub path: String,
  /// Entity tag to send as `If-None-Match`
  pub if_none_match: Option<String>,
}

impl FetchRequest {
  pub fn get(path: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      if_none_match: None,
    }
  }

  pub fn conditional(path: impl Into<String>, etag: Option<String>) -> Self {
    Self {
      path: path.into(),
      if_none_match: etag,
    }
  }
}

/// A fully buffered origin response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
  pub status: u16,
  pub etag: Option<String>,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl FetchResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      etag: None,
      content_type: None,
      body: body.into(),
    }
  }

  pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
    self.content_type = Some(content_type.into());
    self
  }

  /// 2xx status
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_not_modified(&self) -> bool {
    self.status == 304
  }
}
