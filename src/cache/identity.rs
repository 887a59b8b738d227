//! Request identity: the cache lookup key.

use sha2::{Digest, Sha256};
use url::Url;

use crate::net::Request;

/// Method + normalized URL of a cacheable (GET) request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
  method: String,
  url: String,
}

impl RequestIdentity {
  /// Identity of `request`, or `None` when the request is not cacheable.
  pub fn of(request: &Request) -> Option<Self> {
    if !request.is_idempotent() {
      return None;
    }
    Some(Self::get(&request.url))
  }

  /// Identity of a GET for `url`.
  pub fn get(url: &Url) -> Self {
    Self {
      method: "GET".to_string(),
      url: normalize_url(url),
    }
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Stable fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Normalize a URL for identity comparison.
///
/// `Url` already lowercases scheme and host, drops default ports and
/// resolves dot segments; the fragment never reaches the server so it is
/// dropped too.
pub fn normalize_url(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}
