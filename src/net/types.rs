//! Request and response values that flow through the interception layer.
//!
//! These are deliberately transport-agnostic so the same values can be
//! stored in the cache, replayed from the queue and sent over `reqwest`.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Header map keyed by lowercase header name.
pub type Headers = BTreeMap<String, String>;

const OFFLINE_PAGE: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\n<body><h1>You are offline</h1><p>This page is not available offline. It will load again once the connection is back.</p></body></html>\n";

/// An outgoing request as seen by the interception layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url,
      headers: Headers::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  /// Parse `url` and build a GET request for it.
  pub fn parse_get(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
    Ok(Self::get(url))
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  /// Only GET is treated as a read. Every other method mutates or has
  /// side effects the cache must not observe.
  pub fn is_idempotent(&self) -> bool {
    self.method == "GET"
  }

  /// Whether this is a top-level navigation/document request.
  pub fn is_navigation(&self) -> bool {
    if self.header("sec-fetch-mode") == Some("navigate")
      || self.header("sec-fetch-dest") == Some("document")
    {
      return true;
    }
    self
      .header("accept")
      .map(|accept| accept.to_ascii_lowercase().contains("text/html"))
      .unwrap_or(false)
  }
}

/// A response, either received from the network, read from the cache or
/// synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: Vec::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  /// 2xx. Only these are ever written to a cache generation.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Answer for a request that could be served neither from cache nor from
  /// the network.
  pub fn network_error() -> Self {
    Self::new(503)
      .with_header("content-type", "text/plain; charset=utf-8")
      .with_body("Network error")
  }

  /// Last link of the navigation fallback chain.
  pub fn offline_page() -> Self {
    Self::new(503)
      .with_header("content-type", "text/html; charset=utf-8")
      .with_body(OFFLINE_PAGE)
  }
}
