use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;

use super::types::{Headers, Request, Response};

/// The network seam. Everything that leaves the process goes through here.
///
/// An `Err` means no response was obtained at all (DNS, connect, timeout).
/// Any HTTP status, including 5xx, is an `Ok` response.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// `reqwest`-backed network client.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpClient {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", request.method, request.url, e))?;

    let status = response.status().as_u16();
    let headers: Headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
