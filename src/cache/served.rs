//! The answer to an intercepted request, with metadata about its source.

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use super::storage::CachedResponse;
use crate::net::Response;

/// Result of intercepting a request, including where the response came from.
#[derive(Debug)]
pub struct Served {
  /// The response handed back to the caller
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Background cache update started by stale-while-revalidate.
  ///
  /// Callers may await it; dropping it does not cancel the update.
  pub revalidation: Option<JoinHandle<()>>,
}

impl Served {
  /// Fresh data from the network.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
      revalidation: None,
    }
  }

  /// A cache hit for the request itself.
  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      cached_at: Some(cached.cached_at),
      revalidation: None,
    }
  }

  /// The designated fallback resource, served in place of the request.
  pub fn fallback(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Fallback,
      cached_at: Some(cached.cached_at),
      revalidation: None,
    }
  }

  /// A locally built failure/offline response.
  pub fn synthesized(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Synthesized,
      cached_at: None,
      revalidation: None,
    }
  }

  /// A non-idempotent request that went straight to the network.
  pub fn passed_through(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::PassThrough,
      cached_at: None,
      revalidation: None,
    }
  }

  pub fn with_revalidation(mut self, handle: JoinHandle<()>) -> Self {
    self.revalidation = Some(handle);
    self
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Cached entry for the request
  Cache,
  /// Cached fallback resource (offline page)
  Fallback,
  /// Built locally because nothing else was available
  Synthesized,
  /// Not intercepted; network response relayed as-is
  PassThrough,
}

impl ResponseSource {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Fallback => "fallback",
      Self::Synthesized => "synthesized",
      Self::PassThrough => "pass-through",
    }
  }
}
