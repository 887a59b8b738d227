//! Response strategies that combine the cache generations with the network.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::generations::GenerationManager;
use super::identity::RequestIdentity;
use super::served::Served;
use super::storage::{CacheStorage, CachedResponse};
use crate::net::{Network, Request, Response};

/// Cache layer that runs the response strategies.
///
/// This layer sits between the dispatcher and the network. It never returns
/// an error: network failures walk the fallback chain and storage failures
/// are logged and ignored.
pub struct CacheLayer<S: CacheStorage, N: Network> {
  generations: Arc<GenerationManager<S>>,
  network: Arc<N>,
}

impl<S: CacheStorage, N: Network> CacheLayer<S, N> {
  pub fn new(generations: Arc<GenerationManager<S>>, network: Arc<N>) -> Self {
    Self {
      generations,
      network,
    }
  }

  /// Cached entry for `identity`, `namespace` first. Read errors count as a
  /// miss.
  fn cached(&self, namespace: &str, identity: &RequestIdentity) -> Option<CachedResponse> {
    match self.generations.lookup_any(namespace, identity) {
      Ok(hit) => hit,
      Err(e) => {
        warn!("Cache read for {} failed: {}", identity.url(), e);
        None
      }
    }
  }

  /// Fire-and-forget cache write: the result is ignored so a full or broken
  /// cache never changes what the caller receives.
  fn store_best_effort(&self, namespace: &str, identity: &RequestIdentity, response: &Response) {
    if let Err(e) = self.generations.store(namespace, identity, response) {
      warn!("Failed to cache {}: {}", identity.url(), e);
    }
  }

  /// Cache-first.
  ///
  /// 1. Return the cached entry if there is one
  /// 2. Otherwise fetch, store on success and return
  /// 3. On network failure, a synthesized failure response
  pub async fn cache_first(
    &self,
    namespace: &str,
    identity: &RequestIdentity,
    request: &Request,
  ) -> Served {
    if let Some(hit) = self.cached(namespace, identity) {
      debug!("Cache hit for {}", identity.url());
      return Served::from_cache(hit);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store_best_effort(namespace, identity, &response);
        Served::from_network(response)
      }
      Err(e) => {
        debug!("Network failed for {}: {}", identity.url(), e);
        Served::synthesized(Response::network_error())
      }
    }
  }

  /// Network-first.
  ///
  /// 1. Fetch; store and return any response the network gives
  /// 2. On network failure, the cached entry
  /// 3. Then the cached `fallback` resource
  /// 4. Then `offline`
  pub async fn network_first(
    &self,
    namespace: &str,
    identity: &RequestIdentity,
    request: &Request,
    fallback: Option<&RequestIdentity>,
    offline: Response,
  ) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => {
        self.store_best_effort(namespace, identity, &response);
        return Served::from_network(response);
      }
      Err(e) => debug!("Network failed for {}, falling back: {}", identity.url(), e),
    }

    if let Some(hit) = self.cached(namespace, identity) {
      return Served::from_cache(hit);
    }
    if let Some(hit) = fallback.and_then(|fallback| self.cached(namespace, fallback)) {
      return Served::fallback(hit);
    }
    Served::synthesized(offline)
  }

  /// Stale-while-revalidate.
  ///
  /// A cached entry is returned immediately while a background task
  /// refreshes it. Without one the caller awaits the network, which doubles
  /// as the cache update.
  pub async fn stale_while_revalidate(
    &self,
    namespace: &str,
    identity: &RequestIdentity,
    request: &Request,
  ) -> Served {
    if let Some(hit) = self.cached(namespace, identity) {
      debug!("Serving {} from cache, revalidating", identity.url());
      let handle = self.spawn_revalidation(namespace, identity, request);
      return Served::from_cache(hit).with_revalidation(handle);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store_best_effort(namespace, identity, &response);
        Served::from_network(response)
      }
      Err(e) => {
        debug!("Network failed for {}: {}", identity.url(), e);
        Served::synthesized(Response::network_error())
      }
    }
  }

  fn spawn_revalidation(
    &self,
    namespace: &str,
    identity: &RequestIdentity,
    request: &Request,
  ) -> JoinHandle<()> {
    let layer = self.clone();
    let namespace = namespace.to_string();
    let identity = identity.clone();
    let request = request.clone();

    tokio::spawn(async move {
      match layer.network.fetch(&request).await {
        Ok(response) => layer.store_best_effort(&namespace, &identity, &response),
        Err(e) => debug!("Revalidation of {} failed: {}", identity.url(), e),
      }
    })
  }

  /// Relay a request that must not be intercepted.
  pub async fn pass_through(&self, request: &Request) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => Served::passed_through(response),
      Err(e) => {
        debug!("{} {} failed: {}", request.method, request.url, e);
        Served::synthesized(Response::network_error())
      }
    }
  }
}

impl<S: CacheStorage, N: Network> Clone for CacheLayer<S, N> {
  fn clone(&self) -> Self {
    Self {
      generations: Arc::clone(&self.generations),
      network: Arc::clone(&self.network),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ResponseSource, SqliteStorage};
  use crate::net::testing::FakeNetwork;
  use std::time::Duration;
  use url::Url;

  fn setup() -> (CacheLayer<SqliteStorage, FakeNetwork>, Arc<FakeNetwork>) {
    let manager = GenerationManager::new(SqliteStorage::open_in_memory().unwrap()).unwrap();
    manager.create("static", "v1").unwrap();
    manager.create("runtime", "v1").unwrap();
    manager
      .activate_all(&[("static", "v1"), ("runtime", "v1")])
      .unwrap();
    let network = Arc::new(FakeNetwork::new());
    (
      CacheLayer::new(Arc::new(manager), Arc::clone(&network)),
      network,
    )
  }

  fn request(url: &str) -> (RequestIdentity, Request) {
    let request = Request::get(Url::parse(url).unwrap());
    (RequestIdentity::of(&request).unwrap(), request)
  }

  #[tokio::test]
  async fn test_cache_first_is_idempotent_offline() {
    let (layer, network) = setup();
    let (id, req) = request("https://app.example/app.js");
    network.ok("https://app.example/app.js", "console.log(1)");

    let first = layer.cache_first("static", &id, &req).await;
    assert_eq!(first.source, ResponseSource::Network);

    network.set_online(false);
    for _ in 0..3 {
      let served = layer.cache_first("static", &id, &req).await;
      assert_eq!(served.source, ResponseSource::Cache);
      assert_eq!(served.response.body, first.response.body);
    }
    assert_eq!(network.call_count("https://app.example/app.js"), 1);
  }

  #[tokio::test]
  async fn test_cache_first_miss_offline_is_synthesized() {
    let (layer, network) = setup();
    network.set_online(false);
    let (id, req) = request("https://app.example/app.js");

    let served = layer.cache_first("static", &id, &req).await;
    assert_eq!(served.source, ResponseSource::Synthesized);
    assert_eq!(served.response.status, 503);
  }

  #[tokio::test]
  async fn test_network_first_fallback_chain() {
    let (layer, network) = setup();
    let (id, req) = request("https://app.example/page");
    let (offline_id, offline_req) = request("https://app.example/offline.html");
    network.ok("https://app.example/offline.html", "offline copy");
    layer.cache_first("static", &offline_id, &offline_req).await;

    network.set_online(false);

    // No entry for the page: the fallback resource.
    let served = layer
      .network_first("runtime", &id, &req, Some(&offline_id), Response::offline_page())
      .await;
    assert_eq!(served.source, ResponseSource::Fallback);
    assert_eq!(served.response.body, b"offline copy");

    // No fallback either: the synthesized page.
    let served = layer
      .network_first("runtime", &id, &req, None, Response::offline_page())
      .await;
    assert_eq!(served.source, ResponseSource::Synthesized);

    // Once the page has been seen online, its own entry wins.
    network.set_online(true);
    network.ok("https://app.example/page", "page");
    layer
      .network_first("runtime", &id, &req, Some(&offline_id), Response::offline_page())
      .await;
    network.set_online(false);
    let served = layer
      .network_first("runtime", &id, &req, Some(&offline_id), Response::offline_page())
      .await;
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"page");
  }

  #[tokio::test]
  async fn test_network_first_does_not_cache_errors() {
    let (layer, network) = setup();
    let (id, req) = request("https://app.example/broken");
    network.respond("https://app.example/broken", Response::new(500));

    let served = layer
      .network_first("runtime", &id, &req, None, Response::offline_page())
      .await;
    assert_eq!(served.response.status, 500);

    network.set_online(false);
    let served = layer
      .network_first("runtime", &id, &req, None, Response::offline_page())
      .await;
    assert_eq!(served.source, ResponseSource::Synthesized);
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_returns_cached_without_waiting() {
    let (layer, network) = setup();
    let (id, req) = request("https://api.example/items");
    network.ok("https://api.example/items", "old");
    let first = layer.stale_while_revalidate("runtime", &id, &req).await;
    assert_eq!(first.source, ResponseSource::Network);
    assert!(first.revalidation.is_none());

    network.ok("https://api.example/items", "new");
    network.set_delay(Some(Duration::from_secs(60)));

    let served = tokio::time::timeout(
      Duration::from_secs(1),
      layer.stale_while_revalidate("runtime", &id, &req),
    )
    .await
    .expect("cached response must not wait for the network");
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"old");
    served.revalidation.unwrap().abort();
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_updates_in_background() {
    let (layer, network) = setup();
    let (id, req) = request("https://api.example/items");
    network.ok("https://api.example/items", "old");
    layer.stale_while_revalidate("runtime", &id, &req).await;

    network.ok("https://api.example/items", "new");
    let served = layer.stale_while_revalidate("runtime", &id, &req).await;
    assert_eq!(served.response.body, b"old");
    served.revalidation.unwrap().await.unwrap();

    let served = layer.stale_while_revalidate("runtime", &id, &req).await;
    assert_eq!(served.response.body, b"new");
  }

  #[tokio::test]
  async fn test_failed_cache_writes_still_return_network_response() {
    let (layer, network) = setup();
    layer.generations.clear().unwrap();

    for (url, body) in [
      ("https://app.example/app.js", "script"),
      ("https://app.example/page", "page"),
      ("https://api.example/items", "items"),
    ] {
      network.ok(url, body);
    }

    let (id, req) = request("https://app.example/app.js");
    let served = layer.cache_first("static", &id, &req).await;
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.body, b"script");

    let (id, req) = request("https://app.example/page");
    let served = layer
      .network_first("runtime", &id, &req, None, Response::offline_page())
      .await;
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.body, b"page");

    let (id, req) = request("https://api.example/items");
    let served = layer.stale_while_revalidate("runtime", &id, &req).await;
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.body, b"items");

    // Nothing could be stored, so the next read goes to the network again.
    let served = layer.stale_while_revalidate("runtime", &id, &req).await;
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(network.call_count("https://api.example/items"), 2);
  }

  #[tokio::test]
  async fn test_pass_through_failure_is_answered() {
    let (layer, network) = setup();
    network.set_online(false);
    let req = Request::new("POST", Url::parse("https://api.example/items").unwrap());

    let served = layer.pass_through(&req).await;
    assert_eq!(served.source, ResponseSource::Synthesized);
  }
}
