//! Request classification.

use color_eyre::Result;
use std::collections::{BTreeSet, HashSet};
use url::{Origin, Url};

use crate::cache::normalize_url;
use crate::config::Config;
use crate::net::Request;

/// Response strategy for an intercepted read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
}

/// The rule that matched, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
  /// Exact member of the precache list
  Precache,
  /// Top-level navigation/document request
  Navigation,
  /// Remote API read
  RemoteApi,
  /// Nothing else matched
  Default,
}

impl Rule {
  pub fn strategy(self) -> Strategy {
    match self {
      Self::Precache => Strategy::CacheFirst,
      Self::Navigation | Self::Default => Strategy::NetworkFirst,
      Self::RemoteApi => Strategy::StaleWhileRevalidate,
    }
  }
}

/// How a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Non-idempotent: straight to the network, never cached
  PassThrough,
  Intercept(Rule),
}

/// Priority-ordered classifier; the first matching rule wins.
#[derive(Debug, Clone)]
pub struct Classifier {
  origin: Origin,
  precache: HashSet<String>,
  api_hosts: BTreeSet<String>,
  cross_origin_is_api: bool,
}

impl Classifier {
  pub fn new(
    origin: &Url,
    precache: &[Url],
    api_hosts: BTreeSet<String>,
    cross_origin_is_api: bool,
  ) -> Self {
    Self {
      origin: origin.origin(),
      precache: precache.iter().map(normalize_url).collect(),
      api_hosts,
      cross_origin_is_api,
    }
  }

  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self::new(
      &config.origin()?,
      &config.precache_urls()?,
      config.routing.api_hosts.clone(),
      config.routing.cross_origin_is_api,
    ))
  }

  pub fn classify(&self, request: &Request) -> Route {
    if !request.is_idempotent() {
      return Route::PassThrough;
    }

    let rule = if self.precache.contains(&normalize_url(&request.url)) {
      Rule::Precache
    } else if request.is_navigation() {
      Rule::Navigation
    } else if self.is_remote_api(&request.url) {
      Rule::RemoteApi
    } else {
      Rule::Default
    };
    Route::Intercept(rule)
  }

  fn is_remote_api(&self, url: &Url) -> bool {
    let listed = url
      .host_str()
      .map(|host| self.api_hosts.contains(&host.to_ascii_lowercase()))
      .unwrap_or(false);
    listed || (self.cross_origin_is_api && url.origin() != self.origin)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classifier(cross_origin_is_api: bool) -> Classifier {
    let origin = Url::parse("https://app.example").unwrap();
    let precache = vec![origin.join("/").unwrap(), origin.join("/app.js").unwrap()];
    let api_hosts = BTreeSet::from(["api.example".to_string()]);
    Classifier::new(&origin, &precache, api_hosts, cross_origin_is_api)
  }

  fn get(url: &str) -> Request {
    Request::parse_get(url).unwrap()
  }

  #[test]
  fn test_mutations_pass_through() {
    let c = classifier(true);
    let post = Request::new("POST", Url::parse("https://app.example/app.js").unwrap());
    assert_eq!(c.classify(&post), Route::PassThrough);
    let put = Request::new("PUT", Url::parse("https://api.example/x").unwrap());
    assert_eq!(c.classify(&put), Route::PassThrough);
  }

  #[test]
  fn test_precache_wins_over_navigation() {
    let c = classifier(true);
    let nav = get("https://app.example/").with_header("accept", "text/html");
    assert_eq!(c.classify(&nav), Route::Intercept(Rule::Precache));
    assert_eq!(
      c.classify(&get("https://app.example/app.js#x")),
      Route::Intercept(Rule::Precache)
    );
  }

  #[test]
  fn test_navigation_wins_over_api() {
    let c = classifier(true);
    let nav = get("https://api.example/docs").with_header("accept", "text/html");
    assert_eq!(c.classify(&nav), Route::Intercept(Rule::Navigation));
    assert_eq!(Rule::Navigation.strategy(), Strategy::NetworkFirst);
  }

  #[test]
  fn test_api_hosts_and_cross_origin() {
    let c = classifier(true);
    assert_eq!(
      c.classify(&get("https://API.example/items")),
      Route::Intercept(Rule::RemoteApi)
    );
    assert_eq!(
      c.classify(&get("https://cdn.example/font.woff2")),
      Route::Intercept(Rule::RemoteApi)
    );

    let strict = classifier(false);
    assert_eq!(
      strict.classify(&get("https://cdn.example/font.woff2")),
      Route::Intercept(Rule::Default)
    );
    assert_eq!(
      strict.classify(&get("https://api.example/items")),
      Route::Intercept(Rule::RemoteApi)
    );
  }

  #[test]
  fn test_same_origin_default() {
    let c = classifier(true);
    let route = c.classify(&get("https://app.example/data.json"));
    assert_eq!(route, Route::Intercept(Rule::Default));
    assert_eq!(Rule::Default.strategy(), Strategy::NetworkFirst);
  }

  #[test]
  fn test_precache_query_must_match_exactly() {
    let c = classifier(true);
    assert_eq!(
      c.classify(&get("https://app.example/app.js?v=2")),
      Route::Intercept(Rule::Default)
    );
  }
}
