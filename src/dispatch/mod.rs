//! Fetch strategy dispatcher.
//!
//! Every intercepted request goes through [`Dispatcher::intercept`], which
//! owns the one priority-ordered classification and fallback chain.

mod rules;

pub use rules::{Classifier, Route, Rule, Strategy};

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheLayer, CacheStorage, GenerationManager, RequestIdentity, Served};
use crate::config::Config;
use crate::net::{Network, Request, Response};

pub struct Dispatcher<S: CacheStorage, N: Network> {
  classifier: Classifier,
  layer: CacheLayer<S, N>,
  static_namespace: String,
  runtime_namespace: String,
  fallback: Option<RequestIdentity>,
}

impl<S: CacheStorage, N: Network> Dispatcher<S, N> {
  pub fn new(
    config: &Config,
    generations: Arc<GenerationManager<S>>,
    network: Arc<N>,
  ) -> Result<Self> {
    Ok(Self {
      classifier: Classifier::from_config(config)?,
      layer: CacheLayer::new(generations, network),
      static_namespace: config.cache.static_namespace.clone(),
      runtime_namespace: config.cache.runtime_namespace.clone(),
      fallback: config.fallback_url()?.as_ref().map(RequestIdentity::get),
    })
  }

  /// Answer `request`. Always produces a response.
  pub async fn intercept(&self, request: &Request) -> Served {
    let route = self.classifier.classify(request);
    debug!("{} {} -> {:?}", request.method, request.url, route);

    let rule = match route {
      Route::PassThrough => return self.layer.pass_through(request).await,
      Route::Intercept(rule) => rule,
    };
    let Some(identity) = RequestIdentity::of(request) else {
      return self.layer.pass_through(request).await;
    };

    match rule.strategy() {
      Strategy::CacheFirst => {
        self
          .layer
          .cache_first(&self.static_namespace, &identity, request)
          .await
      }
      Strategy::NetworkFirst => {
        // The fallback page only makes sense for documents.
        let (fallback, offline) = if rule == Rule::Navigation {
          (self.fallback.as_ref(), Response::offline_page())
        } else {
          (None, Response::network_error())
        };
        self
          .layer
          .network_first(&self.runtime_namespace, &identity, request, fallback, offline)
          .await
      }
      Strategy::StaleWhileRevalidate => {
        self
          .layer
          .stale_while_revalidate(&self.runtime_namespace, &identity, request)
          .await
      }
    }
  }
}
