//! Versioned cache generations: install, activation and garbage collection.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use url::Url;

use super::identity::RequestIdentity;
use super::storage::{CacheStorage, CachedResponse, GenerationInfo};
use crate::net::{Network, Request, Response};

/// What to do when a precache resource cannot be fetched during install.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InstallPolicy {
  /// Any failure aborts the install and discards the new generation
  #[default]
  Strict,
  /// Failures are logged; the generation keeps whatever succeeded
  BestEffort,
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub namespace: String,
  pub tag: String,
  /// Number of resources stored
  pub stored: usize,
  /// Resources that failed, with the reason (best-effort only)
  pub failed: Vec<(String, String)>,
}

/// Owns the named cache namespaces and their generations.
///
/// The live map is the global allow-list: one live tag per namespace.
/// Activation deletes every stored generation that is not on it, in every
/// namespace, so repeated deployments never grow storage.
pub struct GenerationManager<S: CacheStorage> {
  storage: S,
  live: Mutex<BTreeMap<String, String>>,
}

impl<S: CacheStorage> GenerationManager<S> {
  /// Create a manager, seeding the allow-list from the generations that are
  /// already current in `storage`.
  pub fn new(storage: S) -> Result<Self> {
    let live = storage
      .generations()?
      .into_iter()
      .filter(|g| g.is_current)
      .map(|g| (g.namespace, g.tag))
      .collect();

    Ok(Self {
      storage,
      live: Mutex::new(live),
    })
  }

  fn live(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
    self
      .live
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Fetch every resource and store the successful responses under `tag`.
  ///
  /// The generation is not made current; see [`Self::activate`].
  pub async fn install<N: Network>(
    &self,
    network: &N,
    namespace: &str,
    tag: &str,
    resources: &[Url],
    policy: InstallPolicy,
  ) -> Result<InstallReport> {
    let existed = self.storage.has_generation(namespace, tag)?;
    self.storage.create_generation(namespace, tag)?;

    let fetches = resources.iter().map(|url| async move {
      let outcome = match network.fetch(&Request::get(url.clone())).await {
        Ok(response) if response.is_success() => Ok(response),
        Ok(response) => Err(format!("HTTP {}", response.status)),
        Err(e) => Err(e.to_string()),
      };
      (url, outcome)
    });
    let results = futures::future::join_all(fetches).await;

    let mut stored = 0;
    let mut failed = Vec::new();
    for (url, outcome) in results {
      let stored_one = outcome.and_then(|response| {
        self
          .storage
          .put(namespace, tag, &RequestIdentity::get(url), &response)
          .map_err(|e| e.to_string())
      });
      match stored_one {
        Ok(()) => stored += 1,
        Err(reason) => failed.push((url.to_string(), reason)),
      }
    }

    if !failed.is_empty() {
      match policy {
        InstallPolicy::Strict => {
          // A generation that was already there (e.g. the current one being
          // re-installed) is left alone.
          if !existed {
            if let Err(e) = self.storage.delete_generation(namespace, tag) {
              warn!("Failed to discard aborted generation {}/{}: {}", namespace, tag, e);
            }
          }
          let details: Vec<String> = failed
            .iter()
            .map(|(url, reason)| format!("{} ({})", url, reason))
            .collect();
          return Err(eyre!(
            "Precache of {}/{} failed: {}",
            namespace,
            tag,
            details.join(", ")
          ));
        }
        InstallPolicy::BestEffort => {
          for (url, reason) in &failed {
            warn!("Precache of {} skipped: {}", url, reason);
          }
        }
      }
    }

    info!(
      "Installed generation {}/{} ({} stored, {} failed)",
      namespace,
      tag,
      stored,
      failed.len()
    );

    Ok(InstallReport {
      namespace: namespace.to_string(),
      tag: tag.to_string(),
      stored,
      failed,
    })
  }

  /// Create an empty generation if it does not exist yet.
  pub fn create(&self, namespace: &str, tag: &str) -> Result<()> {
    self.storage.create_generation(namespace, tag)
  }

  /// Make `tag` current for `namespace` and collect every other generation.
  pub fn activate(&self, namespace: &str, tag: &str) -> Result<Vec<(String, String)>> {
    self.activate_all(&[(namespace, tag)])
  }

  /// Make several generations current at once, then collect garbage.
  ///
  /// Returns the `(namespace, tag)` pairs that were deleted.
  pub fn activate_all(&self, generations: &[(&str, &str)]) -> Result<Vec<(String, String)>> {
    let mut live = self.live()?;
    for (namespace, tag) in generations {
      self.storage.set_current(namespace, tag)?;
      live.insert(namespace.to_string(), tag.to_string());
      info!("Activated generation {}/{}", namespace, tag);
    }

    let mut deleted = Vec::new();
    for generation in self.storage.generations()? {
      if live.get(&generation.namespace) == Some(&generation.tag) {
        continue;
      }
      match self
        .storage
        .delete_generation(&generation.namespace, &generation.tag)
      {
        Ok(()) => {
          info!(
            "Deleted stale generation {}/{}",
            generation.namespace, generation.tag
          );
          deleted.push((generation.namespace, generation.tag));
        }
        Err(e) => warn!(
          "Failed to delete stale generation {}/{}: {}",
          generation.namespace, generation.tag, e
        ),
      }
    }

    Ok(deleted)
  }

  /// Response stored for `identity` in the current generation of
  /// `namespace`.
  pub fn lookup(
    &self,
    namespace: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<CachedResponse>> {
    match self.storage.current(namespace)? {
      Some(tag) => self.storage.get(namespace, &tag, identity),
      None => Ok(None),
    }
  }

  /// Look in `preferred` first, then in every other live namespace.
  pub fn lookup_any(
    &self,
    preferred: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<CachedResponse>> {
    if let Some(hit) = self.lookup(preferred, identity)? {
      return Ok(Some(hit));
    }

    let others: Vec<String> = self
      .live()?
      .keys()
      .filter(|namespace| namespace.as_str() != preferred)
      .cloned()
      .collect();
    for namespace in others {
      if let Some(hit) = self.lookup(&namespace, identity)? {
        return Ok(Some(hit));
      }
    }

    Ok(None)
  }

  /// Write `response` into the current generation of `namespace`.
  ///
  /// Only successful responses are eligible; anything else is skipped and
  /// `Ok(false)` returned.
  pub fn store(
    &self,
    namespace: &str,
    identity: &RequestIdentity,
    response: &Response,
  ) -> Result<bool> {
    if !response.is_success() {
      debug!(
        "Not caching {} (status {})",
        identity.url(),
        response.status
      );
      return Ok(false);
    }

    let tag = self
      .storage
      .current(namespace)?
      .ok_or_else(|| eyre!("No current generation for namespace {}", namespace))?;
    self.storage.put(namespace, &tag, identity, response)?;
    Ok(true)
  }

  /// Current tag of `namespace`.
  pub fn current(&self, namespace: &str) -> Result<Option<String>> {
    self.storage.current(namespace)
  }

  pub fn has_generation(&self, namespace: &str, tag: &str) -> Result<bool> {
    self.storage.has_generation(namespace, tag)
  }

  pub fn generations(&self) -> Result<Vec<GenerationInfo>> {
    self.storage.generations()
  }

  /// Delete every generation in every namespace.
  pub fn clear(&self) -> Result<usize> {
    let mut live = self.live()?;
    let generations = self.storage.generations()?;
    for generation in &generations {
      self
        .storage
        .delete_generation(&generation.namespace, &generation.tag)?;
    }
    live.clear();
    info!("Cleared {} cache generations", generations.len());
    Ok(generations.len())
  }
}
