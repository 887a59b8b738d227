use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::InstallPolicy;
use crate::db::Database;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub app: AppConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub routing: RoutingConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationDefaults,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Origin of the application, e.g. "https://app.example"
  pub origin: String,
  /// Deployment version; used as the tag of every new cache generation
  #[serde(default = "default_version")]
  pub version: String,
}

fn default_version() -> String {
  "v1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Namespace holding the versioned shell resources
  #[serde(default = "default_static_namespace")]
  pub static_namespace: String,
  /// Namespace filled opportunistically during traffic
  #[serde(default = "default_runtime_namespace")]
  pub runtime_namespace: String,
  /// Paths (or absolute URLs) fetched on install and served cache-first
  #[serde(default)]
  pub precache: Vec<String>,
  #[serde(default)]
  pub install_policy: InstallPolicy,
  /// Resource served to navigations when both network and cache miss
  pub offline_fallback: Option<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      static_namespace: default_static_namespace(),
      runtime_namespace: default_runtime_namespace(),
      precache: Vec::new(),
      install_policy: InstallPolicy::default(),
      offline_fallback: None,
    }
  }
}

fn default_static_namespace() -> String {
  "static".to_string()
}

fn default_runtime_namespace() -> String {
  "runtime".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
  /// Hosts whose GET requests are served stale-while-revalidate
  /// (case-insensitive)
  #[serde(default, deserialize_with = "deserialize_lowercase_set")]
  pub api_hosts: BTreeSet<String>,
  /// Treat every cross-origin GET as a remote API read
  #[serde(default = "default_true")]
  pub cross_origin_is_api: bool,
}

impl Default for RoutingConfig {
  fn default() -> Self {
    Self {
      api_hosts: BTreeSet::new(),
      cross_origin_is_api: true,
    }
  }
}

fn default_true() -> bool {
  true
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Tag that always triggers a drain, registered or not
  #[serde(default = "default_sync_tag")]
  pub default_tag: String,
  /// Periodic trigger interval
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
  /// URL probed to detect connectivity changes; none disables probing
  pub probe_url: Option<String>,
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
  /// Per-request network timeout
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      default_tag: default_sync_tag(),
      interval_secs: default_interval_secs(),
      probe_url: None,
      probe_interval_secs: default_probe_interval_secs(),
      request_timeout_secs: default_request_timeout_secs(),
    }
  }
}

impl SyncConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs.max(1))
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs.max(1))
  }
}

fn default_sync_tag() -> String {
  "sync-queue".to_string()
}

fn default_interval_secs() -> u64 {
  300
}

fn default_probe_interval_secs() -> u64 {
  15
}

fn default_request_timeout_secs() -> u64 {
  30
}

/// Defaults applied to notifications that leave fields out.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationDefaults {
  #[serde(default = "default_notification_title")]
  pub title: String,
  pub icon: Option<String>,
  pub badge: Option<String>,
  pub tag: Option<String>,
}

impl Default for NotificationDefaults {
  fn default() -> Self {
    Self {
      title: default_notification_title(),
      icon: None,
      badge: None,
      tag: None,
    }
  }
}

fn default_notification_title() -> String {
  "New notification".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (default: $XDG_DATA_HOME/offsync/offsync.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offsync/config.yaml\n\
                 It needs at least `app.origin`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.origin()?;
    self.precache_urls()?;
    self.fallback_url()?;
    if self.app.version.trim().is_empty() {
      return Err(eyre!("app.version must not be empty"));
    }
    if self.cache.static_namespace == self.cache.runtime_namespace {
      return Err(eyre!("cache.static_namespace and cache.runtime_namespace must differ"));
    }
    if self.sync.interval_secs == 0 || self.sync.probe_interval_secs == 0 {
      return Err(eyre!("sync.interval_secs and sync.probe_interval_secs must be positive"));
    }
    if let Some(probe) = &self.sync.probe_url {
      Url::parse(probe).map_err(|e| eyre!("Invalid sync.probe_url '{}': {}", probe, e))?;
    }
    Ok(())
  }

  /// The application origin as a base URL.
  pub fn origin(&self) -> Result<Url> {
    Url::parse(&self.app.origin)
      .map_err(|e| eyre!("Invalid app.origin '{}': {}", self.app.origin, e))
  }

  /// Resolve a path or absolute URL against the application origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin()?
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))
  }

  /// The precache list as absolute URLs.
  pub fn precache_urls(&self) -> Result<Vec<Url>> {
    self
      .cache
      .precache
      .iter()
      .map(|path| self.resolve(path))
      .collect()
  }

  pub fn fallback_url(&self) -> Result<Option<Url>> {
    self
      .cache
      .offline_fallback
      .as_deref()
      .map(|path| self.resolve(path))
      .transpose()
  }

  pub fn probe_url(&self) -> Option<Url> {
    self
      .sync
      .probe_url
      .as_deref()
      .and_then(|probe| Url::parse(probe).ok())
  }

  /// Database path: configured, or the default data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => Database::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("app:\n  origin: https://app.example\n").unwrap();

    assert_eq!(config.app.version, "v1");
    assert_eq!(config.cache.static_namespace, "static");
    assert_eq!(config.cache.runtime_namespace, "runtime");
    assert_eq!(config.cache.install_policy, InstallPolicy::Strict);
    assert_eq!(config.sync.default_tag, "sync-queue");
    assert!(config.routing.cross_origin_is_api);
    assert!(config.fallback_url().unwrap().is_none());
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
app:
  origin: https://app.example
  version: v7
cache:
  precache: ["/", "/app.js", "https://cdn.example/lib.js"]
  install_policy: best-effort
  offline_fallback: /offline.html
routing:
  api_hosts: [API.Example]
  cross_origin_is_api: false
sync:
  default_tag: outbox
  probe_url: https://app.example/ping
notifications:
  title: Chat
  icon: /icons/192.png
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.cache.install_policy, InstallPolicy::BestEffort);
    assert!(config.routing.api_hosts.contains("api.example"));
    assert!(!config.routing.cross_origin_is_api);
    assert_eq!(config.notifications.title, "Chat");

    let urls: Vec<String> = config
      .precache_urls()
      .unwrap()
      .into_iter()
      .map(String::from)
      .collect();
    assert_eq!(
      urls,
      vec![
        "https://app.example/",
        "https://app.example/app.js",
        "https://cdn.example/lib.js"
      ]
    );
    assert_eq!(
      config.fallback_url().unwrap().unwrap().as_str(),
      "https://app.example/offline.html"
    );
  }

  #[test]
  fn test_invalid_origin_is_rejected() {
    assert!(Config::from_yaml("app:\n  origin: not a url\n").is_err());
  }

  #[test]
  fn test_same_namespaces_rejected() {
    let yaml = "app:\n  origin: https://app.example\ncache:\n  static_namespace: x\n  runtime_namespace: x\n";
    assert!(Config::from_yaml(yaml).is_err());
  }
}
