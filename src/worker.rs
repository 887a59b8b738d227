//! The offline worker: one instance wires the cache generations, the
//! dispatcher, the queue, the sync engine and the broadcaster together and
//! answers the host's lifecycle signals.

use color_eyre::Result;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::broadcast::{Activation, Broadcaster, Host, Notification, Notifier};
use crate::cache::{CacheStorage, GenerationManager, InstallReport, Served, SqliteStorage};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::messages::{Inbound, Outbound};
use crate::net::{Network, Request};
use crate::queue::{NewItem, QueueStore};
use crate::sync::{FlushReport, SyncEngine};

/// Where this instance's cache generation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Nothing installed for this version yet
  Installing,
  /// Installed, waiting for activation
  Installed,
  Active,
}

pub struct OfflineWorker<N: Network, S: CacheStorage = SqliteStorage> {
  config: Config,
  network: Arc<N>,
  generations: Arc<GenerationManager<S>>,
  dispatcher: Dispatcher<S, N>,
  queue: Arc<QueueStore>,
  sync: SyncEngine<N>,
  broadcaster: Arc<Broadcaster>,
  notifier: Notifier,
  lifecycle: Mutex<Lifecycle>,
}

impl<N: Network> OfflineWorker<N, SqliteStorage> {
  /// Open the worker over the configured database file.
  pub fn open(config: Config, network: Arc<N>, host: Arc<dyn Host>) -> Result<Self> {
    let path = config.database_path()?;
    debug!("Opening database at {}", path.display());
    let storage = SqliteStorage::open(&path)?;
    let queue = QueueStore::open(&path)?;
    Self::new(config, storage, queue, network, host)
  }
}

impl<N: Network, S: CacheStorage> OfflineWorker<N, S> {
  pub fn new(
    config: Config,
    storage: S,
    queue: QueueStore,
    network: Arc<N>,
    host: Arc<dyn Host>,
  ) -> Result<Self> {
    let origin = config.origin()?;
    let generations = Arc::new(GenerationManager::new(storage)?);
    let dispatcher = Dispatcher::new(&config, Arc::clone(&generations), Arc::clone(&network))?;
    let queue = Arc::new(queue);
    let broadcaster = Arc::new(Broadcaster::new());
    let sync = SyncEngine::new(
      Arc::clone(&queue),
      Arc::clone(&network),
      origin.clone(),
      Arc::clone(&broadcaster),
      config.sync.default_tag.clone(),
    );
    let notifier = Notifier::new(
      host,
      Arc::clone(&broadcaster),
      config.notifications.clone(),
      origin,
    );

    let version = &config.app.version;
    let static_namespace = &config.cache.static_namespace;
    let lifecycle = if generations.current(static_namespace)?.as_ref() == Some(version) {
      Lifecycle::Active
    } else if generations.has_generation(static_namespace, version)? {
      Lifecycle::Installed
    } else {
      Lifecycle::Installing
    };
    debug!("Worker {} starts {:?}", version, lifecycle);

    Ok(Self {
      config,
      network,
      generations,
      dispatcher,
      queue,
      sync,
      broadcaster,
      notifier,
      lifecycle: Mutex::new(lifecycle),
    })
  }

  fn lifecycle_mut(&self) -> MutexGuard<'_, Lifecycle> {
    self
      .lifecycle
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn lifecycle(&self) -> Lifecycle {
    *self.lifecycle_mut()
  }

  pub fn version(&self) -> &str {
    &self.config.app.version
  }

  pub fn broadcaster(&self) -> &Arc<Broadcaster> {
    &self.broadcaster
  }

  pub fn queue(&self) -> &Arc<QueueStore> {
    &self.queue
  }

  pub fn generations(&self) -> &Arc<GenerationManager<S>> {
    &self.generations
  }

  pub fn sync(&self) -> &SyncEngine<N> {
    &self.sync
  }

  /// Precache the shell into a generation tagged with this version.
  ///
  /// Under the strict policy a failed resource fails the install and leaves
  /// the previously current generation alone.
  pub async fn on_install(&self) -> Result<InstallReport> {
    let resources = self.config.precache_urls()?;
    let report = self
      .generations
      .install(
        self.network.as_ref(),
        &self.config.cache.static_namespace,
        self.version(),
        &resources,
        self.config.cache.install_policy,
      )
      .await?;

    let mut lifecycle = self.lifecycle_mut();
    if *lifecycle != Lifecycle::Active {
      *lifecycle = Lifecycle::Installed;
    }
    Ok(report)
  }

  /// Take control: make this version's generations current, drop every
  /// other generation and announce readiness.
  pub fn on_activate(&self) -> Result<()> {
    let version = self.version();
    let static_namespace = self.config.cache.static_namespace.as_str();
    let runtime_namespace = self.config.cache.runtime_namespace.as_str();

    if self.generations.has_generation(static_namespace, version)? {
      self.generations.create(runtime_namespace, version)?;
      self.generations.activate_all(&[
        (static_namespace, version),
        (runtime_namespace, version),
      ])?;
      *self.lifecycle_mut() = Lifecycle::Active;
      info!("Worker {} active", version);
      self.broadcaster.broadcast(Outbound::SwReady {
        version: version.to_string(),
      });
      return Ok(());
    }

    // Nothing waiting. Collect garbage around whatever is current and
    // announce the version that is actually serving.
    let mut current = Vec::new();
    for namespace in [static_namespace, runtime_namespace] {
      if let Some(tag) = self.generations.current(namespace)? {
        current.push((namespace, tag));
      }
    }
    let pairs: Vec<(&str, &str)> = current
      .iter()
      .map(|(namespace, tag)| (*namespace, tag.as_str()))
      .collect();
    self.generations.activate_all(&pairs)?;

    let serving = self.generations.current(static_namespace)?;
    match serving {
      Some(serving) => {
        if serving == version {
          *self.lifecycle_mut() = Lifecycle::Active;
        } else {
          warn!("Worker {} has nothing installed; {} keeps serving", version, serving);
        }
        self.broadcaster.broadcast(Outbound::SwReady { version: serving });
      }
      None => warn!("Worker {} has nothing installed and nothing is current", version),
    }
    Ok(())
  }

  /// Answer an intercepted request. Never fails.
  pub async fn on_intercept(&self, request: &Request) -> Served {
    self.dispatcher.intercept(request).await
  }

  pub async fn on_message(&self, message: Inbound) -> Result<()> {
    match message {
      Inbound::ActivateNow => self.on_activate()?,
      Inbound::SaveState { state } => {
        let id = self.queue.enqueue(NewItem::snapshot(state))?;
        self.broadcaster.broadcast(Outbound::SwSaved { id });
      }
      Inbound::QueueAction { action } => {
        let id = self.queue.enqueue(NewItem::action(action))?;
        self.broadcaster.broadcast(Outbound::SwQueued { id });
      }
      Inbound::RegisterSync { tag } => {
        self.sync.register(&tag);
      }
      Inbound::Notify { title, options } => {
        self.notifier.present(&title, options)?;
      }
      Inbound::ClearCache => {
        self.generations.clear()?;
        *self.lifecycle_mut() = Lifecycle::Installing;
        self.broadcaster.broadcast(Outbound::CacheCleared);
      }
      Inbound::PlayChime => {
        self.broadcaster.broadcast(Outbound::PlayChime);
      }
    }
    Ok(())
  }

  /// Drain the queue for `tag`. See [`SyncEngine::on_trigger`].
  pub async fn on_sync_trigger(&self, tag: &str) -> Result<Option<FlushReport>> {
    self.sync.on_trigger(tag).await
  }

  pub fn on_push_payload(&self, data: &[u8]) -> Result<Notification> {
    self.notifier.present_push(data)
  }

  pub fn on_notification_activate(&self, notification: &Notification) -> Result<Activation> {
    self.notifier.activate(notification)
  }

  /// Flush with the default tag, logging rather than returning failures.
  pub async fn flush_default(&self) {
    let tag = self.sync.default_tag().to_string();
    if let Err(e) = self.sync.on_trigger(&tag).await {
      warn!("Sync with tag '{}' failed: {}", tag, e);
    }
  }
}
