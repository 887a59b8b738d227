//! Draining the durable queue over the network.
//!
//! A flush walks every queued item once. Replayable actions are sent with
//! their declared method, headers and body and removed only on a successful
//! response; passive records are removed without touching the network. A
//! failed item stays queued and is retried on the next flush, with no retry
//! count (at-least-once).

use color_eyre::Result;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use url::Url;

use crate::broadcast::Broadcaster;
use crate::messages::Outbound;
use crate::net::Network;
use crate::queue::{QueueItem, QueueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
  Success,
  Failed,
  DequeuedWithoutReplay,
}

/// What happened to one item during one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
  pub item_id: String,
  pub status: SyncStatus,
  pub reason: Option<String>,
}

impl SyncOutcome {
  fn success(item: &QueueItem) -> Self {
    Self {
      item_id: item.id.clone(),
      status: SyncStatus::Success,
      reason: None,
    }
  }

  fn failed(item: &QueueItem, reason: impl Into<String>) -> Self {
    Self {
      item_id: item.id.clone(),
      status: SyncStatus::Failed,
      reason: Some(reason.into()),
    }
  }

  fn dequeued(item: &QueueItem) -> Self {
    Self {
      item_id: item.id.clone(),
      status: SyncStatus::DequeuedWithoutReplay,
      reason: None,
    }
  }

  pub fn to_message(&self) -> Outbound {
    let id = self.item_id.clone();
    match self.status {
      SyncStatus::Success => Outbound::SyncItemSuccess { id },
      SyncStatus::Failed => Outbound::SyncItemFailed {
        id,
        reason: self.reason.clone().unwrap_or_default(),
      },
      SyncStatus::DequeuedWithoutReplay => Outbound::SyncItemDequeued { id },
    }
  }
}

/// Overall result of a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
  QueueProcessed,
  NothingToSync,
}

impl Aggregate {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::QueueProcessed => "queue-processed",
      Self::NothingToSync => "nothing-to-sync",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
  pub outcomes: Vec<SyncOutcome>,
  pub aggregate: Aggregate,
}

impl FlushReport {
  pub fn count(&self, status: SyncStatus) -> usize {
    self.outcomes.iter().filter(|o| o.status == status).count()
  }

  pub fn has_failures(&self) -> bool {
    self.count(SyncStatus::Failed) > 0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Draining,
}

pub struct SyncEngine<N: Network> {
  queue: Arc<QueueStore>,
  network: Arc<N>,
  /// Relative replay URLs resolve against this
  base: Url,
  broadcaster: Arc<Broadcaster>,
  state: Mutex<SyncState>,
  /// Held for the whole drain pass so flushes never overlap
  drain: tokio::sync::Mutex<()>,
  tags: Mutex<BTreeSet<String>>,
  default_tag: String,
}

impl<N: Network> SyncEngine<N> {
  pub fn new(
    queue: Arc<QueueStore>,
    network: Arc<N>,
    base: Url,
    broadcaster: Arc<Broadcaster>,
    default_tag: impl Into<String>,
  ) -> Self {
    Self {
      queue,
      network,
      base,
      broadcaster,
      state: Mutex::new(SyncState::Idle),
      drain: tokio::sync::Mutex::new(()),
      tags: Mutex::new(BTreeSet::new()),
      default_tag: default_tag.into(),
    }
  }

  fn tags(&self) -> MutexGuard<'_, BTreeSet<String>> {
    self
      .tags
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn set_state(&self, state: SyncState) {
    *self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
  }

  pub fn state(&self) -> SyncState {
    *self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn default_tag(&self) -> &str {
    &self.default_tag
  }

  /// Register a sync tag and announce the result.
  pub fn register(&self, tag: &str) -> bool {
    if tag.trim().is_empty() {
      warn!("Rejected sync registration with an empty tag");
      self.broadcaster.broadcast(Outbound::SyncFailed {
        tag: Some(tag.to_string()),
        reason: None,
      });
      return false;
    }

    self.tags().insert(tag.to_string());
    info!("Registered sync tag '{}'", tag);
    self.broadcaster.broadcast(Outbound::SyncRegistered {
      tag: tag.to_string(),
    });
    true
  }

  pub fn registered_tags(&self) -> Vec<String> {
    self.tags().iter().cloned().collect()
  }

  /// Handle an external sync trigger.
  ///
  /// Returns `None` for tags that are neither registered nor the default.
  /// A registered tag is consumed once a drain finishes without failures.
  pub async fn on_trigger(&self, tag: &str) -> Result<Option<FlushReport>> {
    let registered = self.tags().contains(tag);
    if !registered && tag != self.default_tag {
      debug!("Ignoring sync trigger for unknown tag '{}'", tag);
      return Ok(None);
    }

    let report = self.flush().await?;
    if registered && !report.has_failures() {
      self.tags().remove(tag);
      debug!("Sync tag '{}' consumed", tag);
    }
    Ok(Some(report))
  }

  /// Run one drain pass over the whole queue.
  ///
  /// Waits for a pass already in progress to finish first. Failing to read
  /// the queue broadcasts `sync-failed` and is returned as an error.
  pub async fn flush(&self) -> Result<FlushReport> {
    let _pass = self.drain.lock().await;
    self.set_state(SyncState::Draining);
    let result = self.drain_pass().await;
    self.set_state(SyncState::Idle);
    result
  }

  async fn drain_pass(&self) -> Result<FlushReport> {
    let items = match self.queue.list_all() {
      Ok(items) => items,
      Err(e) => {
        warn!("Sync aborted, could not read queue: {}", e);
        self.broadcaster.broadcast(Outbound::SyncFailed {
          tag: None,
          reason: Some(e.to_string()),
        });
        return Err(e);
      }
    };

    info!("Draining {} queued items", items.len());
    let mut outcomes = Vec::with_capacity(items.len());
    for item in &items {
      let outcome = self.process(item).await;
      self.broadcaster.broadcast(outcome.to_message());
      outcomes.push(outcome);
    }

    let aggregate = if items.is_empty() {
      Aggregate::NothingToSync
    } else {
      Aggregate::QueueProcessed
    };
    let report = FlushReport {
      outcomes,
      aggregate,
    };

    info!(
      "Sync pass finished: {} succeeded, {} failed, {} dequeued",
      report.count(SyncStatus::Success),
      report.count(SyncStatus::Failed),
      report.count(SyncStatus::DequeuedWithoutReplay)
    );
    self.broadcaster.broadcast(Outbound::SyncSuccess {
      detail: aggregate.as_str().to_string(),
    });
    Ok(report)
  }

  async fn process(&self, item: &QueueItem) -> SyncOutcome {
    let target = match item.replay_target() {
      Ok(Some(target)) => target,
      Ok(None) => {
        return match self.queue.remove(&item.id) {
          Ok(_) => {
            debug!("Dequeued passive item {}", item.id);
            SyncOutcome::dequeued(item)
          }
          Err(e) => SyncOutcome::failed(item, e.to_string()),
        };
      }
      Err(e) => return SyncOutcome::failed(item, e.to_string()),
    };

    let request = match target.to_request(&self.base) {
      Ok(request) => request,
      Err(e) => return SyncOutcome::failed(item, e.to_string()),
    };

    match self.network.fetch(&request).await {
      Ok(response) if response.is_success() => {
        // The replay already happened; a stale row only means it will be
        // sent again, which at-least-once delivery allows.
        if let Err(e) = self.queue.remove(&item.id) {
          warn!("Replayed {} but could not dequeue it: {}", item.id, e);
        }
        debug!("Replayed {} -> {}", item.id, response.status);
        SyncOutcome::success(item)
      }
      Ok(response) => {
        debug!("Replay of {} answered {}", item.id, response.status);
        SyncOutcome::failed(item, format!("HTTP {}", response.status))
      }
      Err(e) => {
        debug!("Replay of {} failed: {}", item.id, e);
        SyncOutcome::failed(item, e.to_string())
      }
    }
  }
}
