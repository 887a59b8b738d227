//! Queue item types.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use url::Url;

use crate::net::{Headers, Request};

/// What a queued item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemKind {
  /// Backup of application state; never sent anywhere
  StateSnapshot,
  /// Deferred request, replayed when it declares a target
  Action,
}

impl ItemKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::StateSnapshot => "state-snapshot",
      Self::Action => "action",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "state-snapshot" => Ok(Self::StateSnapshot),
      "action" => Ok(Self::Action),
      other => Err(eyre!("Unknown queue item kind '{}'", other)),
    }
  }

  fn id_prefix(self) -> &'static str {
    match self {
      Self::StateSnapshot => "state",
      Self::Action => "action",
    }
  }
}

/// An item owned by the queue store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
  pub id: String,
  pub kind: ItemKind,
  pub payload: Value,
  pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
  /// The replay target, if this item should be sent over the network.
  ///
  /// State snapshots are always passive, whatever their payload contains.
  pub fn replay_target(&self) -> Result<Option<ReplayTarget>> {
    match self.kind {
      ItemKind::Action => ReplayTarget::from_payload(&self.payload),
      ItemKind::StateSnapshot => Ok(None),
    }
  }
}

/// An item about to be enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
  /// Caller-chosen id; one is generated when absent
  pub id: Option<String>,
  pub kind: ItemKind,
  pub payload: Value,
}

impl NewItem {
  pub fn action(payload: Value) -> Self {
    Self {
      id: None,
      kind: ItemKind::Action,
      payload,
    }
  }

  pub fn snapshot(state: Value) -> Self {
    Self {
      id: None,
      kind: ItemKind::StateSnapshot,
      payload: state,
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }
}

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Generate a unique id that sorts by enqueue time.
///
/// Format: `<kind>-<unix millis, 13 digits>-<pid>-<sequence>`; the pid keeps
/// ids from separate processes sharing one store apart.
pub fn generate_id(kind: ItemKind, now: DateTime<Utc>) -> String {
  let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
  format!(
    "{}-{:013}-{:x}-{:04x}",
    kind.id_prefix(),
    now.timestamp_millis(),
    std::process::id(),
    sequence & 0xffff
  )
}

/// Endpoint, method, headers and body declared by a queued action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplayTarget {
  pub url: String,
  #[serde(default = "default_method")]
  pub method: String,
  #[serde(default)]
  pub headers: Headers,
  #[serde(default)]
  pub body: Option<Value>,
}

fn default_method() -> String {
  "POST".to_string()
}

impl ReplayTarget {
  /// Extract a target from an action payload. A payload without a non-empty
  /// `url` is a passive record; one with a `url` but malformed fields is an
  /// error so the item is kept rather than silently dropped.
  pub fn from_payload(payload: &Value) -> Result<Option<Self>> {
    let declares_url = payload
      .get("url")
      .and_then(Value::as_str)
      .map(|url| !url.trim().is_empty())
      .unwrap_or(false);
    if !declares_url {
      return Ok(None);
    }
    serde_json::from_value(payload.clone())
      .map(Some)
      .map_err(|e| eyre!("Malformed replay target: {}", e))
  }

  /// Build the request, resolving a relative URL against `base`.
  ///
  /// String bodies are sent verbatim; any other JSON body is serialized and
  /// gets a JSON content type unless one was declared.
  pub fn to_request(&self, base: &Url) -> Result<Request> {
    let url = base
      .join(&self.url)
      .map_err(|e| eyre!("Invalid replay URL '{}': {}", self.url, e))?;

    let mut request = Request::new(&self.method, url);
    for (name, value) in &self.headers {
      request = request.with_header(name, value.clone());
    }

    match &self.body {
      None | Some(Value::Null) => {}
      Some(Value::String(text)) => request = request.with_body(text.clone()),
      Some(json) => {
        let body = serde_json::to_vec(json)
          .map_err(|e| eyre!("Failed to serialize replay body: {}", e))?;
        if request.header("content-type").is_none() {
          request = request.with_header("content-type", "application/json");
        }
        request = request.with_body(body);
      }
    }

    Ok(request)
  }
}
