//! Messages exchanged with application views.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broadcast::NotificationOptions;

/// Application → core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Inbound {
  /// Activate the installed generation without waiting
  ActivateNow,
  /// Keep a backup of application state
  SaveState { state: Value },
  /// Queue an action `{url?, method?, headers?, body?}` for replay
  QueueAction { action: Value },
  RegisterSync { tag: String },
  Notify {
    title: String,
    #[serde(default)]
    options: NotificationOptions,
  },
  ClearCache,
  PlayChime,
}

/// Core → application views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Outbound {
  SwReady {
    version: String,
  },
  SwSaved {
    id: String,
  },
  SwQueued {
    id: String,
  },
  SyncRegistered {
    tag: String,
  },
  /// A rejected registration (`tag`) or a drain that could not run
  /// (`reason`)
  SyncFailed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
  },
  SyncItemSuccess {
    id: String,
  },
  SyncItemFailed {
    id: String,
    reason: String,
  },
  SyncItemDequeued {
    id: String,
  },
  SyncSuccess {
    detail: String,
  },
  CacheCleared,
  PlayChime,
  NotificationClick {
    data: Value,
  },
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_inbound_discriminants() {
    let msg: Inbound = serde_json::from_value(json!({"command": "activate-now"})).unwrap();
    assert_eq!(msg, Inbound::ActivateNow);

    let msg: Inbound = serde_json::from_value(json!({
      "command": "queue-action",
      "action": {"url": "/api", "method": "POST", "body": {"x": 1}}
    }))
    .unwrap();
    assert!(matches!(msg, Inbound::QueueAction { .. }));

    let msg: Inbound =
      serde_json::from_value(json!({"command": "notify", "title": "Hi"})).unwrap();
    assert_eq!(
      msg,
      Inbound::Notify {
        title: "Hi".to_string(),
        options: NotificationOptions::default()
      }
    );

    assert!(serde_json::from_value::<Inbound>(json!({"command": "reboot"})).is_err());
  }

  #[test]
  fn test_outbound_wire_format() {
    assert_eq!(
      serde_json::to_value(Outbound::SyncItemFailed {
        id: "action-1".to_string(),
        reason: "HTTP 500".to_string()
      })
      .unwrap(),
      json!({"type": "sync-item-failed", "id": "action-1", "reason": "HTTP 500"})
    );
    assert_eq!(
      serde_json::to_value(Outbound::SyncFailed {
        tag: Some(String::new()),
        reason: None
      })
      .unwrap(),
      json!({"type": "sync-failed", "tag": ""})
    );
    assert_eq!(
      serde_json::to_value(Outbound::CacheCleared).unwrap(),
      json!({"type": "cache-cleared"})
    );
    assert_eq!(
      serde_json::to_value(Outbound::SwReady {
        version: "v2".to_string()
      })
      .unwrap(),
      json!({"type": "sw-ready", "version": "v2"})
    );
  }
}
