//! User-facing notifications and their activation.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::{Broadcaster, SubscriberId};
use crate::cache::normalize_url;
use crate::config::NotificationDefaults;
use crate::messages::Outbound;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationOptions {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub badge: Option<String>,
  /// Grouping tag; a new notification replaces one with the same tag
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tag: Option<String>,
  /// Opaque routing data handed back on activation
  #[serde(default)]
  pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub title: String,
  #[serde(flatten)]
  pub options: NotificationOptions,
}

impl Notification {
  /// URL to route to on activation: `data.url`, or `/`.
  pub fn target_url(&self) -> &str {
    self
      .options
      .data
      .get("url")
      .and_then(Value::as_str)
      .filter(|url| !url.is_empty())
      .unwrap_or("/")
  }
}

/// Shape of a push payload. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  icon: Option<String>,
  badge: Option<String>,
  tag: Option<String>,
  #[serde(default)]
  data: Value,
  url: Option<String>,
}

impl PushPayload {
  /// JSON objects are read field by field and a JSON string is the body.
  /// Anything else is taken as body text.
  fn parse(data: &[u8]) -> Self {
    match serde_json::from_slice::<Value>(data) {
      Ok(object @ Value::Object(_)) => {
        if let Ok(payload) = serde_json::from_value::<PushPayload>(object) {
          return payload;
        }
      }
      Ok(Value::String(text)) => return Self::text(&text),
      _ => {}
    }
    Self::text(&String::from_utf8_lossy(data))
  }

  fn text(text: &str) -> Self {
    let text = text.trim();
    Self {
      body: (!text.is_empty()).then(|| text.to_string()),
      ..Self::default()
    }
  }
}

/// Operating-system surface the notifier talks to.
pub trait Host: Send + Sync {
  fn show_notification(&self, notification: &Notification) -> Result<()>;

  /// Open a new application view at `url`.
  fn open_view(&self, url: &Url) -> Result<()>;
}

/// Outcome of activating a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
  /// An existing view showing the target was focused
  Focused(SubscriberId),
  /// No view matched; a new one was opened
  Opened(Url),
}

pub struct Notifier {
  host: Arc<dyn Host>,
  broadcaster: Arc<Broadcaster>,
  defaults: NotificationDefaults,
  origin: Url,
}

impl Notifier {
  pub fn new(
    host: Arc<dyn Host>,
    broadcaster: Arc<Broadcaster>,
    defaults: NotificationDefaults,
    origin: Url,
  ) -> Self {
    Self {
      host,
      broadcaster,
      defaults,
      origin,
    }
  }

  /// Show a notification, filling icon, badge and tag from the configured
  /// defaults where `options` leaves them out.
  pub fn present(&self, title: &str, mut options: NotificationOptions) -> Result<Notification> {
    options.icon = options.icon.or_else(|| self.defaults.icon.clone());
    options.badge = options.badge.or_else(|| self.defaults.badge.clone());
    options.tag = options.tag.or_else(|| self.defaults.tag.clone());

    let title = if title.trim().is_empty() {
      self.defaults.title.clone()
    } else {
      title.to_string()
    };

    let notification = Notification { title, options };
    self.host.show_notification(&notification)?;
    info!("Presented notification '{}'", notification.title);
    Ok(notification)
  }

  /// Present a notification from a raw push payload.
  pub fn present_push(&self, data: &[u8]) -> Result<Notification> {
    let payload = PushPayload::parse(data);

    let mut routing = payload.data;
    if let Some(url) = payload.url {
      match &mut routing {
        Value::Object(map) => {
          map.insert("url".to_string(), Value::String(url));
        }
        Value::Null => routing = serde_json::json!({ "url": url }),
        // Non-object data is kept as-is; there is nowhere to put the url.
        _ => {}
      }
    }

    let options = NotificationOptions {
      body: payload.body,
      icon: payload.icon,
      badge: payload.badge,
      tag: payload.tag,
      data: routing,
    };
    self.present(payload.title.as_deref().unwrap_or_default(), options)
  }

  /// Route the user to the notification's target URL.
  ///
  /// If a view already shows it, exactly one such view is focused and told
  /// about the click; otherwise a new view is opened there.
  pub fn activate(&self, notification: &Notification) -> Result<Activation> {
    let target = self
      .origin
      .join(notification.target_url())
      .map_err(|e| eyre!("Invalid notification URL '{}': {}", notification.target_url(), e))?;
    let wanted = normalize_url(&target);

    let matching = self.broadcaster.find(|url| {
      self
        .origin
        .join(url)
        .map(|url| normalize_url(&url) == wanted)
        .unwrap_or(false)
    });

    if let Some(id) = matching {
      if self.broadcaster.focus(id) {
        self.broadcaster.send_to(
          id,
          Outbound::NotificationClick {
            data: notification.options.data.clone(),
          },
        );
        debug!("Focused view {} for {}", id, wanted);
        return Ok(Activation::Focused(id));
      }
    }

    self.host.open_view(&target)?;
    info!("Opened new view at {}", target);
    Ok(Activation::Opened(target))
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use std::sync::Mutex;

  /// Records what the notifier asked the host to do.
  #[derive(Default)]
  pub struct RecordingHost {
    pub shown: Mutex<Vec<Notification>>,
    pub opened: Mutex<Vec<Url>>,
  }

  impl Host for RecordingHost {
    fn show_notification(&self, notification: &Notification) -> Result<()> {
      self.shown.lock().unwrap().push(notification.clone());
      Ok(())
    }

    fn open_view(&self, url: &Url) -> Result<()> {
      self.opened.lock().unwrap().push(url.clone());
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::testing::RecordingHost;
  use super::*;
  use serde_json::json;

  fn notifier() -> (Notifier, Arc<RecordingHost>, Arc<Broadcaster>) {
    let host = Arc::new(RecordingHost::default());
    let broadcaster = Arc::new(Broadcaster::new());
    let defaults = NotificationDefaults {
      icon: Some("/icons/192.png".to_string()),
      badge: Some("/icons/badge.png".to_string()),
      ..NotificationDefaults::default()
    };
    let notifier = Notifier::new(
      host.clone(),
      broadcaster.clone(),
      defaults,
      Url::parse("https://app.example/").unwrap(),
    );
    (notifier, host, broadcaster)
  }

  #[test]
  fn test_present_fills_defaults() {
    let (notifier, host, _) = notifier();
    let options = NotificationOptions {
      body: Some("3 items synced".to_string()),
      badge: Some("/custom.png".to_string()),
      ..NotificationOptions::default()
    };

    let shown = notifier.present("Synced", options).unwrap();

    assert_eq!(shown.options.icon.as_deref(), Some("/icons/192.png"));
    assert_eq!(shown.options.badge.as_deref(), Some("/custom.png"));
    assert_eq!(host.shown.lock().unwrap().len(), 1);
  }

  #[test]
  fn test_push_payload_parsing() {
    let (notifier, _, _) = notifier();

    let shown = notifier
      .present_push(br#"{"title": "Reply", "body": "Hi", "url": "/inbox/7"}"#)
      .unwrap();
    assert_eq!(shown.title, "Reply");
    assert_eq!(shown.target_url(), "/inbox/7");

    let shown = notifier.present_push(b"plain words").unwrap();
    assert_eq!(shown.title, "New notification");
    assert_eq!(shown.options.body.as_deref(), Some("plain words"));
    assert_eq!(shown.target_url(), "/");

    let shown = notifier.present_push(br#""quoted words""#).unwrap();
    assert_eq!(shown.options.body.as_deref(), Some("quoted words"));

    let shown = notifier.present_push(b"42").unwrap();
    assert_eq!(shown.options.body.as_deref(), Some("42"));
  }

  #[test]
  fn test_activation_focuses_one_matching_view() {
    let (notifier, host, broadcaster) = notifier();
    let mut first = broadcaster.subscribe("https://app.example/inbox");
    let mut second = broadcaster.subscribe("/inbox");
    let mut other = broadcaster.subscribe("/settings");

    let notification = Notification {
      title: "Reply".to_string(),
      options: NotificationOptions {
        data: json!({"url": "/inbox", "thread": 7}),
        ..NotificationOptions::default()
      },
    };

    let activation = notifier.activate(&notification).unwrap();

    assert_eq!(activation, Activation::Focused(first.id()));
    assert_eq!(broadcaster.focused(), Some(first.id()));
    assert_eq!(
      first.drain(),
      vec![Outbound::NotificationClick {
        data: json!({"url": "/inbox", "thread": 7})
      }]
    );
    assert!(second.drain().is_empty());
    assert!(other.drain().is_empty());
    assert!(host.opened.lock().unwrap().is_empty());
  }

  #[test]
  fn test_activation_opens_view_when_nothing_matches() {
    let (notifier, host, broadcaster) = notifier();
    let _view = broadcaster.subscribe("/settings");

    let notification = Notification {
      title: "Hello".to_string(),
      options: NotificationOptions::default(),
    };

    let activation = notifier.activate(&notification).unwrap();

    let root = Url::parse("https://app.example/").unwrap();
    assert_eq!(activation, Activation::Opened(root.clone()));
    assert_eq!(*host.opened.lock().unwrap(), vec![root]);
  }

  #[test]
  fn test_unreachable_views_are_not_focused() {
    let (notifier, host, broadcaster) = notifier();
    drop(broadcaster.subscribe("/inbox"));

    let notification = Notification {
      title: "Reply".to_string(),
      options: NotificationOptions {
        data: json!({"url": "/inbox"}),
        ..NotificationOptions::default()
      },
    };

    assert!(matches!(
      notifier.activate(&notification).unwrap(),
      Activation::Opened(_)
    ));
    assert_eq!(host.opened.lock().unwrap().len(), 1);
  }
}
