//! Live signaling to application views.
//!
//! Delivery is best-effort: a view whose receiver is gone is skipped and
//! forgotten. Nothing is queued for views that are not connected; durable
//! delivery is the queue's job.

mod notification;

pub use notification::{Activation, Host, Notification, NotificationOptions, Notifier};
#[cfg(test)]
pub(crate) use notification::testing;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::messages::Outbound;

pub type SubscriberId = u64;

/// Internal subscriber state.
struct Subscriber {
  /// URL the view is currently showing
  url: String,
  sender: mpsc::UnboundedSender<Outbound>,
}

impl Subscriber {
  fn is_reachable(&self) -> bool {
    !self.sender.is_closed()
  }
}

/// Receiving end held by a view. Dropping it makes the view unreachable.
pub struct SubscriberHandle {
  id: SubscriberId,
  receiver: mpsc::UnboundedReceiver<Outbound>,
}

impl SubscriberHandle {
  pub fn id(&self) -> SubscriberId {
    self.id
  }

  pub async fn recv(&mut self) -> Option<Outbound> {
    self.receiver.recv().await
  }

  pub fn try_recv(&mut self) -> Option<Outbound> {
    self.receiver.try_recv().ok()
  }

  /// Everything delivered so far.
  pub fn drain(&mut self) -> Vec<Outbound> {
    std::iter::from_fn(|| self.try_recv()).collect()
  }
}

/// Registry of connected views.
pub struct Broadcaster {
  subscribers: Mutex<BTreeMap<SubscriberId, Subscriber>>,
  next_id: AtomicU64,
  focused: Mutex<Option<SubscriberId>>,
}

impl Broadcaster {
  pub fn new() -> Self {
    Self {
      subscribers: Mutex::new(BTreeMap::new()),
      next_id: AtomicU64::new(1),
      focused: Mutex::new(None),
    }
  }

  fn subscribers(&self) -> std::sync::MutexGuard<'_, BTreeMap<SubscriberId, Subscriber>> {
    // A poisoned registry only means a panicking sender; the map itself is
    // still consistent.
    self
      .subscribers
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Connect a view showing `url`.
  pub fn subscribe(&self, url: &str) -> SubscriberHandle {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let (sender, receiver) = mpsc::unbounded_channel();
    self.subscribers().insert(
      id,
      Subscriber {
        url: url.to_string(),
        sender,
      },
    );
    debug!("View {} connected at {}", id, url);
    SubscriberHandle { id, receiver }
  }

  /// Record that a view navigated to `url`.
  pub fn navigate(&self, id: SubscriberId, url: &str) {
    if let Some(subscriber) = self.subscribers().get_mut(&id) {
      subscriber.url = url.to_string();
    }
  }

  /// Detach a view. Its handle sees the end of the stream after anything
  /// already delivered.
  pub fn unsubscribe(&self, id: SubscriberId) {
    self.subscribers().remove(&id);
  }

  /// Deliver `message` to every reachable view. Returns how many received
  /// it.
  pub fn broadcast(&self, message: Outbound) -> usize {
    let mut subscribers = self.subscribers();
    let mut delivered = 0;
    subscribers.retain(|id, subscriber| {
      if subscriber.sender.send(message.clone()).is_ok() {
        delivered += 1;
        true
      } else {
        debug!("View {} is gone, dropping it", id);
        false
      }
    });
    debug!("Broadcast {:?} to {} views", message, delivered);
    delivered
  }

  /// Deliver `message` to one view.
  pub fn send_to(&self, id: SubscriberId, message: Outbound) -> bool {
    let mut subscribers = self.subscribers();
    let Some(subscriber) = subscribers.get(&id) else {
      return false;
    };
    if subscriber.sender.send(message).is_ok() {
      true
    } else {
      subscribers.remove(&id);
      false
    }
  }

  /// First reachable view (lowest id) whose URL satisfies `matches`.
  pub fn find(&self, matches: impl Fn(&str) -> bool) -> Option<SubscriberId> {
    self
      .subscribers()
      .iter()
      .find(|(_, subscriber)| subscriber.is_reachable() && matches(&subscriber.url))
      .map(|(id, _)| *id)
  }

  /// Give focus to `id`, taking it from whichever view had it.
  pub fn focus(&self, id: SubscriberId) -> bool {
    let reachable = self
      .subscribers()
      .get(&id)
      .map(Subscriber::is_reachable)
      .unwrap_or(false);
    if !reachable {
      warn!("Cannot focus view {}: not connected", id);
      return false;
    }
    *self
      .focused
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(id);
    true
  }

  pub fn focused(&self) -> Option<SubscriberId> {
    *self
      .focused
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Number of views currently reachable.
  pub fn len(&self) -> usize {
    self
      .subscribers()
      .values()
      .filter(|subscriber| subscriber.is_reachable())
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Default for Broadcaster {
  fn default() -> Self {
    Self::new()
  }
}
