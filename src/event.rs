use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::net::{Network, Request};

/// Events that drive a long-running worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  /// Periodic sync timer
  Tick,
  /// The probe URL became reachable
  Online,
  /// The probe URL stopped answering
  Offline,
  /// Ctrl-C
  Shutdown,
}

/// Turns probe results into connectivity transitions.
#[derive(Debug, Default)]
pub struct Connectivity {
  online: Option<bool>,
}

impl Connectivity {
  /// Record one probe result. The first observation and every change
  /// produce an event; repeats don't.
  pub fn observe(&mut self, reachable: bool) -> Option<Event> {
    if self.online == Some(reachable) {
      return None;
    }
    self.online = Some(reachable);
    Some(if reachable { Event::Online } else { Event::Offline })
  }

  pub fn is_online(&self) -> Option<bool> {
    self.online
  }
}

/// Event handler that produces events from a sync timer, a connectivity
/// probe and Ctrl-C
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler. Without a probe URL no connectivity
  /// events are produced.
  pub fn new<N: Network>(
    network: Arc<N>,
    tick_rate: Duration,
    probe: Option<Url>,
    probe_interval: Duration,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Sync timer
    let ticks = tx.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      // The first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        if ticks.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    // Connectivity probe
    if let Some(url) = probe {
      let transitions = tx.clone();
      tokio::spawn(async move {
        let mut interval = tokio::time::interval(probe_interval);
        let mut connectivity = Connectivity::default();
        loop {
          interval.tick().await;
          let reachable = match network.fetch(&Request::get(url.clone())).await {
            Ok(_) => true,
            Err(e) => {
              debug!("Probe of {} failed: {}", url, e);
              false
            }
          };
          if let Some(event) = connectivity.observe(reachable) {
            if transitions.send(event).is_err() {
              break;
            }
          }
        }
      });
    }

    // Shutdown
    tokio::spawn(async move {
      match tokio::signal::ctrl_c().await {
        Ok(()) => {
          let _ = tx.send(Event::Shutdown);
        }
        Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
