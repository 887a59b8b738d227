//! Scripted in-process network for tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::client::Network;
use super::types::{Request, Response};

struct Route {
  /// Remaining attempts that fail with a connection error before `response`
  /// is served.
  failures_left: usize,
  response: Response,
}

/// A fake network with per-URL canned responses and an online switch.
///
/// URLs without a route answer 404.
pub struct FakeNetwork {
  online: AtomicBool,
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<Request>>,
  delay: Mutex<Option<Duration>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
      routes: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
      delay: Mutex::new(None),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn respond(&self, url: &str, response: Response) {
    self.fail_then_respond(url, 0, response);
  }

  /// Fail the next `failures` calls to `url`, then serve `response`.
  pub fn fail_then_respond(&self, url: &str, failures: usize, response: Response) {
    self.routes.lock().unwrap().insert(
      url.to_string(),
      Route {
        failures_left: failures,
        response,
      },
    );
  }

  pub fn ok(&self, url: &str, body: &str) {
    self.respond(url, Response::new(200).with_body(body));
  }

  /// Delay every response by `delay`.
  pub fn set_delay(&self, delay: Option<Duration>) {
    *self.delay.lock().unwrap() = delay;
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url.as_str() == url)
      .count()
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.clone());

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if !self.online.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable: {}", request.url));
    }

    let mut routes = self.routes.lock().unwrap();
    match routes.get_mut(request.url.as_str()) {
      Some(route) if route.failures_left > 0 => {
        route.failures_left -= 1;
        Err(eyre!("connection reset: {}", request.url))
      }
      Some(route) => Ok(route.response.clone()),
      None => Ok(Response::new(404)),
    }
  }
}
