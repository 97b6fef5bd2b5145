//! Test doubles for the network transport.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::cache::Payload;
use crate::error::{Error, Result};
use crate::network::Transport;

/// Scripted transport. Unless told otherwise, every URL answers 200 with
/// its own URL as the body.
#[derive(Default)]
pub struct MockTransport {
  failing: HashSet<String>,
  redirects: HashMap<String, Url>,
  offline: AtomicBool,
  total: AtomicUsize,
  calls: Mutex<Vec<String>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn failing(mut self, url: &str) -> Self {
    self.failing.insert(url.to_string());
    self
  }

  /// Answer requests for `from` as if redirected to `to`.
  pub fn redirecting(mut self, from: &str, to: &str) -> Self {
    self.redirects.insert(from.to_string(), url(to));
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn fetch_count(&self) -> usize {
    self.total.load(Ordering::SeqCst)
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn fetch(&self, target: &Url) -> Result<Payload> {
    self.total.fetch_add(1, Ordering::SeqCst);
    self.calls.lock().unwrap().push(target.to_string());
    tokio::task::yield_now().await;

    if self.offline.load(Ordering::SeqCst) || self.failing.contains(target.as_str()) {
      return Err(Error::network(target.as_str(), "connection refused"));
    }

    let resolved = self
      .redirects
      .get(target.as_str())
      .cloned()
      .unwrap_or_else(|| target.clone());
    Ok(body_for(&resolved))
  }
}

pub fn url(s: &str) -> Url {
  Url::parse(s).unwrap()
}

/// The payload `MockTransport` returns for `resolved`.
pub fn body_for(resolved: &Url) -> Payload {
  let mut resolved = resolved.clone();
  resolved.set_fragment(None);
  Payload::new(resolved.clone(), 200, resolved.as_str().as_bytes().to_vec())
    .with_header("content-type", "application/octet-stream")
}
