//! The caching worker: lifecycle, precache, interception and messages.
//!
//! A [`Worker`] wires the components together around one shared
//! [`GenerationManager`]. The host runtime delivers the four entry points:
//! - `install`: precache every favorite into the current generation
//! - `activate`: reap obsolete generations and take over clients
//! - `fetch`: serve a request through the interceptor
//! - `handle_message`: apply an update from the owning application

pub mod channel;
pub mod generation;
pub mod interceptor;
pub mod lifecycle;
pub mod precache;

pub use channel::{IncomingMessage, MessageKind, MessageOutcome, UpdateChannel};
pub use generation::{GenerationManager, ReapReport};
pub use interceptor::RequestInterceptor;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use precache::{PrecacheOrchestrator, PrecacheReport};

use std::sync::Arc;
use tracing::{error, info};
use url::Url;

use crate::cache::{CachePolicy, CacheStore, FetchOutcome, KeyScheme};
use crate::config::Config;
use crate::error::Result;
use crate::favorites::FavoritesRepository;
use crate::network::Transport;

/// Settings the worker needs from the configuration.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
  pub generation: String,
  pub favorites_prefix: String,
  pub key_scheme: KeyScheme,
  pub policy: CachePolicy,
  pub base_url: Option<Url>,
}

impl Default for WorkerOptions {
  fn default() -> Self {
    Self {
      generation: generation::DEFAULT_GENERATION.to_string(),
      favorites_prefix: crate::favorites::DEFAULT_PREFIX.to_string(),
      key_scheme: KeyScheme::default(),
      policy: CachePolicy::default(),
      base_url: None,
    }
  }
}

impl From<&Config> for WorkerOptions {
  fn from(config: &Config) -> Self {
    Self {
      generation: config.cache_version.clone(),
      favorites_prefix: config.favorites_prefix.clone(),
      key_scheme: config.key_scheme,
      policy: CachePolicy::new(&config.policy.segments, &config.policy.suffixes),
      base_url: config.base_url.clone(),
    }
  }
}

pub struct Worker {
  generations: Arc<GenerationManager>,
  lifecycle: Lifecycle,
  precache: PrecacheOrchestrator,
  interceptor: RequestInterceptor,
  channel: UpdateChannel,
}

impl Worker {
  pub fn new(
    options: WorkerOptions,
    store: Arc<dyn CacheStore>,
    favorites: Arc<dyn FavoritesRepository>,
    transport: Arc<dyn Transport>,
  ) -> Self {
    let generations = Arc::new(GenerationManager::new(options.generation, store));

    let precache = PrecacheOrchestrator::new(
      favorites,
      transport.clone(),
      generations.clone(),
      options.favorites_prefix,
      options.key_scheme,
      options.base_url.clone(),
    );
    let interceptor = RequestInterceptor::new(
      options.policy,
      options.key_scheme,
      transport.clone(),
      generations.clone(),
    );
    let channel = UpdateChannel::new(
      transport,
      generations.clone(),
      options.key_scheme,
      options.base_url,
    );

    Self {
      generations,
      lifecycle: Lifecycle::new(),
      precache,
      interceptor,
      channel,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  pub fn generations(&self) -> &GenerationManager {
    &self.generations
  }

  /// Precache every favorite, then ask to be activated right away.
  ///
  /// On failure nothing is committed and the worker becomes redundant; a
  /// later install may try again.
  pub async fn install(&self) -> Result<PrecacheReport> {
    self.lifecycle.begin_install()?;

    match self.precache.precache_all_favorites().await {
      Ok(report) => {
        self.lifecycle.force_immediate_activation();
        self.lifecycle.finish_install(true);
        info!("Installed!");
        Ok(report)
      }
      Err(e) => {
        self.lifecycle.finish_install(false);
        error!("Install failed: {}", e);
        Err(e)
      }
    }
  }

  /// Make sure the current generation exists, drop obsolete ones, then take
  /// over every client.
  pub async fn activate(&self) -> Result<ReapReport> {
    self.lifecycle.begin_activate()?;

    let reaped = self
      .generations
      .open_current()
      .and_then(|()| self.generations.reap_obsolete());
    let report = match reaped {
      Ok(report) => report,
      Err(e) => {
        self.lifecycle.abort_activate();
        error!("Activation failed: {}", e);
        return Err(e);
      }
    };

    self.lifecycle.take_over_existing_clients();
    self.lifecycle.finish_activate()?;
    info!("Activated!");

    Ok(report)
  }

  pub async fn fetch(&self, url: &Url) -> FetchOutcome {
    self.interceptor.handle(url).await
  }

  pub async fn handle_message(&self, message: IncomingMessage) -> Result<MessageOutcome> {
    self.channel.handle(message).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheKey, MemoryStore};
  use crate::error::Error;
  use crate::favorites::MemoryFavorites;
  use crate::testing::{url, MockTransport};

  fn worker(store: Arc<MemoryStore>, favorites: MemoryFavorites, transport: Arc<MockTransport>) -> Worker {
    let options = WorkerOptions {
      generation: "2.0.0".to_string(),
      ..WorkerOptions::default()
    };
    Worker::new(options, store, Arc::new(favorites), transport)
  }

  #[tokio::test]
  async fn test_install_then_activate() {
    let store = Arc::new(MemoryStore::new());
    store.open("1.0.0").unwrap();
    let favorites = MemoryFavorites::with_items([(
      "favorites:cat",
      r#"{"fallback": "https://a/assets/cat.gif", "sources": [{"url": "https://a/assets/cat.mp4"}]}"#,
    )]);
    let transport = Arc::new(MockTransport::new());
    let w = worker(store.clone(), favorites, transport.clone());

    let precached = w.install().await.unwrap();
    assert_eq!(precached.stored, 2);
    assert_eq!(w.state(), LifecycleState::Installed);

    let reaped = w.activate().await.unwrap();
    assert_eq!(reaped.deleted, vec!["1.0.0"]);
    assert_eq!(w.state(), LifecycleState::Activated);
    assert_eq!(store.generations().unwrap(), vec!["2.0.0"]);

    // Precached assets are now served offline.
    transport.set_offline(true);
    let outcome = w.fetch(&url("https://a/assets/cat.gif")).await;
    assert!(matches!(outcome, FetchOutcome::Cache(_)));
  }

  #[tokio::test]
  async fn test_failed_install_blocks_activation() {
    let store = Arc::new(MemoryStore::new());
    store.open("1.0.0").unwrap();
    let favorites =
      MemoryFavorites::with_items([("favorites:cat", r#"{"fallback": "https://a/cat.gif"}"#)]);
    let transport = Arc::new(MockTransport::new().failing("https://a/cat.gif"));
    let w = worker(store.clone(), favorites, transport);

    assert!(w.install().await.is_err());
    assert_eq!(w.state(), LifecycleState::Redundant);
    assert!(matches!(w.activate().await, Err(Error::Lifecycle { .. })));

    // The previous generation is untouched and still serves.
    assert_eq!(store.generations().unwrap(), vec!["1.0.0"]);
  }

  #[tokio::test]
  async fn test_previous_generation_serves_before_activation() {
    let store = Arc::new(MemoryStore::new());
    let old = crate::testing::body_for(&url("https://a/vendor/lib.js"));
    store
      .put("1.0.0", &CacheKey::from("https://a/vendor/lib.js"), &old)
      .unwrap();
    let transport = Arc::new(MockTransport::new());
    let w = worker(store, MemoryFavorites::new(), transport.clone());

    let outcome = w.fetch(&url("https://a/vendor/lib.js")).await;

    assert_eq!(outcome, FetchOutcome::Cache(old));
    assert_eq!(transport.fetch_count(), 0);
  }

  #[tokio::test]
  async fn test_message_extends_current_generation() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::new());
    let w = worker(store.clone(), MemoryFavorites::new(), transport);
    w.install().await.unwrap();
    w.activate().await.unwrap();

    let outcome = w
      .handle_message(IncomingMessage {
        message: "favorite:add".to_string(),
        id: "dog".to_string(),
        data: serde_json::json!({"fallback": "https://a/dog.gif"}),
      })
      .await
      .unwrap();

    assert!(matches!(outcome, MessageOutcome::FavoriteAdded { stored: 1, .. }));
    assert_eq!(store.entry_count("2.0.0").unwrap(), 1);
  }
}
