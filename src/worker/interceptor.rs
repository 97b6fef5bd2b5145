//! Fetch-time decision and dispatch.

use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use super::generation::GenerationManager;
use crate::cache::{CacheKey, CachePolicy, FetchOutcome, KeyScheme, Payload};
use crate::network::Transport;

/// Serves eligible resources cache-first and everything else network-first.
///
/// Never fails: every request ends in a network response, a cached
/// response, or [`FetchOutcome::NoContent`].
pub struct RequestInterceptor {
  policy: CachePolicy,
  keys: KeyScheme,
  transport: Arc<dyn Transport>,
  generations: Arc<GenerationManager>,
}

impl RequestInterceptor {
  pub fn new(
    policy: CachePolicy,
    keys: KeyScheme,
    transport: Arc<dyn Transport>,
    generations: Arc<GenerationManager>,
  ) -> Self {
    Self {
      policy,
      keys,
      transport,
      generations,
    }
  }

  pub async fn handle(&self, url: &Url) -> FetchOutcome {
    let key = self.keys.request_key(url);

    if self.policy.is_cache_eligible(&key) {
      self.cache_first(url, key).await
    } else {
      self.network_first(url).await
    }
  }

  async fn cache_first(&self, url: &Url, key: CacheKey) -> FetchOutcome {
    if let Some(cached) = self.lookup(&key) {
      debug!("Cache hit: {}", key);
      return FetchOutcome::Cache(cached);
    }

    match self.transport.fetch(url).await {
      Ok(response) => {
        // Two owned buffers: one for the store, one for the caller.
        let stored = response.clone();
        if let Err(e) = self.generations.write(&key, &stored) {
          warn!("Failed to cache {}: {}", key, e);
        }
        FetchOutcome::Network(response)
      }
      Err(e) => {
        error!("Fetch error: {}", e);
        FetchOutcome::from_cache(self.lookup(&key))
      }
    }
  }

  async fn network_first(&self, url: &Url) -> FetchOutcome {
    match self.transport.fetch(url).await {
      Ok(response) => FetchOutcome::Network(response),
      Err(e) => {
        info!("Fallback to offline cache: {} ({})", url, e);
        FetchOutcome::from_cache(self.lookup(&self.keys.fallback_key(url)))
      }
    }
  }

  /// Store lookup where a storage failure counts as a miss.
  fn lookup(&self, key: &CacheKey) -> Option<Payload> {
    match self.generations.lookup(key) {
      Ok(found) => found,
      Err(e) => {
        warn!("Cache lookup for {} failed: {}", key, e);
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheStore, MemoryStore};
  use crate::testing::{body_for, url, MockTransport};

  struct Fixture {
    store: Arc<MemoryStore>,
    transport: Arc<MockTransport>,
    interceptor: RequestInterceptor,
  }

  fn fixture(keys: KeyScheme) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::new());
    let generations = Arc::new(GenerationManager::new("1.0.0", store.clone()));
    let interceptor =
      RequestInterceptor::new(CachePolicy::default(), keys, transport.clone(), generations);
    Fixture {
      store,
      transport,
      interceptor,
    }
  }

  fn seed(store: &MemoryStore, key: &str, body: &str) {
    let payload = Payload::new(url(key), 200, body.as_bytes().to_vec());
    store.put("1.0.0", &CacheKey::from(key), &payload).unwrap();
  }

  #[tokio::test]
  async fn test_eligible_hit_skips_network() {
    let f = fixture(KeyScheme::Split);
    seed(&f.store, "https://a/assets/app.js", "cached");

    let outcome = f.interceptor.handle(&url("https://a/assets/app.js?v=9")).await;

    assert_eq!(f.transport.fetch_count(), 0);
    match outcome {
      FetchOutcome::Cache(p) => assert_eq!(p.body, b"cached"),
      other => panic!("expected cache hit, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_eligible_miss_stores_identical_copy() {
    let f = fixture(KeyScheme::Split);
    let request = url("https://a/vendor/lib.js?v=1");

    let outcome = f.interceptor.handle(&request).await;

    let returned = match outcome {
      FetchOutcome::Network(p) => p,
      other => panic!("expected network response, got {:?}", other),
    };
    let stored = f
      .store
      .lookup(&CacheKey::from("https://a/vendor/lib.js"), "1.0.0")
      .unwrap()
      .unwrap();
    assert_eq!(stored, returned);
    assert_eq!(stored.digest(), returned.digest());
    assert_eq!(f.transport.fetch_count(), 1);

    // Second request is served from the cache.
    let again = f.interceptor.handle(&request).await;
    assert!(matches!(again, FetchOutcome::Cache(_)));
    assert_eq!(f.transport.fetch_count(), 1);
  }

  #[tokio::test]
  async fn test_eligible_offline_miss_is_no_content() {
    let f = fixture(KeyScheme::Split);
    f.transport.set_offline(true);

    let outcome = f.interceptor.handle(&url("https://a/assets/missing.png")).await;

    assert_eq!(outcome, FetchOutcome::NoContent);
  }

  #[tokio::test]
  async fn test_non_eligible_prefers_network() {
    let f = fixture(KeyScheme::Split);
    seed(&f.store, "https://a/api/feed?page=1", "stale");

    let outcome = f.interceptor.handle(&url("https://a/api/feed?page=1")).await;

    assert_eq!(
      outcome,
      FetchOutcome::Network(body_for(&url("https://a/api/feed?page=1")))
    );
    // Network-first responses are not written back.
    assert_eq!(f.store.entry_count("1.0.0").unwrap(), 1);
  }

  #[tokio::test]
  async fn test_fallback_keys_differ_between_paths() {
    let f = fixture(KeyScheme::Split);
    f.transport.set_offline(true);
    // Stored under origin+path only.
    seed(&f.store, "https://a/api/feed", "by-path");
    seed(&f.store, "https://a/assets/logo.png", "by-path");

    // Non-eligible fallback looks up the full URL and misses.
    let non_eligible = f.interceptor.handle(&url("https://a/api/feed?page=1")).await;
    assert_eq!(non_eligible, FetchOutcome::NoContent);

    // Eligible fallback uses origin+path and hits.
    let eligible = f.interceptor.handle(&url("https://a/assets/logo.png?page=1")).await;
    assert!(matches!(eligible, FetchOutcome::Cache(_)));

    // Stored under the full URL, the non-eligible fallback finds it.
    seed(&f.store, "https://a/api/feed?page=1", "by-url");
    match f.interceptor.handle(&url("https://a/api/feed?page=1")).await {
      FetchOutcome::Cache(p) => assert_eq!(p.body, b"by-url"),
      other => panic!("expected cache fallback, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_canonical_fallback_uses_origin_path() {
    let f = fixture(KeyScheme::Canonical);
    f.transport.set_offline(true);
    seed(&f.store, "https://a/api/feed", "by-path");

    let outcome = f.interceptor.handle(&url("https://a/api/feed?page=1")).await;

    assert!(matches!(outcome, FetchOutcome::Cache(_)));
  }
}
