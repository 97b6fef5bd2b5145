//! Ownership of the active cache generation.

use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{CacheKey, CacheStore, Payload};
use crate::error::Result;

/// Generation label used when the configuration does not name one.
///
/// Must change whenever the set of offline-eligible assets changes, or
/// reaping will keep serving the old entries.
pub const DEFAULT_GENERATION: &str = "1.0.0";

/// Owns the current generation id. Every write into the cache goes through
/// here, so nothing else needs to know which generation is active.
pub struct GenerationManager {
  current: String,
  store: Arc<dyn CacheStore>,
}

/// Outcome of removing obsolete generations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
  pub deleted: Vec<String>,
  /// Generations that could not be deleted, with the reason
  pub failed: Vec<(String, String)>,
}

impl GenerationManager {
  pub fn new(current: impl Into<String>, store: Arc<dyn CacheStore>) -> Self {
    Self {
      current: current.into(),
      store,
    }
  }

  pub fn current_generation_id(&self) -> &str {
    &self.current
  }

  /// Create the current generation if it does not exist yet.
  pub fn open_current(&self) -> Result<()> {
    self.store.open(&self.current)
  }

  /// Store one entry in the current generation.
  pub fn write(&self, key: &CacheKey, payload: &Payload) -> Result<()> {
    self.store.put(&self.current, key, payload)
  }

  /// Store a batch in the current generation, all or nothing. An empty batch
  /// still creates the generation.
  pub fn commit(&self, entries: &[(CacheKey, Payload)]) -> Result<()> {
    self.store.put_all(&self.current, entries)
  }

  /// Find an entry, preferring the current generation.
  pub fn lookup(&self, key: &CacheKey) -> Result<Option<Payload>> {
    self.store.lookup(key, &self.current)
  }

  pub fn generations(&self) -> Result<Vec<String>> {
    self.store.generations()
  }

  /// Delete every generation other than the current one.
  ///
  /// Only a failure to list generations is an error. Each deletion is
  /// attempted regardless of earlier failures; failures are logged and
  /// reported, not retried.
  pub fn reap_obsolete(&self) -> Result<ReapReport> {
    let mut report = ReapReport::default();

    for name in self.store.generations()? {
      if name == self.current {
        continue;
      }

      info!("Deleting obsolete cache: {}", name);
      match self.store.delete_generation(&name) {
        Ok(_) => report.deleted.push(name),
        Err(e) => {
          warn!("Failed to delete obsolete cache {}: {}", name, e);
          report.failed.push((name, e.to_string()));
        }
      }
    }

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;

  fn manager_with(store: MemoryStore, generations: &[&str]) -> GenerationManager {
    for g in generations {
      store.open(g).unwrap();
    }
    GenerationManager::new("v3", Arc::new(store))
  }

  #[test]
  fn test_reap_leaves_only_current() {
    let manager = manager_with(MemoryStore::new(), &["v1", "v2", "v3", "scratch"]);

    let report = manager.reap_obsolete().unwrap();

    assert_eq!(report.deleted, vec!["v1", "v2", "scratch"]);
    assert!(report.failed.is_empty());
    assert_eq!(manager.generations().unwrap(), vec!["v3"]);
  }

  #[test]
  fn test_reap_is_best_effort() {
    let store = MemoryStore::new().fail_deletes_of("v1");
    let manager = manager_with(store, &["v1", "v2", "v3"]);

    let report = manager.reap_obsolete().unwrap();

    assert_eq!(report.deleted, vec!["v2"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "v1");
    assert_eq!(manager.generations().unwrap(), vec!["v1", "v3"]);
  }

  #[test]
  fn test_reap_with_nothing_obsolete() {
    let manager = manager_with(MemoryStore::new(), &["v3"]);
    assert_eq!(manager.reap_obsolete().unwrap(), ReapReport::default());
  }

  #[test]
  fn test_open_current_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    store.open("v1").unwrap();
    let manager = GenerationManager::new("v3", store.clone());

    manager.open_current().unwrap();
    manager.open_current().unwrap();

    assert_eq!(manager.generations().unwrap(), vec!["v1", "v3"]);
    assert_eq!(store.entry_count("v3").unwrap(), 0);
  }

  #[test]
  fn test_writes_land_in_current_generation() {
    let store = Arc::new(MemoryStore::new());
    store.open("v1").unwrap();
    let manager = GenerationManager::new("v3", store.clone());
    let payload = crate::testing::body_for(&crate::testing::url("https://a/assets/x.js"));
    let key = CacheKey::from("https://a/assets/x.js");

    manager.write(&key, &payload).unwrap();
    manager.commit(&[]).unwrap();

    assert_eq!(store.entry_count("v3").unwrap(), 1);
    assert_eq!(store.entry_count("v1").unwrap(), 0);
    assert_eq!(manager.generations().unwrap(), vec!["v1", "v3"]);
    assert_eq!(manager.lookup(&key).unwrap(), Some(payload));
  }
}
