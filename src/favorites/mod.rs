//! Read-only access to the favorites the owning application has stored.
//!
//! Records live in a durable key-value store under keys of the form
//! `<prefix><id>`, each value a JSON-encoded [`FavoriteRecord`].

mod sqlite;

pub use sqlite::SqliteFavorites;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;
use url::Url;

use crate::error::{Error, Result};

/// Key prefix marking favorite records.
pub const DEFAULT_PREFIX: &str = "favorites:";

/// Durable key-value store holding favorite records.
pub trait FavoritesRepository: Send + Sync {
  fn list_keys(&self) -> Result<Vec<String>>;

  /// Raw JSON value stored under `key`, if any.
  fn get_item(&self, key: &str) -> Result<Option<String>>;
}

/// A favorited item: one fallback URL plus alternate source variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteRecord {
  pub fallback: String,
  #[serde(default)]
  pub sources: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
  pub url: String,
}

impl FavoriteRecord {
  /// The fallback followed by every source, in order.
  pub fn urls(&self) -> impl Iterator<Item = &str> {
    std::iter::once(self.fallback.as_str()).chain(self.sources.iter().map(|s| s.url.as_str()))
  }

  /// Parse every URL, resolving relative ones against `base`.
  pub fn resolve_urls(&self, base: Option<&Url>) -> Result<Vec<Url>> {
    self
      .urls()
      .map(|raw| {
        Url::options()
          .base_url(base)
          .parse(raw)
          .map_err(|source| Error::InvalidUrl {
            url: raw.to_string(),
            source,
          })
      })
      .collect()
  }
}

/// Ids of every favorite, in repository enumeration order.
pub fn favorite_ids(repo: &dyn FavoritesRepository, prefix: &str) -> Result<Vec<String>> {
  Ok(
    repo
      .list_keys()?
      .into_iter()
      .filter_map(|key| key.strip_prefix(prefix).map(String::from))
      .collect(),
  )
}

/// Read and parse one favorite. A missing record is an error.
pub fn read_favorite(
  repo: &dyn FavoritesRepository,
  prefix: &str,
  id: &str,
) -> Result<FavoriteRecord> {
  let key = format!("{}{}", prefix, id);
  let value = repo.get_item(&key)?.ok_or_else(|| Error::RepositoryRead {
    key: key.clone(),
    message: "no such record".to_string(),
  })?;

  serde_json::from_str(&value).map_err(|source| Error::InvalidFavorite { key, source })
}

/// Volatile repository, keys enumerate in sorted order.
#[derive(Default)]
pub struct MemoryFavorites {
  items: RwLock<BTreeMap<String, String>>,
}

impl MemoryFavorites {
  pub fn new() -> Self {
    Self::default()
  }

  #[cfg(test)]
  pub fn with_items<K, V>(items: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: Into<String>,
    V: Into<String>,
  {
    Self {
      items: RwLock::new(
        items
          .into_iter()
          .map(|(k, v)| (k.into(), v.into()))
          .collect(),
      ),
    }
  }
}

impl FavoritesRepository for MemoryFavorites {
  fn list_keys(&self) -> Result<Vec<String>> {
    let items = self.items.read().map_err(|e| Error::RepositoryRead {
      key: String::new(),
      message: format!("Lock poisoned: {}", e),
    })?;
    Ok(items.keys().cloned().collect())
  }

  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let items = self.items.read().map_err(|e| Error::RepositoryRead {
      key: key.to_string(),
      message: format!("Lock poisoned: {}", e),
    })?;
    Ok(items.get(key).cloned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_urls_fallback_first() {
    let record: FavoriteRecord = serde_json::from_str(
      r#"{"fallback": "https://a/img.png", "sources": [{"url": "https://a/v1.webp"}, {"url": "https://a/v2.gif"}]}"#,
    )
    .unwrap();

    let urls: Vec<&str> = record.urls().collect();
    assert_eq!(
      urls,
      vec!["https://a/img.png", "https://a/v1.webp", "https://a/v2.gif"]
    );
  }

  #[test]
  fn test_sources_optional() {
    let record: FavoriteRecord = serde_json::from_str(r#"{"fallback": "https://a/img.png"}"#).unwrap();
    assert_eq!(record.urls().count(), 1);
  }

  #[test]
  fn test_resolve_relative_against_base() {
    let record = FavoriteRecord {
      fallback: "/gifs/1.gif".to_string(),
      sources: vec![Source {
        url: "https://cdn.example.com/1.mp4".to_string(),
      }],
    };
    let base = Url::parse("https://example.com/app/").unwrap();

    let urls = record.resolve_urls(Some(&base)).unwrap();
    assert_eq!(urls[0].as_str(), "https://example.com/gifs/1.gif");
    assert_eq!(urls[1].as_str(), "https://cdn.example.com/1.mp4");

    assert!(matches!(
      record.resolve_urls(None),
      Err(Error::InvalidUrl { .. })
    ));
  }

  #[test]
  fn test_favorite_ids_strip_prefix() {
    let repo = MemoryFavorites::with_items([
      ("favorites:1", "{}"),
      ("settings:theme", "\"dark\""),
      ("favorites:2", "{}"),
    ]);

    assert_eq!(favorite_ids(&repo, DEFAULT_PREFIX).unwrap(), vec!["1", "2"]);
  }

  #[test]
  fn test_read_favorite_errors() {
    let repo = MemoryFavorites::with_items([("favorites:bad", "not json")]);

    assert!(matches!(
      read_favorite(&repo, DEFAULT_PREFIX, "bad"),
      Err(Error::InvalidFavorite { .. })
    ));
    assert!(matches!(
      read_favorite(&repo, DEFAULT_PREFIX, "missing"),
      Err(Error::RepositoryRead { .. })
    ));
  }
}
