//! Builds the current generation from every stored favorite.

use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::generation::GenerationManager;
use crate::cache::{CacheKey, KeyScheme, Payload};
use crate::error::Result;
use crate::favorites::{favorite_ids, read_favorite, FavoritesRepository};
use crate::network::{fetch_all, Transport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrecacheReport {
  pub favorites: usize,
  pub fetched: usize,
  pub stored: usize,
}

pub struct PrecacheOrchestrator {
  favorites: Arc<dyn FavoritesRepository>,
  transport: Arc<dyn Transport>,
  generations: Arc<GenerationManager>,
  prefix: String,
  keys: KeyScheme,
  base_url: Option<Url>,
}

impl PrecacheOrchestrator {
  pub fn new(
    favorites: Arc<dyn FavoritesRepository>,
    transport: Arc<dyn Transport>,
    generations: Arc<GenerationManager>,
    prefix: impl Into<String>,
    keys: KeyScheme,
    base_url: Option<Url>,
  ) -> Self {
    Self {
      favorites,
      transport,
      generations,
      prefix: prefix.into(),
      keys,
      base_url,
    }
  }

  /// Fetch every favorited URL and commit the responses into the current
  /// generation.
  ///
  /// Nothing is written unless every record parses and every fetch
  /// succeeds.
  pub async fn precache_all_favorites(&self) -> Result<PrecacheReport> {
    let ids = favorite_ids(self.favorites.as_ref(), &self.prefix)?;

    let mut urls = Vec::new();
    for id in &ids {
      let record = read_favorite(self.favorites.as_ref(), &self.prefix, id)?;
      urls.extend(record.resolve_urls(self.base_url.as_ref())?);
    }
    debug!("Precaching {} urls for {} favorites", urls.len(), ids.len());

    let responses = fetch_all(self.transport.as_ref(), &urls).await?;
    let entries: Vec<(CacheKey, Payload)> = responses
      .into_iter()
      .map(|response| (self.keys.write_key(&response.url), response))
      .collect();

    self.generations.commit(&entries)?;

    info!(
      "Precached {} responses into {}",
      entries.len(),
      self.generations.current_generation_id()
    );

    Ok(PrecacheReport {
      favorites: ids.len(),
      fetched: urls.len(),
      stored: entries.len(),
    })
  }
}
