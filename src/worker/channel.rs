//! Messages from the owning application.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::generation::GenerationManager;
use crate::cache::{CacheKey, KeyScheme, Payload};
use crate::error::{Error, Result};
use crate::favorites::FavoriteRecord;
use crate::network::{fetch_all, Transport};

/// A message posted to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
  pub message: String,
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub data: serde_json::Value,
}

/// Message types the channel knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
  AddFavorite,
}

impl MessageKind {
  pub fn parse(message: &str) -> Option<Self> {
    match message {
      "favorite:add" => Some(MessageKind::AddFavorite),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      MessageKind::AddFavorite => "favorite:add",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
  /// Unknown message type, nothing done
  Ignored { message: String },
  FavoriteAdded { id: String, stored: usize },
}

pub struct UpdateChannel {
  transport: Arc<dyn Transport>,
  generations: Arc<GenerationManager>,
  keys: KeyScheme,
  base_url: Option<Url>,
}

impl UpdateChannel {
  pub fn new(
    transport: Arc<dyn Transport>,
    generations: Arc<GenerationManager>,
    keys: KeyScheme,
    base_url: Option<Url>,
  ) -> Self {
    Self {
      transport,
      generations,
      keys,
      base_url,
    }
  }

  /// Dispatch a message. Unknown types succeed without doing anything.
  pub async fn handle(&self, message: IncomingMessage) -> Result<MessageOutcome> {
    info!("Got message: {} for id: {}", message.message, message.id);

    match MessageKind::parse(&message.message) {
      Some(MessageKind::AddFavorite) => self.add_favorite(message.id, message.data).await,
      None => {
        debug!("No handler for message {}", message.message);
        Ok(MessageOutcome::Ignored {
          message: message.message,
        })
      }
    }
  }

  /// Fetch a new favorite's URLs and add them to the current generation.
  /// Existing entries are left alone; the batch is committed only if every
  /// fetch succeeded.
  async fn add_favorite(&self, id: String, data: serde_json::Value) -> Result<MessageOutcome> {
    let record: FavoriteRecord =
      serde_json::from_value(data).map_err(|source| Error::InvalidFavorite {
        key: id.clone(),
        source,
      })?;
    let urls = record.resolve_urls(self.base_url.as_ref())?;

    let responses = fetch_all(self.transport.as_ref(), &urls).await?;
    let entries: Vec<(CacheKey, Payload)> = responses
      .into_iter()
      .map(|response| (self.keys.write_key(&response.url), response))
      .collect();

    self.generations.commit(&entries)?;
    info!("Cached {} responses for favorite {}", entries.len(), id);

    Ok(MessageOutcome::FavoriteAdded {
      id,
      stored: entries.len(),
    })
  }
}
