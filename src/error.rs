//! Error types for the caching engine.
//!
//! A missing cache entry is never an error (lookups return `Option`), and a
//! failure to delete an obsolete generation is reported through
//! [`ReapReport`](crate::worker::generation::ReapReport) instead of being
//! propagated.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A fetch failed or was refused before a response arrived.
  #[error("Network error fetching {url}: {message}")]
  Network { url: String, message: String },

  #[error("Failed to build HTTP client: {source}")]
  ClientBuild {
    #[source]
    source: reqwest::Error,
  },

  /// Listing favorites or reading a favorite record failed.
  #[error("Failed to read favorite {key}: {message}")]
  RepositoryRead { key: String, message: String },

  #[error("Favorite {key} is not a valid record: {source}")]
  InvalidFavorite {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("Invalid URL {url:?}: {source}")]
  InvalidUrl {
    url: String,
    #[source]
    source: url::ParseError,
  },

  #[error("Cache store error: {message}")]
  Store {
    message: String,
    #[source]
    source: Option<rusqlite::Error>,
  },

  #[error("Worker is {actual}, expected {expected}")]
  Lifecycle {
    expected: &'static str,
    actual: &'static str,
  },

  #[error("Worker runtime has shut down")]
  Shutdown,
}

impl Error {
  pub fn network(url: impl Into<String>, message: impl ToString) -> Self {
    Self::Network {
      url: url.into(),
      message: message.to_string(),
    }
  }

  pub fn store(message: impl Into<String>) -> Self {
    Self::Store {
      message: message.into(),
      source: None,
    }
  }

  /// Wrap a SQLite failure with a description of what was being attempted.
  pub fn sqlite(context: &str, source: rusqlite::Error) -> Self {
    Self::Store {
      message: format!("{}: {}", context, source),
      source: Some(source),
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
