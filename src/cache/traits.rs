//! Core types shared by the cache store, the transport and the interceptor.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// A fully materialized response.
///
/// The body has already been read off the wire, so a copy made with
/// `clone()` is an independent buffer holding the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
  /// URL the response resolved to, after redirects
  pub url: Url,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

#[cfg(test)]
impl Payload {
  pub fn new(url: Url, status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url,
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }
}

impl Payload {
  /// Hex-encoded SHA-256 of the body.
  pub fn digest(&self) -> String {
    body_digest(&self.body)
  }
}

pub(crate) fn body_digest(body: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(body);
  hex::encode(hasher.finalize())
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  Network,
  Cache,
}

impl CacheSource {
  pub fn as_str(self) -> &'static str {
    match self {
      CacheSource::Network => "network",
      CacheSource::Cache => "cache",
    }
  }
}

/// Result of intercepting one request. Every request ends in one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  Network(Payload),
  Cache(Payload),
  /// Neither the network nor the cache produced a response
  NoContent,
}

impl FetchOutcome {
  pub(crate) fn from_cache(cached: Option<Payload>) -> Self {
    cached.map_or(FetchOutcome::NoContent, FetchOutcome::Cache)
  }

  pub fn source(&self) -> Option<CacheSource> {
    match self {
      FetchOutcome::Network(_) => Some(CacheSource::Network),
      FetchOutcome::Cache(_) => Some(CacheSource::Cache),
      FetchOutcome::NoContent => None,
    }
  }

  pub fn into_payload(self) -> Option<Payload> {
    match self {
      FetchOutcome::Network(p) | FetchOutcome::Cache(p) => Some(p),
      FetchOutcome::NoContent => None,
    }
  }
}
