//! Decides which resources are kept for offline use.

use super::key::CacheKey;

/// Coarse allow-list over cache keys.
///
/// A key is eligible when its path has one of the configured segments
/// (`/vendor/`, `/assets/` by default) or ends with one of the configured
/// suffixes. Anything else is treated as not offline-critical.
#[derive(Debug, Clone)]
pub struct CachePolicy {
  segments: Vec<String>,
  suffixes: Vec<String>,
}

impl Default for CachePolicy {
  fn default() -> Self {
    Self::new(["vendor", "assets"], ["/jquery.min.js"])
  }
}

impl CachePolicy {
  pub fn new<S, T>(segments: S, suffixes: T) -> Self
  where
    S: IntoIterator,
    S::Item: AsRef<str>,
    T: IntoIterator,
    T::Item: AsRef<str>,
  {
    Self {
      segments: segments
        .into_iter()
        .map(|s| format!("/{}/", s.as_ref().trim_matches('/')))
        .collect(),
      suffixes: suffixes.into_iter().map(|s| s.as_ref().to_string()).collect(),
    }
  }

  pub fn is_cache_eligible(&self, key: &CacheKey) -> bool {
    let key = key.as_str();
    self.segments.iter().any(|s| key.contains(s.as_str()))
      || self.suffixes.iter().any(|s| key.ends_with(s.as_str()))
  }
}
