//! Cache key derivation.
//!
//! Every read and write path in the crate asks [`KeyScheme`] for its key, so
//! the places where keys are computed differently stay visible in one file.

use serde::Deserialize;
use std::fmt;
use url::Url;

/// String identity under which a response is stored and looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  /// `origin + path`. Query string and fragment are dropped, so URLs that
  /// differ only by query parameters share a key.
  pub fn origin_path(url: &Url) -> Self {
    Self(format!("{}{}", url.origin().ascii_serialization(), url.path()))
  }

  /// The whole URL minus its fragment, the same string a request reports
  /// as its URL.
  pub fn full(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self(url.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for CacheKey {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl From<String> for CacheKey {
  fn from(s: String) -> Self {
    Self(s)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Which key each path uses.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyScheme {
  /// Eligible requests use origin+path, the non-eligible fallback uses the
  /// full request URL and precache writes use the full response URL.
  #[default]
  Split,
  /// Every path uses origin+path of its URL.
  Canonical,
}

impl KeyScheme {
  /// Key for the cache-first path of an eligible request. The policy is
  /// also evaluated against this key.
  pub fn request_key(self, url: &Url) -> CacheKey {
    CacheKey::origin_path(url)
  }

  /// Key for the offline fallback of a request the policy did not accept.
  pub fn fallback_key(self, url: &Url) -> CacheKey {
    match self {
      KeyScheme::Split => CacheKey::full(url),
      KeyScheme::Canonical => CacheKey::origin_path(url),
    }
  }

  /// Key for a response written by precache or add-favorite, derived from
  /// the URL the response resolved to.
  pub fn write_key(self, resolved: &Url) -> CacheKey {
    match self {
      KeyScheme::Split => CacheKey::full(resolved),
      KeyScheme::Canonical => CacheKey::origin_path(resolved),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_origin_path_drops_query_and_fragment() {
    let key = CacheKey::origin_path(&url("https://example.com:8080/assets/app.js?v=3#top"));
    assert_eq!(key.as_str(), "https://example.com:8080/assets/app.js");
  }

  #[test]
  fn test_origin_path_collapses_query_variants() {
    let a = CacheKey::origin_path(&url("https://example.com/assets/a.png?size=small"));
    let b = CacheKey::origin_path(&url("https://example.com/assets/a.png?size=large"));
    assert_eq!(a, b);
  }

  #[test]
  fn test_full_keeps_query_drops_fragment() {
    let key = CacheKey::full(&url("https://example.com/page?q=1#frag"));
    assert_eq!(key.as_str(), "https://example.com/page?q=1");
  }

  #[test]
  fn test_split_scheme_fallback_differs_from_request_key() {
    let u = url("https://example.com/api/list?page=2");
    let scheme = KeyScheme::Split;

    let request = scheme.request_key(&u);
    let fallback = scheme.fallback_key(&u);

    assert_eq!(request.as_str(), "https://example.com/api/list");
    assert_eq!(fallback.as_str(), "https://example.com/api/list?page=2");
    assert_ne!(request, fallback);
  }

  #[test]
  fn test_canonical_scheme_unifies_keys() {
    let u = url("https://example.com/api/list?page=2");
    let scheme = KeyScheme::Canonical;

    assert_eq!(scheme.request_key(&u), scheme.fallback_key(&u));
    assert_eq!(scheme.request_key(&u), scheme.write_key(&u));
  }

  #[test]
  fn test_default_scheme_is_split() {
    assert_eq!(KeyScheme::default(), KeyScheme::Split);
  }
}
