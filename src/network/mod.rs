//! Network transport used for every outgoing fetch.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::cache::Payload;
use crate::config::NetworkConfig;
use crate::error::{Error, Result};

/// Performs a request and returns the materialized response.
///
/// Only transport-level failures are errors. An HTTP error status is a
/// regular response.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn fetch(&self, url: &Url) -> Result<Payload>;
}

/// HTTP transport backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(config.user_agent.as_str())
      .build()
      .map_err(|source| Error::ClientBuild { source })?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn fetch(&self, url: &Url) -> Result<Payload> {
    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| Error::network(url.as_str(), e))?;

    let mut resolved = response.url().clone();
    resolved.set_fragment(None);
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    // The body can be read once; everything downstream works on this buffer.
    let body = response
      .bytes()
      .await
      .map_err(|e| Error::network(url.as_str(), e))?
      .to_vec();

    debug!("Fetched {} -> {} ({} bytes)", url, status, body.len());

    Ok(Payload {
      url: resolved,
      status,
      headers,
      body,
    })
  }
}

/// Fetch every URL concurrently and return the responses in input order.
///
/// Fails as soon as any fetch fails; nothing is returned for the others.
pub async fn fetch_all(transport: &dyn Transport, urls: &[Url]) -> Result<Vec<Payload>> {
  futures::future::try_join_all(urls.iter().map(|url| transport.fetch(url))).await
}
