//! Local HTTP surface over the worker runtime.

use axum::{
  extract::{Query, State},
  http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info};
use url::Url;

use crate::cache::FetchOutcome;
use crate::runtime::WorkerHandle;
use crate::worker::IncomingMessage;

/// Header telling clients whether a response came from the network or the cache.
pub const SOURCE_HEADER: &str = "x-favcache-source";

/// Headers describing the original transfer rather than the replayed body.
const SKIPPED_HEADERS: &[&str] = &["connection", "content-length", "transfer-encoding"];

pub fn router(handle: WorkerHandle) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/fetch", get(fetch))
    .route("/message", post(message))
    .with_state(handle)
}

pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
  let addr: SocketAddr = format!("{}:{}", host, port)
    .parse()
    .map_err(|e| eyre!("Invalid listen address {}:{}: {}", host, port, e))?;

  TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))
}

/// Serve until `shutdown` resolves.
pub async fn serve(
  listener: TcpListener,
  handle: WorkerHandle,
  shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
  info!("Listening on {}", listener.local_addr()?);

  axum::serve(listener, router(handle))
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| eyre!("Server error: {}", e))
}

async fn health(State(handle): State<WorkerHandle>) -> Json<serde_json::Value> {
  Json(json!({
    "state": handle.state().as_str(),
    "generation": handle.generation_id(),
  }))
}

#[derive(Debug, Deserialize)]
struct FetchParams {
  url: String,
}

async fn fetch(State(handle): State<WorkerHandle>, Query(params): Query<FetchParams>) -> Response {
  let url = match Url::parse(&params.url) {
    Ok(url) => url,
    Err(e) => {
      return (StatusCode::BAD_REQUEST, format!("Invalid url: {}", e)).into_response();
    }
  };

  match handle.fetch(url).await {
    Ok(outcome) => replay(outcome),
    Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
  }
}

/// Turn an outcome back into an HTTP response.
fn replay(outcome: FetchOutcome) -> Response {
  let Some(source) = outcome.source() else {
    return StatusCode::GATEWAY_TIMEOUT.into_response();
  };
  let Some(payload) = outcome.into_payload() else {
    return StatusCode::GATEWAY_TIMEOUT.into_response();
  };

  let status = StatusCode::from_u16(payload.status).unwrap_or(StatusCode::BAD_GATEWAY);
  let mut headers = HeaderMap::new();
  for (name, value) in &payload.headers {
    if SKIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
      continue;
    }
    match (
      HeaderName::from_bytes(name.as_bytes()),
      HeaderValue::from_str(value),
    ) {
      (Ok(name), Ok(value)) => {
        headers.append(name, value);
      }
      _ => debug!("Dropping unrepresentable header {}", name),
    }
  }
  headers.insert(SOURCE_HEADER, HeaderValue::from_static(source.as_str()));

  (status, headers, payload.body).into_response()
}

async fn message(
  State(handle): State<WorkerHandle>,
  Json(message): Json<IncomingMessage>,
) -> Response {
  match handle.post_message(message).await {
    Ok(outcome) => Json(outcome).into_response(),
    Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
  }
}
