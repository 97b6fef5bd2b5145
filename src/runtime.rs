//! Host runtime: delivers lifecycle events to a worker.
//!
//! Events arrive over a channel. Install and activate are handled inline, so
//! anything queued behind them waits for the lifecycle step to finish.
//! Fetches and messages run concurrently; their tasks are kept in a
//! `JoinSet` that the loop drains before exiting, so in-flight work is never
//! torn down early.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};
use url::Url;

use crate::cache::FetchOutcome;
use crate::error::{Error, Result};
use crate::worker::{
  IncomingMessage, LifecycleState, MessageOutcome, PrecacheReport, ReapReport, Worker,
};

/// Events delivered to the worker
#[derive(Debug)]
pub enum WorkerEvent {
  Install {
    reply: oneshot::Sender<Result<PrecacheReport>>,
  },
  Activate {
    reply: oneshot::Sender<Result<ReapReport>>,
  },
  Fetch {
    url: Url,
    reply: oneshot::Sender<FetchOutcome>,
  },
  Message {
    message: IncomingMessage,
    reply: oneshot::Sender<Result<MessageOutcome>>,
  },
}

/// Cheap handle for posting events to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
  worker: Arc<Worker>,
}

/// Start the event loop. It exits once every handle has been dropped and
/// all in-flight work has finished.
pub fn spawn(worker: Arc<Worker>) -> (WorkerHandle, JoinHandle<()>) {
  let (tx, rx) = mpsc::unbounded_channel();
  let task = tokio::spawn(run(worker.clone(), rx));
  (WorkerHandle { tx, worker }, task)
}

async fn run(worker: Arc<Worker>, mut rx: mpsc::UnboundedReceiver<WorkerEvent>) {
  let mut in_flight = JoinSet::new();

  loop {
    tokio::select! {
      event = rx.recv() => match event {
        Some(event) => dispatch(&worker, event, &mut in_flight).await,
        None => break,
      },
      Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
        if let Err(e) = joined {
          warn!("Event handler failed: {}", e);
        }
      }
    }
  }

  debug!("Event channel closed, waiting for {} tasks", in_flight.len());
  while let Some(joined) = in_flight.join_next().await {
    if let Err(e) = joined {
      warn!("Event handler failed: {}", e);
    }
  }
}

async fn dispatch(worker: &Arc<Worker>, event: WorkerEvent, in_flight: &mut JoinSet<()>) {
  // Ignore send errors - the caller may have stopped waiting
  match event {
    WorkerEvent::Install { reply } => {
      let _ = reply.send(worker.install().await);
    }
    WorkerEvent::Activate { reply } => {
      let _ = reply.send(worker.activate().await);
    }
    WorkerEvent::Fetch { url, reply } => {
      let worker = worker.clone();
      in_flight.spawn(async move {
        let _ = reply.send(worker.fetch(&url).await);
      });
    }
    WorkerEvent::Message { message, reply } => {
      let worker = worker.clone();
      in_flight.spawn(async move {
        let _ = reply.send(worker.handle_message(message).await);
      });
    }
  }
}

impl WorkerHandle {
  async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> WorkerEvent) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self.tx.send(make(reply)).map_err(|_| Error::Shutdown)?;
    rx.await.map_err(|_| Error::Shutdown)
  }

  pub async fn install(&self) -> Result<PrecacheReport> {
    self.request(|reply| WorkerEvent::Install { reply }).await?
  }

  pub async fn activate(&self) -> Result<ReapReport> {
    self.request(|reply| WorkerEvent::Activate { reply }).await?
  }

  /// Install, then activate.
  pub async fn startup(&self) -> Result<(PrecacheReport, ReapReport)> {
    let precached = self.install().await?;
    let reaped = self.activate().await?;
    Ok((precached, reaped))
  }

  pub async fn fetch(&self, url: Url) -> Result<FetchOutcome> {
    self.request(|reply| WorkerEvent::Fetch { url, reply }).await
  }

  pub async fn post_message(&self, message: IncomingMessage) -> Result<MessageOutcome> {
    self
      .request(|reply| WorkerEvent::Message { message, reply })
      .await?
  }

  pub fn state(&self) -> LifecycleState {
    self.worker.state()
  }

  pub fn generation_id(&self) -> &str {
    self.worker.generations().current_generation_id()
  }
}
