mod cache;
mod config;
mod error;
mod favorites;
mod logging;
mod network;
mod runtime;
mod server;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

use crate::cache::{CacheStore, MemoryStore, SqliteStore};
use crate::config::{Config, StorageBackend};
use crate::favorites::{FavoriteRecord, FavoritesRepository, MemoryFavorites, Source, SqliteFavorites};
use crate::network::HttpTransport;
use crate::worker::{IncomingMessage, MessageKind, Worker, WorkerOptions};

#[derive(Parser, Debug)]
#[command(name = "favcache")]
#[command(about = "An offline-caching proxy for favorited resources")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/favcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache generation to install, overriding the config
  #[arg(long)]
  cache_version: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install and activate, then serve requests over HTTP until Ctrl-C
  Serve {
    #[arg(long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
  },
  /// Precache all favorites into a fresh generation and drop stale ones
  Install,
  /// Fetch one URL through the cache and write the body to stdout
  Fetch { url: Url },
  /// Store a favorite and cache its resources without a full install
  Favorite {
    id: String,
    #[arg(long)]
    fallback: String,
    /// Alternate source variant (repeatable)
    #[arg(long = "source")]
    sources: Vec<String>,
  },
  /// List cache generations
  Generations,
}

/// Concrete collaborators chosen by the storage configuration.
struct Backends {
  store: Arc<dyn CacheStore>,
  favorites: Arc<dyn FavoritesRepository>,
  /// Writable handle for the owning-application side, when persistent
  favorites_db: Option<Arc<SqliteFavorites>>,
}

fn open_backends(config: &Config) -> Result<Backends> {
  match config.storage.backend {
    StorageBackend::Memory => Ok(Backends {
      store: Arc::new(MemoryStore::new()),
      favorites: Arc::new(MemoryFavorites::new()),
      favorites_db: None,
    }),
    StorageBackend::Sqlite => {
      let store = SqliteStore::open_at(&config.storage.cache_db_path()?)?;
      let favorites = Arc::new(SqliteFavorites::open_at(
        &config.storage.favorites_db_path()?,
      )?);
      Ok(Backends {
        store: Arc::new(store),
        favorites: favorites.clone(),
        favorites_db: Some(favorites),
      })
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override cache version if specified on command line
  let config = if let Some(cache_version) = args.cache_version {
    Config {
      cache_version,
      ..config
    }
  } else {
    config
  };

  let _log_guard = logging::init(&config.log_level, config.log_file.as_deref())?;

  let backends = open_backends(&config)?;
  let transport = Arc::new(HttpTransport::new(&config.network)?);
  let worker = Arc::new(Worker::new(
    WorkerOptions::from(&config),
    backends.store.clone(),
    backends.favorites.clone(),
    transport,
  ));

  match args.command {
    Command::Serve { host, port } => {
      let (handle, task) = runtime::spawn(worker);
      match handle.startup().await {
        Ok((precached, reaped)) => info!(
          "Precached {} responses for {} favorites, removed {} obsolete generations",
          precached.stored,
          precached.favorites,
          reaped.deleted.len()
        ),
        // Older generations stay in place and keep serving.
        Err(e) => error!(
          "Startup failed, serving from existing generations ({}): {}",
          handle.state().as_str(),
          e
        ),
      }

      let host = host.unwrap_or(config.server.host);
      let port = port.unwrap_or(config.server.port);
      let listener = server::bind(&host, port).await?;
      server::serve(listener, handle, async {
        let _ = tokio::signal::ctrl_c().await;
      })
      .await?;

      // The server dropped its handle; wait for in-flight work.
      task
        .await
        .map_err(|e| eyre!("Worker runtime failed: {}", e))?;
    }
    Command::Install => {
      let (handle, task) = runtime::spawn(worker);
      let (precached, reaped) = handle.startup().await?;
      println!(
        "Generation {}: {} favorites, {} urls fetched, {} stored",
        handle.generation_id(),
        precached.favorites,
        precached.fetched,
        precached.stored
      );
      for name in &reaped.deleted {
        println!("Deleted obsolete generation {}", name);
      }
      for (name, reason) in &reaped.failed {
        println!("Could not delete generation {}: {}", name, reason);
      }
      drop(handle);
      task
        .await
        .map_err(|e| eyre!("Worker runtime failed: {}", e))?;
    }
    Command::Fetch { url } => {
      let outcome = worker.fetch(&url).await;
      let source = outcome.source();
      match outcome.into_payload() {
        Some(payload) => {
          info!(
            "{} {} from {}",
            payload.status,
            url,
            source.map_or("nowhere", |s| s.as_str())
          );
          std::io::stdout()
            .write_all(&payload.body)
            .map_err(|e| eyre!("Failed to write response body: {}", e))?;
        }
        None => return Err(eyre!("No response for {} from network or cache", url)),
      }
    }
    Command::Favorite {
      id,
      fallback,
      sources,
    } => {
      let record = FavoriteRecord {
        fallback,
        sources: sources.into_iter().map(|url| Source { url }).collect(),
      };
      if let Some(db) = &backends.favorites_db {
        db.set_favorite(&config.favorites_prefix, &id, &record)?;
      }

      let data = serde_json::to_value(&record)
        .map_err(|e| eyre!("Failed to encode favorite {}: {}", id, e))?;
      let outcome = worker
        .handle_message(IncomingMessage {
          message: MessageKind::AddFavorite.as_str().to_string(),
          id,
          data,
        })
        .await?;
      println!("{}", serde_json::to_string(&outcome)?);
    }
    Command::Generations => {
      let generations = worker.generations();
      let current = generations.current_generation_id();
      for name in generations.generations()? {
        let marker = if name == current { "*" } else { " " };
        println!(
          "{} {} ({} entries)",
          marker,
          name,
          backends.store.entry_count(&name)?
        );
      }
    }
  }

  Ok(())
}
