//! Cache store trait with SQLite and in-memory implementations.
//!
//! The store holds any number of generations, each a flat map from
//! [`CacheKey`] to [`Payload`]. Which generation is authoritative is decided
//! by the generation manager, not here.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;
use url::Url;

use super::key::CacheKey;
use super::traits::{body_digest, Payload};
use crate::error::{Error, Result};

/// Trait for cache storage backends.
pub trait CacheStore: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open(&self, generation: &str) -> Result<()>;

  /// Store one entry, replacing any previous entry under the same key.
  fn put(&self, generation: &str, key: &CacheKey, payload: &Payload) -> Result<()>;

  /// Store a batch of entries. Either all of them are committed or none.
  fn put_all(&self, generation: &str, entries: &[(CacheKey, Payload)]) -> Result<()>;

  /// Find an entry, searching `preferred` first and then every other
  /// generation from oldest to newest.
  fn lookup(&self, key: &CacheKey, preferred: &str) -> Result<Option<Payload>>;

  /// Generation ids in creation order.
  fn generations(&self) -> Result<Vec<String>>;

  /// Delete a generation with all of its entries. Returns whether it existed.
  fn delete_generation(&self, generation: &str) -> Result<bool>;

  fn entry_count(&self, generation: &str) -> Result<usize>;
}

/// Volatile store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
  /// Kept in creation order
  generations: Vec<(String, HashMap<CacheKey, Payload>)>,
  #[cfg(test)]
  failing_deletes: std::collections::HashSet<String>,
}

impl MemoryInner {
  fn generation_mut(&mut self, generation: &str) -> &mut HashMap<CacheKey, Payload> {
    let idx = match self.generations.iter().position(|(id, _)| id == generation) {
      Some(idx) => idx,
      None => {
        self.generations.push((generation.to_string(), HashMap::new()));
        self.generations.len() - 1
      }
    };
    &mut self.generations[idx].1
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every delete of `generation` fail.
  #[cfg(test)]
  pub fn fail_deletes_of(self, generation: &str) -> Self {
    if let Ok(mut inner) = self.inner.lock() {
      inner.failing_deletes.insert(generation.to_string());
    }
    self
  }

  fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>> {
    self
      .inner
      .lock()
      .map_err(|e| Error::store(format!("Lock poisoned: {}", e)))
  }
}

impl CacheStore for MemoryStore {
  fn open(&self, generation: &str) -> Result<()> {
    self.lock()?.generation_mut(generation);
    Ok(())
  }

  fn put(&self, generation: &str, key: &CacheKey, payload: &Payload) -> Result<()> {
    self
      .lock()?
      .generation_mut(generation)
      .insert(key.clone(), payload.clone());
    Ok(())
  }

  fn put_all(&self, generation: &str, entries: &[(CacheKey, Payload)]) -> Result<()> {
    // A single lock acquisition makes the batch atomic to other callers.
    let mut inner = self.lock()?;
    let target = inner.generation_mut(generation);
    for (key, payload) in entries {
      target.insert(key.clone(), payload.clone());
    }
    Ok(())
  }

  fn lookup(&self, key: &CacheKey, preferred: &str) -> Result<Option<Payload>> {
    let inner = self.lock()?;
    let preferred_hit = inner
      .generations
      .iter()
      .find(|(id, _)| id == preferred)
      .and_then(|(_, entries)| entries.get(key));

    let hit = preferred_hit.or_else(|| {
      inner
        .generations
        .iter()
        .filter(|(id, _)| id != preferred)
        .find_map(|(_, entries)| entries.get(key))
    });

    Ok(hit.cloned())
  }

  fn generations(&self) -> Result<Vec<String>> {
    Ok(
      self
        .lock()?
        .generations
        .iter()
        .map(|(id, _)| id.clone())
        .collect(),
    )
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let mut inner = self.lock()?;
    #[cfg(test)]
    if inner.failing_deletes.contains(generation) {
      return Err(Error::store(format!(
        "Refusing to delete generation {}",
        generation
      )));
    }
    let before = inner.generations.len();
    inner.generations.retain(|(id, _)| id != generation);
    Ok(inner.generations.len() != before)
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    Ok(
      self
        .lock()?
        .generations
        .iter()
        .find(|(id, _)| id == generation)
        .map_or(0, |(_, entries)| entries.len()),
    )
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per generation; seq gives creation order
CREATE TABLE IF NOT EXISTS generations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    body_sha256 TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (generation, cache_key)
);

CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(cache_key);
"#;

impl SqliteStore {
  /// Open or create the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::store(format!(
          "Failed to create cache directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::sqlite(
        &format!("Failed to open cache database at {}", path.display()),
        e,
      )
    })?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| Error::sqlite("Failed to run cache migrations", e))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::store(format!("Lock poisoned: {}", e)))
  }
}

fn ensure_generation(conn: &Connection, generation: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO generations (id, created_at) VALUES (?, ?)",
      params![generation, Utc::now().to_rfc3339()],
    )
    .map_err(|e| Error::sqlite("Failed to create generation", e))?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  generation: &str,
  key: &CacheKey,
  payload: &Payload,
) -> Result<()> {
  let headers = serde_json::to_string(&payload.headers)
    .map_err(|e| Error::store(format!("Failed to serialize headers: {}", e)))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries
         (generation, cache_key, url, status, headers, body, body_sha256, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        generation,
        key.as_str(),
        payload.url.as_str(),
        payload.status,
        headers,
        payload.body,
        payload.digest(),
        Utc::now().to_rfc3339(),
      ],
    )
    .map_err(|e| Error::sqlite("Failed to store entry", e))?;
  Ok(())
}

struct EntryRow {
  url: String,
  status: u16,
  headers: String,
  body: Vec<u8>,
  digest: String,
}

impl EntryRow {
  fn into_payload(self, key: &CacheKey) -> Result<Option<Payload>> {
    if body_digest(&self.body) != self.digest {
      warn!("Discarding corrupted cache entry {}", key);
      return Ok(None);
    }

    let url = Url::parse(&self.url)
      .map_err(|e| Error::store(format!("Stored URL {:?} is invalid: {}", self.url, e)))?;
    let headers = serde_json::from_str(&self.headers)
      .map_err(|e| Error::store(format!("Failed to deserialize headers: {}", e)))?;

    Ok(Some(Payload {
      url,
      status: self.status,
      headers,
      body: self.body,
    }))
  }
}

impl CacheStore for SqliteStore {
  fn open(&self, generation: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_generation(&conn, generation)
  }

  fn put(&self, generation: &str, key: &CacheKey, payload: &Payload) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| Error::sqlite("Failed to begin transaction", e))?;

    ensure_generation(&tx, generation)?;
    insert_entry(&tx, generation, key, payload)?;

    tx.commit()
      .map_err(|e| Error::sqlite("Failed to commit transaction", e))
  }

  fn put_all(&self, generation: &str, entries: &[(CacheKey, Payload)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| Error::sqlite("Failed to begin transaction", e))?;

    ensure_generation(&tx, generation)?;
    for (key, payload) in entries {
      insert_entry(&tx, generation, key, payload)?;
    }

    // Dropping `tx` on an early return above rolls the batch back.
    tx.commit()
      .map_err(|e| Error::sqlite("Failed to commit transaction", e))
  }

  fn lookup(&self, key: &CacheKey, preferred: &str) -> Result<Option<Payload>> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        "SELECT e.url, e.status, e.headers, e.body, e.body_sha256
         FROM entries e
         INNER JOIN generations g ON g.id = e.generation
         WHERE e.cache_key = ?
         ORDER BY (e.generation = ?) DESC, g.seq ASC
         LIMIT 1",
        params![key.as_str(), preferred],
        |row| {
          Ok(EntryRow {
            url: row.get(0)?,
            status: row.get(1)?,
            headers: row.get(2)?,
            body: row.get(3)?,
            digest: row.get(4)?,
          })
        },
      )
      .optional()
      .map_err(|e| Error::sqlite("Failed to look up entry", e))?;

    match row {
      Some(row) => row.into_payload(key),
      None => Ok(None),
    }
  }

  fn generations(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT id FROM generations ORDER BY seq")
      .map_err(|e| Error::sqlite("Failed to prepare query", e))?;

    let ids = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| Error::sqlite("Failed to list generations", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| Error::sqlite("Failed to read generation row", e))?;

    Ok(ids)
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| Error::sqlite("Failed to begin transaction", e))?;

    tx.execute(
      "DELETE FROM entries WHERE generation = ?",
      params![generation],
    )
    .map_err(|e| Error::sqlite("Failed to delete entries", e))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE id = ?", params![generation])
      .map_err(|e| Error::sqlite("Failed to delete generation", e))?;

    tx.commit()
      .map_err(|e| Error::sqlite("Failed to commit transaction", e))?;

    Ok(removed > 0)
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| Error::sqlite("Failed to count entries", e))?;
    Ok(count as usize)
  }
}
