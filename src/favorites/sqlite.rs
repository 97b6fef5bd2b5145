use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{FavoriteRecord, FavoritesRepository};
use crate::error::{Error, Result};

/// SQLite-backed key-value store shared with the owning application.
pub struct SqliteFavorites {
  conn: Mutex<Connection>,
}

const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

fn read_error(key: &str, e: impl std::fmt::Display) -> Error {
  Error::RepositoryRead {
    key: key.to_string(),
    message: e.to_string(),
  }
}

impl SqliteFavorites {
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| read_error(&parent.display().to_string(), e))?;
    }

    let conn = Connection::open(path).map_err(|e| read_error(&path.display().to_string(), e))?;
    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| read_error(&path.display().to_string(), e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Write a raw value. Only the owning application writes favorites; the
  /// caching engine never calls this.
  pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
    self
      .lock(key)?
      .execute(
        "INSERT INTO kv (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
      )
      .map_err(|e| Error::sqlite("Failed to store favorite", e))?;
    Ok(())
  }

  pub fn set_favorite(&self, prefix: &str, id: &str, record: &FavoriteRecord) -> Result<()> {
    let value = serde_json::to_string(record)
      .map_err(|e| Error::store(format!("Failed to serialize favorite {}: {}", id, e)))?;
    self.set_item(&format!("{}{}", prefix, id), &value)
  }

  fn lock(&self, key: &str) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| read_error(key, format!("Lock poisoned: {}", e)))
  }
}

impl FavoritesRepository for SqliteFavorites {
  fn list_keys(&self) -> Result<Vec<String>> {
    let conn = self.lock("")?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv ORDER BY rowid")
      .map_err(|e| read_error("", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| read_error("", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| read_error("", e))?;

    Ok(keys)
  }

  fn get_item(&self, key: &str) -> Result<Option<String>> {
    self
      .lock(key)?
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| read_error(key, e))
  }
}
