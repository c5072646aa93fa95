use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::KvStore;
use crate::platform::{NativePlatform, Platform};

/// `KvStore` over a single SQLite table. Values are stored as JSON text.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path)?;
        NativePlatform::restrict_file_permissions(path);
        Self::with_connection(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT value FROM kv_store WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let raw = serde_json::to_string(&value)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO kv_store (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=CURRENT_TIMESTAMP",
            (key, &raw),
        )?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT key FROM kv_store WHERE substr(key, 1, ?2) = ?1")?;
        let rows = stmt.query_map((prefix, prefix.len() as i64), |row| row.get(0))?;

        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }
}
