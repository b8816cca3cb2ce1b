use crate::infrastructure::error::InfraError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const SNAPSHOT_KEY: &str = "app_snapshot";
pub const QUEUE_KEY: &str = "sync_queue";
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Durable byte-oriented key/value storage.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, InfraError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), InfraError>;
    fn remove(&self, key: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteLocalStore {
    db_path: PathBuf,
}

impl SqliteLocalStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl LocalStore for SqliteLocalStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, InfraError> {
        let connection = self.connect()?;
        let value = connection
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLocalStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryLocalStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, InfraError> {
        self.entries
            .lock()
            .map_err(|error| InfraError::Persistence(format!("local store lock poisoned: {error}")))
    }
}

impl LocalStore for InMemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, InfraError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), InfraError> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
