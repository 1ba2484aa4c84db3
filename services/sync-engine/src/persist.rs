//! Durable engine state.
//!
//! State lives in a small key-value table so the engine survives restarts.
//! Values are JSON documents under fixed keys.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use slotsync_id::ListId;
use slotsync_reconcile::SpaceId;
use thiserror::Error;
use tracing::debug;

use crate::lists::SavedList;
use crate::model::Entity;
use crate::token::Session;

pub mod keys {
    pub const ENTITIES: &str = "entities";
    pub const LISTS: &str = "lists";
    pub const ACTIVE_LIST_ID: &str = "active_list_id";
    pub const CREDENTIALS: &str = "credentials";
    pub const PENDING_CLEARS: &str = "pending_clears";
}

/// Errors from the key-value store.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Key-value persistence.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    fn delete(&self, key: &str) -> Result<(), KvError>;
}

/// SQLite-backed key-value store.
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KvError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, KvError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), KvError> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );
            "#,
        )?;
        debug!("Key-value schema initialized");
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, KvError> {
        self.conn.lock().map_err(|_| KvError::Poisoned)
    }
}

impl KvStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.conn()?.execute(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, strftime('%s', 'now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        self.conn()?
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// In-memory key-value store.
#[derive(Default)]
pub struct MemoryKv {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, KvError> {
        self.values.lock().map_err(|_| KvError::Poisoned)
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        self.values()?.remove(key);
        Ok(())
    }
}

/// Engine state restored at startup.
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub entities: Vec<Entity>,
    pub lists: Vec<SavedList>,
    pub active_list_id: Option<ListId>,
    /// Spaces whose remote blank has not been confirmed yet.
    pub pending_clears: Vec<SpaceId>,
}

/// Typed access to the engine's keys.
#[derive(Clone)]
pub struct EngineState {
    kv: Arc<dyn KvStore>,
}

impl EngineState {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, KvError> {
        match self.kv.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), KvError> {
        self.kv.set(key, &serde_json::to_string(value)?)
    }

    /// Load everything. Legacy list fields are folded into memberships while
    /// entities deserialize.
    pub fn load(&self) -> Result<PersistedState, KvError> {
        let state = PersistedState {
            entities: self.read(keys::ENTITIES)?.unwrap_or_default(),
            lists: self.read(keys::LISTS)?.unwrap_or_default(),
            active_list_id: self.read(keys::ACTIVE_LIST_ID)?,
            pending_clears: self.read(keys::PENDING_CLEARS)?.unwrap_or_default(),
        };
        debug!(
            entities = state.entities.len(),
            lists = state.lists.len(),
            pending_clears = state.pending_clears.len(),
            "Engine state loaded"
        );
        Ok(state)
    }

    pub fn save_entities(&self, entities: &[Entity]) -> Result<(), KvError> {
        self.write(keys::ENTITIES, entities)
    }

    pub fn save_lists(&self, lists: &[SavedList]) -> Result<(), KvError> {
        self.write(keys::LISTS, lists)
    }

    pub fn save_active_list(&self, id: Option<ListId>) -> Result<(), KvError> {
        match id {
            Some(id) => self.write(keys::ACTIVE_LIST_ID, &id),
            None => self.kv.delete(keys::ACTIVE_LIST_ID),
        }
    }

    pub fn save_pending_clears(&self, spaces: &[SpaceId]) -> Result<(), KvError> {
        if spaces.is_empty() {
            return self.kv.delete(keys::PENDING_CLEARS);
        }
        self.write(keys::PENDING_CLEARS, spaces)
    }

    pub fn save_session(&self, session: Option<&Session>) -> Result<(), KvError> {
        match session {
            Some(session) => self.write(keys::CREDENTIALS, session),
            None => self.kv.delete(keys::CREDENTIALS),
        }
    }

    pub fn load_session(&self) -> Result<Option<Session>, KvError> {
        self.read(keys::CREDENTIALS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_roundtrip_and_overwrite() {
        let kv = SqliteKv::open_in_memory().unwrap();
        assert_eq!(kv.get("missing").unwrap(), None);

        kv.set("k", "one").unwrap();
        kv.set("k", "two").unwrap();
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("two"));

        kv.delete("k").unwrap();
        assert_eq!(kv.get("k").unwrap(), None);
    }

    #[test]
    fn test_empty_state_loads_defaults() {
        let state = EngineState::new(Arc::new(MemoryKv::new()));
        let loaded = state.load().unwrap();
        assert!(loaded.entities.is_empty());
        assert!(loaded.lists.is_empty());
        assert!(loaded.active_list_id.is_none());
        assert!(loaded.pending_clears.is_empty());
    }

    #[test]
    fn test_pending_clears_saved_and_dropped() {
        let kv = Arc::new(MemoryKv::new());
        let state = EngineState::new(kv.clone());

        state
            .save_pending_clears(&[SpaceId::new("3"), SpaceId::new("POOL-1")])
            .unwrap();
        assert_eq!(
            state.load().unwrap().pending_clears,
            vec![SpaceId::new("3"), SpaceId::new("POOL-1")]
        );

        state.save_pending_clears(&[]).unwrap();
        assert_eq!(kv.get(keys::PENDING_CLEARS).unwrap(), None);
    }

    #[test]
    fn test_active_list_cleared() {
        let state = EngineState::new(Arc::new(MemoryKv::new()));
        let id = ListId::new();

        state.save_active_list(Some(id)).unwrap();
        assert_eq!(state.load().unwrap().active_list_id, Some(id));

        state.save_active_list(None).unwrap();
        assert_eq!(state.load().unwrap().active_list_id, None);
    }

    #[test]
    fn test_corrupt_value_is_an_error() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(keys::ENTITIES, "{not json").unwrap();
        let state = EngineState::new(kv);
        assert!(matches!(state.load(), Err(KvError::Serde(_))));
    }
}
