//! Connection context: opens the engine and pools prepared handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::handle::{HandleStatement, SharedConnection};
use crate::recyclable::Recyclable;
use crate::statement::Statement;

/// Caller-chosen identifier for a database.
pub type Tag = i64;

/// A prepared handle that returns to its database's pool when dropped.
pub type RecyclableHandle = Recyclable<HandleStatement>;

/// Path that opens a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

fn default_max_idle_handles() -> usize {
    4
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub path: String,
    /// Optional identifier reported by executors
    #[serde(default)]
    pub tag: Option<Tag>,
    /// Open without write access
    #[serde(default)]
    pub read_only: bool,
    /// Idle handles kept per distinct SQL text; 0 disables pooling
    #[serde(default = "default_max_idle_handles")]
    pub max_idle_handles: usize,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tag: None,
            read_only: false,
            max_idle_handles: default_max_idle_handles(),
        }
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_max_idle_handles(mut self, max_idle_handles: usize) -> Self {
        self.max_idle_handles = max_idle_handles;
        self
    }

    fn open_flags(&self) -> OpenFlags {
        let access = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };
        // Handles step outside the connection lock, so SQLite itself must
        // serialize access.
        access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_FULL_MUTEX
    }
}

struct Core {
    config: DatabaseConfig,
    connection: Arc<SharedConnection>,
    idle: Mutex<HashMap<String, Vec<HandleStatement>>>,
}

impl Core {
    fn idle(&self) -> MutexGuard<'_, HashMap<String, Vec<HandleStatement>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_out(&self, sql: &str) -> Option<HandleStatement> {
        self.idle().get_mut(sql).and_then(Vec::pop)
    }

    fn recycle(&self, mut handle: HandleStatement) {
        if handle.is_finalized() || !handle.belongs_to(&self.connection) {
            return;
        }
        if let Err(e) = handle.reset() {
            log::warn!("discarding handle for `{}`: reset failed: {}", handle.sql(), e);
            return;
        }
        let mut idle = self.idle();
        let slot = idle.entry(handle.sql().to_string()).or_default();
        if slot.len() >= self.config.max_idle_handles {
            log::debug!("idle pool full for `{}`, finalizing handle", handle.sql());
            return;
        }
        log::debug!("recycled handle for `{}`", handle.sql());
        slot.push(handle);
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        let idle = std::mem::take(self.idle.get_mut().unwrap_or_else(PoisonError::into_inner));
        for mut handle in idle.into_values().flatten() {
            if let Err(e) = handle.finalize() {
                log::debug!("ignoring finalize error on close: {}", e);
            }
        }
    }
}

/// A connection context that executors are prepared from.
///
/// Cloning is cheap; all clones share one connection and one handle pool.
/// Handles keep the connection open until they are finalized.
#[derive(Clone)]
pub struct Database {
    core: Arc<Core>,
}

impl Database {
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let flags = config.open_flags();
        let opened = if config.path == MEMORY_PATH {
            Connection::open_in_memory_with_flags(flags)
        } else {
            Connection::open_with_flags(&config.path, flags)
        };
        let connection = opened.map_err(|source| Error::Open {
            path: config.path.clone(),
            source,
        })?;
        log::debug!("opened database at {}", config.path);

        Ok(Self {
            core: Arc::new(Core {
                config,
                connection: SharedConnection::new(connection),
                idle: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(DatabaseConfig::new(MEMORY_PATH))
    }

    pub fn open_path(path: impl Into<String>) -> Result<Self> {
        Self::open(DatabaseConfig::new(path))
    }

    /// The tag of this database.
    pub fn tag(&self) -> Option<Tag> {
        self.core.config.tag
    }

    /// The path of this database.
    pub fn path(&self) -> &str {
        &self.core.config.path
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.core.config
    }

    /// Check out a handle for `statement`, compiling it if no idle one exists.
    ///
    /// The handle is exclusively owned by the returned token until it drops.
    pub fn prepare(&self, statement: &Statement) -> Result<RecyclableHandle> {
        let sql = statement.sql();
        let handle = match self.core.check_out(sql) {
            Some(handle) => {
                log::debug!("reusing pooled handle for `{}`", sql);
                handle
            }
            None => {
                log::debug!("compiling {:?} `{}`", statement.kind(), sql);
                HandleStatement::prepare(&self.core.connection, sql)?
            }
        };
        let core = Arc::clone(&self.core);
        Ok(Recyclable::new(handle, move |handle| core.recycle(handle)))
    }

    /// Number of handles currently idle in the pool.
    pub fn idle_handle_count(&self) -> usize {
        self.core.idle().values().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.core.config.path)
            .field("tag", &self.core.config.tag)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_from_json() {
        let config: DatabaseConfig = serde_json::from_str(r#"{"path": ":memory:"}"#).unwrap();
        assert_eq!(config, DatabaseConfig::new(MEMORY_PATH));
        assert_eq!(config.max_idle_handles, 4);

        let config: DatabaseConfig =
            serde_json::from_str(r#"{"path": "a.db", "tag": 3, "max_idle_handles": 0}"#).unwrap();
        assert_eq!(config.tag, Some(3));
        assert_eq!(config.max_idle_handles, 0);
        assert!(!config.read_only);
    }

    #[test]
    fn handles_return_to_pool() {
        let db = Database::open_in_memory().unwrap();
        let statement = Statement::query("SELECT 1");
        {
            let mut handle = db.prepare(&statement).unwrap();
            assert!(handle.raw_mut().step().unwrap());
            assert_eq!(db.idle_handle_count(), 0);
        }
        assert_eq!(db.idle_handle_count(), 1);

        // The pooled handle is checked out again and comes back rewound.
        let mut handle = db.prepare(&statement).unwrap();
        assert_eq!(db.idle_handle_count(), 0);
        assert!(handle.raw_mut().step().unwrap());
        assert_eq!(handle.raw().column_value(0), Some(rusqlite::types::ValueRef::Integer(1)));
    }

    #[test]
    fn finalized_handles_are_not_pooled() {
        let db = Database::open_in_memory().unwrap();
        let mut handle = db.prepare(&Statement::query("SELECT 1")).unwrap();
        handle.raw_mut().finalize().unwrap();
        handle.raw_mut().finalize().unwrap();
        drop(handle);
        assert_eq!(db.idle_handle_count(), 0);
    }

    #[test]
    fn pool_capacity_is_bounded() {
        let db = Database::open(DatabaseConfig::new(MEMORY_PATH).with_max_idle_handles(1)).unwrap();
        let statement = Statement::query("SELECT 1");
        let first = db.prepare(&statement).unwrap();
        let second = db.prepare(&statement).unwrap();
        drop(first);
        drop(second);
        assert_eq!(db.idle_handle_count(), 1);
    }
}
