//! Storage handle owning the single SQLite connection.
//!
//! [`Store::open`] applies the durability pragmas and creates the base
//! schema, so every other component can assume the six base tables exist.
//! Managers borrow the store for one operation and never keep the
//! connection beyond it.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, Transaction};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::schema::BASE_SCHEMA_SQL;

const OPEN_PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = 1000;
PRAGMA foreign_keys = ON;
";

/// The embedded store.
///
/// # Examples
///
/// ```
/// use gogo_store::Store;
///
/// let store = Store::open_in_memory().unwrap();
/// let count = store
///     .transaction(|tx| {
///         tx.execute("INSERT INTO configs (key, value) VALUES ('theme', 'dark')", [])?;
///         Ok(tx.query_row("SELECT COUNT(*) FROM configs", [], |r| r.get::<_, i64>(0))?)
///     })
///     .unwrap();
/// assert_eq!(count, 1);
/// ```
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Opens (or creates) the store at `path`.
    ///
    /// Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the parent directory cannot be created
    /// and [`StoreError::Storage`] if the file cannot be opened or the base
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(StoreError::io(format!(
                "failed to create database directory {}",
                parent.display()
            )))?;
        }

        let conn = Connection::open(path).map_err(StoreError::storage(format!(
            "failed to open database {}",
            path.display()
        )))?;
        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        debug!(path = %path.display(), "opened store");
        Ok(store)
    }

    /// Opens a private in-memory store with the base schema.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(StoreError::storage("failed to open in-memory database"))?;
        let store = Self { conn, path: None };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(OPEN_PRAGMAS)
            .map_err(StoreError::storage("failed to configure database"))?;
        self.conn
            .execute_batch(BASE_SCHEMA_SQL)
            .map_err(StoreError::storage("failed to create base schema"))?;
        Ok(())
    }

    /// Runs `f` inside a transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back
    /// when it returns `Err`, so no partial mutation survives an error.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(StoreError::storage("failed to begin transaction"))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(StoreError::storage("failed to commit transaction"))?;
        Ok(value)
    }

    /// Borrows the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Backing file path, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the connection, reporting any error SQLite raises on close.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, source)| StoreError::Storage {
                context: "failed to close database".to_string(),
                source,
            })
    }
}
