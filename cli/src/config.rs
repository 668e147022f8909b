//! Per-invocation configuration.
//!
//! Built once from the global flags and passed by reference to every
//! command handler.

use std::env;
use std::path::PathBuf;

use gogo_store::Store;

const DEFAULT_DB_FILE: &str = ".gogo.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub verbose: bool,
}

impl Config {
    /// Uses `db_path` when given, otherwise [`default_db_path`].
    pub fn from_flags(db_path: Option<PathBuf>, verbose: bool) -> Self {
        Self {
            db_path: db_path.unwrap_or_else(default_db_path),
            verbose,
        }
    }

    /// Opens the configured store.
    pub fn open_store(&self) -> Result<Store, String> {
        Store::open(&self.db_path).map_err(|e| e.to_string())
    }
}

/// `$HOME/.gogo.db`, or `./.gogo.db` when no home directory is set.
pub fn default_db_path() -> PathBuf {
    env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(DEFAULT_DB_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
}
