//! Incremental schema migrations.
//!
//! A [`MigrationEngine`] holds an in-memory registry of [`Migration`]
//! definitions keyed by id and reconciles it against the persistent
//! `schema_migrations` ledger. Applied state is never cached: every query
//! re-reads the ledger.
//!
//! Pending migrations are applied in ascending id order. Each apply or
//! rollback runs the migration body and the ledger write in one
//! transaction, so a failure leaves neither behind.
//!
//! # Example
//!
//! ```
//! use gogo_store::{Migration, MigrationEngine, Store};
//!
//! let store = Store::open_in_memory().unwrap();
//! let mut engine = MigrationEngine::new(&store);
//! engine.register(Migration::new(
//!     "001_users",
//!     "Create users",
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
//!     "DROP TABLE users;",
//! ));
//!
//! let applied = engine.apply_all().unwrap();
//! assert_eq!(applied, vec!["001_users".to_string()]);
//! assert!(engine.pending().unwrap().is_empty());
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::{SecondsFormat, Utc};
use gogo_core::{follows_migration_convention, validate_migration_id};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::handle::Store;
use crate::schema::LEDGER_SQL;

/// An immutable schema change unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub id: String,
    pub description: String,
    /// Forward body; must not be blank.
    pub up_sql: String,
    /// Reverse body; blank marks the migration as irreversible.
    pub down_sql: String,
}

impl Migration {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            up_sql: up_sql.into(),
            down_sql: down_sql.into(),
        }
    }

    /// SHA-256 hex digest of the trimmed forward body.
    pub fn checksum(&self) -> String {
        body_checksum(&self.up_sql)
    }

    /// Returns `false` when the migration has no reverse body.
    pub fn is_reversible(&self) -> bool {
        !self.down_sql.trim().is_empty()
    }
}

/// A persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: String,
    pub description: String,
    pub applied_at: String,
    pub checksum: String,
}

/// Reconciled view of one registered migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub id: String,
    pub description: String,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<String>,
    /// `false` when the recorded checksum no longer matches the registered
    /// forward body. Always `true` for pending migrations.
    pub checksum_matches: bool,
    pub reversible: bool,
}

/// Registry of migrations bound to a store.
pub struct MigrationEngine<'a> {
    store: &'a Store,
    migrations: BTreeMap<String, Migration>,
}

impl<'a> MigrationEngine<'a> {
    /// Creates an engine with an empty registry.
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            migrations: BTreeMap::new(),
        }
    }

    /// Registers `migration`, replacing any previous definition with the
    /// same id. No ledger side effect.
    ///
    /// Replacing a definition with a different body logs a warning.
    pub fn register(&mut self, migration: Migration) {
        if !follows_migration_convention(&migration.id) {
            debug!(id = %migration.id, "migration id does not follow NNN_description");
        }
        if let Some(previous) = self.migrations.get(&migration.id) {
            if *previous != migration {
                warn!(id = %migration.id, "replacing registered migration with a different definition");
            }
        }
        self.migrations.insert(migration.id.clone(), migration);
    }

    /// Registers the built-in migrations every gogo store carries.
    pub fn register_core_schemas(&mut self) {
        for migration in core_migrations() {
            self.register(migration);
        }
    }

    /// Returns the registered definition for `id`.
    pub fn get(&self, id: &str) -> Option<&Migration> {
        self.migrations.get(id)
    }

    /// Number of registered migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Creates the ledger table if absent.
    pub fn init_ledger(&self) -> Result<()> {
        self.store
            .connection()
            .execute_batch(LEDGER_SQL)
            .map_err(StoreError::storage("failed to create schema_migrations table"))
    }

    /// Returns every ledger row keyed by id.
    pub fn applied(&self) -> Result<HashMap<String, LedgerEntry>> {
        self.init_ledger()?;
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare("SELECT id, description, applied_at, checksum FROM schema_migrations ORDER BY id")
            .map_err(StoreError::storage("failed to query applied migrations"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LedgerEntry {
                    id: row.get(0)?,
                    description: row.get(1)?,
                    applied_at: row.get(2)?,
                    checksum: row.get(3)?,
                })
            })
            .map_err(StoreError::storage("failed to query applied migrations"))?;

        let mut applied = HashMap::new();
        for entry in rows {
            let entry = entry.map_err(StoreError::storage("failed to read migration row"))?;
            applied.insert(entry.id.clone(), entry);
        }
        Ok(applied)
    }

    /// Registered migrations absent from the ledger, ascending by id.
    pub fn pending(&self) -> Result<Vec<Migration>> {
        let applied = self.applied()?;
        // BTreeMap iteration is already ascending by id.
        Ok(self
            .migrations
            .values()
            .filter(|m| !applied.contains_key(&m.id))
            .cloned()
            .collect())
    }

    /// Applies one migration atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] when the forward body is blank or the
    /// id is invalid, and [`StoreError::Storage`] (naming the migration)
    /// when the body or the ledger insert fails. Nothing persists on error.
    pub fn apply_one(&self, migration: &Migration) -> Result<()> {
        validate_migration_id(&migration.id).map_err(|e| StoreError::Config(e.to_string()))?;
        if migration.up_sql.trim().is_empty() {
            return Err(StoreError::Config(format!(
                "migration {} has no up SQL",
                migration.id
            )));
        }
        self.init_ledger()?;

        let applied_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.store.transaction(|tx| {
            tx.execute_batch(&migration.up_sql).map_err(StoreError::storage(format!(
                "failed to execute migration {}",
                migration.id
            )))?;
            tx.execute(
                "INSERT INTO schema_migrations (id, description, applied_at, checksum) VALUES (?1, ?2, ?3, ?4)",
                params![migration.id, migration.description, applied_at, migration.checksum()],
            )
            .map_err(StoreError::storage(format!(
                "failed to record migration {}",
                migration.id
            )))?;
            Ok(())
        })?;

        info!(id = %migration.id, description = %migration.description, "applied migration");
        Ok(())
    }

    /// Applies every pending migration in ascending id order.
    ///
    /// Stops at the first failure; migrations applied before it stay
    /// applied. Returns the ids applied by this call.
    pub fn apply_all(&self) -> Result<Vec<String>> {
        let pending = self.pending()?;
        if pending.is_empty() {
            debug!("no pending migrations");
            return Ok(Vec::new());
        }

        info!(count = pending.len(), "applying pending migrations");
        let mut applied = Vec::with_capacity(pending.len());
        for migration in &pending {
            self.apply_one(migration)?;
            applied.push(migration.id.clone());
        }
        Ok(applied)
    }

    /// Rolls back one migration atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] when the migration has no reverse body.
    pub fn rollback_one(&self, migration: &Migration) -> Result<()> {
        if !migration.is_reversible() {
            return Err(StoreError::Config(format!(
                "migration {} has no down SQL; it cannot be rolled back",
                migration.id
            )));
        }
        self.init_ledger()?;

        self.store.transaction(|tx| {
            tx.execute_batch(&migration.down_sql).map_err(StoreError::storage(format!(
                "failed to roll back migration {}",
                migration.id
            )))?;
            tx.execute("DELETE FROM schema_migrations WHERE id = ?1", params![migration.id])
                .map_err(StoreError::storage(format!(
                    "failed to remove migration record {}",
                    migration.id
                )))?;
            Ok(())
        })?;

        info!(id = %migration.id, description = %migration.description, "rolled back migration");
        Ok(())
    }

    /// Most recently applied ledger row, if any.
    pub fn last_applied(&self) -> Result<Option<LedgerEntry>> {
        self.init_ledger()?;
        self.store
            .connection()
            .query_row(
                "SELECT id, description, applied_at, checksum FROM schema_migrations
                 ORDER BY applied_at DESC, id DESC LIMIT 1",
                [],
                |row| {
                    Ok(LedgerEntry {
                        id: row.get(0)?,
                        description: row.get(1)?,
                        applied_at: row.get(2)?,
                        checksum: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::storage("failed to get last applied migration"))
    }

    /// Rolls back the most recently applied migration.
    ///
    /// Returns the rolled-back id, or `None` when nothing is applied.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the last applied migration is
    /// not registered in this engine.
    pub fn rollback_last(&self) -> Result<Option<String>> {
        let Some(last) = self.last_applied()? else {
            debug!("no migrations to roll back");
            return Ok(None);
        };
        let migration = self.migrations.get(&last.id).ok_or_else(|| {
            StoreError::NotFound(format!(
                "migration {} not found in registered migrations",
                last.id
            ))
        })?;
        self.rollback_one(migration)?;
        Ok(Some(last.id))
    }

    /// Rolls back up to `count` migrations, newest first.
    ///
    /// Stops early when nothing remains applied and at the first failure.
    pub fn rollback_last_n(&self, count: usize) -> Result<Vec<String>> {
        let mut rolled_back = Vec::new();
        for _ in 0..count {
            match self.rollback_last()? {
                Some(id) => rolled_back.push(id),
                None => break,
            }
        }
        Ok(rolled_back)
    }

    /// Every registered migration with its applied state, ascending by id.
    pub fn status(&self) -> Result<Vec<MigrationStatus>> {
        let applied = self.applied()?;
        Ok(self
            .migrations
            .values()
            .map(|m| {
                let entry = applied.get(&m.id);
                MigrationStatus {
                    id: m.id.clone(),
                    description: m.description.clone(),
                    applied: entry.is_some(),
                    applied_at: entry.map(|e| e.applied_at.clone()),
                    checksum_matches: entry.is_none_or(|e| e.checksum == m.checksum()),
                    reversible: m.is_reversible(),
                }
            })
            .collect())
    }

    /// Ids of applied migrations whose registered body no longer matches
    /// the checksum recorded when they were applied.
    pub fn verify_checksums(&self) -> Result<Vec<String>> {
        Ok(self
            .status()?
            .into_iter()
            .filter(|s| s.applied && !s.checksum_matches)
            .map(|s| s.id)
            .collect())
    }
}

fn body_checksum(body: &str) -> String {
    format!("{:x}", Sha256::digest(body.trim().as_bytes()))
}

/// The built-in migrations, ascending by id.
///
/// `004_add_metadata_columns` has no reverse body because SQLite cannot
/// drop the columns it adds.
pub fn core_migrations() -> Vec<Migration> {
    vec![
        Migration::new(
            "001_initial_schema",
            "Create initial core tables for templates and blueprints",
            "-- Core tables are created when the store is opened.\n-- This entry records the baseline.",
            "-- The baseline tables are kept on rollback.",
        ),
        Migration::new(
            "002_add_indexes",
            "Add database indexes for improved query performance",
            "CREATE INDEX IF NOT EXISTS idx_templates_name ON templates(name);
             CREATE INDEX IF NOT EXISTS idx_blueprints_name ON blueprints(name);",
            "DROP INDEX IF EXISTS idx_templates_name;
             DROP INDEX IF EXISTS idx_blueprints_name;",
        ),
        Migration::new(
            "003_add_audit_trail",
            "Add audit trail tables for tracking changes",
            "CREATE TABLE IF NOT EXISTS audit_log (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 table_name TEXT NOT NULL,
                 record_id TEXT NOT NULL,
                 action TEXT NOT NULL,
                 old_values TEXT,
                 new_values TEXT,
                 changed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                 changed_by TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_audit_log_table ON audit_log(table_name);
             CREATE INDEX IF NOT EXISTS idx_audit_log_changed_at ON audit_log(changed_at);",
            "DROP TABLE IF EXISTS audit_log;",
        ),
        Migration::new(
            "004_add_metadata_columns",
            "Add metadata and timestamp columns to core tables",
            "ALTER TABLE blueprints ADD COLUMN metadata_json TEXT NOT NULL DEFAULT '{}';
             ALTER TABLE hooks ADD COLUMN created_at TEXT;
             ALTER TABLE hooks ADD COLUMN updated_at TEXT;
             ALTER TABLE plugins ADD COLUMN created_at TEXT;
             ALTER TABLE plugins ADD COLUMN updated_at TEXT;",
            "",
        ),
    ]
}
