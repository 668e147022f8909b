//! Embedded SQLite store for gogo.
//!
//! This crate persists templates, blueprints, scoped configuration, hooks,
//! plugins and an audit trail, and provides the maintenance tooling around
//! that store.
//!
//! # Architecture
//!
//! - **`handle`**: the [`Store`], owner of the single connection
//! - **`schema`**: base tables and the migration ledger DDL
//! - **`migration`**: ordered, transactional schema migrations
//! - **`health`**: diagnostics, statistics, `VACUUM` and `ANALYZE`
//! - **`backup`**: raw or gzip backups and safe restores
//! - **`export`**: SQL/JSON/CSV export and SQL/JSON import
//! - **`query`**: typed record access
//! - **`convert`**: SQLite value conversions for the export formats
//!
//! Managers borrow the store for one operation; none of them keeps the
//! connection.
//!
//! # Quick start
//!
//! ```no_run
//! use gogo_store::{HealthChecker, MigrationEngine, Store};
//!
//! let store = Store::open("/home/me/.gogo.db").unwrap();
//!
//! let mut engine = MigrationEngine::new(&store);
//! engine.register_core_schemas();
//! for id in engine.apply_all().unwrap() {
//!     println!("applied {id}");
//! }
//!
//! let report = HealthChecker::new(&store).check();
//! println!("store is {}", report.status);
//! ```

mod backup;
mod convert;
mod error;
mod export;
mod handle;
mod health;
mod migration;
mod query;
mod schema;
mod staged;

pub use backup::{
    BackupInfo, BackupManager, BackupOptions, BackupReport, RestoreOptions, RestoreReport,
    backup_info, is_gzip,
};
pub use error::{Result, StoreError};
pub use export::{ExportManager, ExportOptions, ExportReport, ImportOptions, ImportReport};
pub use handle::Store;
pub use health::{
    CheckResult, CheckStatus, DatabaseStats, HealthChecker, HealthReport, TableStats, VacuumReport,
};
pub use migration::{LedgerEntry, Migration, MigrationEngine, MigrationStatus, core_migrations};
pub use query::RecordQuery;
pub use schema::{BASE_TABLES, LEDGER_TABLE};
