//! Health checks and maintenance operations.
//!
//! [`HealthChecker::check`] runs a fixed battery of read-only probes and
//! derives advisory recommendations. The overall status of a
//! [`HealthReport`] is always the worst individual status.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::handle::Store;
use crate::schema::quote_identifier;

const FREE_PAGE_WARNING: i64 = 100;
const SLOW_QUERY: Duration = Duration::from_millis(100);
const LARGE_DATABASE_BYTES: u64 = 100 * 1024 * 1024;
const HIGH_ROW_COUNT: i64 = 10_000;

/// Severity of a check. Ordered `Ok < Warning < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        })
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub duration_micros: u64,
    pub checked_at: DateTime<Utc>,
}

/// Point-in-time health of a store. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: CheckStatus,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    pub database_size: u64,
    pub table_count: i64,
    pub total_rows: i64,
    pub integrity_ok: bool,
    pub wal_mode: bool,
    pub sqlite_version: String,
    pub checks: Vec<CheckResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

impl HealthReport {
    /// Finds a check by name.
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Row count of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub name: String,
    pub row_count: i64,
}

/// Engine-level statistics for `db status --detailed` and `db size`.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    /// Backing file size, or `page_count * page_size` for in-memory stores.
    pub total_size: u64,
    pub page_count: i64,
    pub page_size: i64,
    pub free_pages: i64,
    pub free_space: i64,
    pub journal_mode: String,
    pub cache_size: i64,
    pub temp_store: String,
    pub wal_size: u64,
    pub tables: Vec<TableStats>,
}

/// Result of a `VACUUM`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VacuumReport {
    pub size_before: u64,
    pub size_after: u64,
    pub duration_micros: u64,
}

impl VacuumReport {
    /// Bytes reclaimed, zero when the store grew.
    pub fn reclaimed(&self) -> u64 {
        self.size_before.saturating_sub(self.size_after)
    }
}

/// Diagnostics and maintenance against a borrowed store.
pub struct HealthChecker<'a> {
    store: &'a Store,
}

impl<'a> HealthChecker<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Runs every probe and returns the report.
    ///
    /// A connectivity failure ends the battery early with an `ERROR`
    /// report; every other failure is recorded in its check.
    pub fn check(&self) -> HealthReport {
        let checked_at = Utc::now();
        let mut report = HealthReport {
            status: CheckStatus::Ok,
            checked_at,
            database_path: self.store.path().map(|p| p.display().to_string()),
            database_size: self.file_size(),
            table_count: 0,
            total_rows: 0,
            integrity_ok: false,
            wal_mode: false,
            sqlite_version: String::new(),
            checks: Vec::new(),
            recommendations: Vec::new(),
        };

        let connectivity = self.check_connectivity();
        if connectivity.status == CheckStatus::Error {
            report.status = CheckStatus::Error;
            report.checks.push(connectivity);
            return report;
        }
        report.checks.push(connectivity);

        let integrity = self.check_integrity();
        report.integrity_ok = integrity.status == CheckStatus::Ok;
        report.checks.push(integrity);

        let version = self.check_version();
        report.sqlite_version = version.value.clone().unwrap_or_default();
        report.checks.push(version);

        let journal = self.check_journal_mode();
        report.wal_mode = journal.value.as_deref() == Some("wal");
        report.checks.push(journal);

        let tables = self.check_table_count();
        report.table_count = parse_count(&tables);
        report.checks.push(tables);

        let rows = self.check_row_count();
        report.total_rows = parse_count(&rows);
        report.checks.push(rows);

        report.checks.push(self.check_free_space());
        report.checks.push(self.check_performance());

        report.status = report
            .checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(CheckStatus::Ok);
        report.recommendations = recommendations(&report);
        debug!(status = %report.status, checks = report.checks.len(), "health check complete");
        report
    }

    /// Collects page, journal and per-table statistics.
    pub fn stats(&self) -> Result<DatabaseStats> {
        let page_count = self.pragma_i64("page_count")?;
        let page_size = self.pragma_i64("page_size")?;
        let free_pages = self.pragma_i64("freelist_count")?;
        let journal_mode = self.pragma_string("journal_mode")?;
        let cache_size = self.pragma_i64("cache_size")?;
        let temp_store = match self.pragma_i64("temp_store")? {
            1 => "file",
            2 => "memory",
            _ => "default",
        }
        .to_string();

        let total_size = match self.store.path() {
            Some(_) => self.file_size(),
            None => u64::try_from(page_count * page_size).unwrap_or_default(),
        };
        let wal_size = self
            .store
            .path()
            .map(|p| side_file_size(p, "-wal"))
            .unwrap_or_default();

        let tables = self
            .table_names()?
            .into_iter()
            .map(|name| {
                let row_count = self.count_rows(&name)?;
                Ok(TableStats { name, row_count })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DatabaseStats {
            total_size,
            page_count,
            page_size,
            free_pages,
            free_space: free_pages * page_size,
            journal_mode,
            cache_size,
            temp_store,
            wal_size,
            tables,
        })
    }

    /// Runs `PRAGMA integrity_check`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] listing every reported problem
    /// when the result is not `ok`.
    pub fn integrity_check(&self) -> Result<()> {
        let lines = self.integrity_lines()?;
        if lines.len() == 1 && lines[0] == "ok" {
            return Ok(());
        }
        Err(StoreError::Integrity(lines.join("; ")))
    }

    /// Compacts the store with `VACUUM`.
    pub fn vacuum(&self) -> Result<VacuumReport> {
        let size_before = self.allocated_size()?;
        let start = Instant::now();
        self.store
            .connection()
            .execute_batch("VACUUM")
            .map_err(StoreError::storage("vacuum failed"))?;
        let elapsed = start.elapsed();
        let size_after = self.allocated_size()?;
        info!(size_before, size_after, "vacuum complete");
        Ok(VacuumReport {
            size_before,
            size_after,
            duration_micros: micros(elapsed),
        })
    }

    /// Refreshes planner statistics with `ANALYZE`.
    pub fn analyze(&self) -> Result<Duration> {
        let start = Instant::now();
        self.store
            .connection()
            .execute_batch("ANALYZE")
            .map_err(StoreError::storage("analyze failed"))?;
        let elapsed = start.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "analyze complete");
        Ok(elapsed)
    }

    fn check_connectivity(&self) -> CheckResult {
        probe("Database Connectivity", || {
            match self
                .store
                .connection()
                .query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
            {
                Ok(_) => (CheckStatus::Ok, "Database connection successful".to_string(), None),
                Err(err) => (
                    CheckStatus::Error,
                    format!("Failed to connect to database: {err}"),
                    None,
                ),
            }
        })
    }

    fn check_integrity(&self) -> CheckResult {
        probe("Database Integrity", || match self.integrity_lines() {
            Ok(lines) if lines.len() == 1 && lines[0] == "ok" => (
                CheckStatus::Ok,
                "Database integrity verified".to_string(),
                Some("ok".to_string()),
            ),
            Ok(lines) => {
                let joined = lines.join("; ");
                (
                    CheckStatus::Error,
                    format!("Integrity issues found: {joined}"),
                    Some(joined),
                )
            }
            Err(err) => (CheckStatus::Error, format!("Integrity check failed: {err}"), None),
        })
    }

    fn check_version(&self) -> CheckResult {
        probe("SQLite Version", || {
            match self
                .store
                .connection()
                .query_row("SELECT sqlite_version()", [], |r| r.get::<_, String>(0))
            {
                Ok(version) => (
                    CheckStatus::Ok,
                    format!("SQLite version: {version}"),
                    Some(version),
                ),
                Err(err) => (
                    CheckStatus::Warning,
                    format!("Could not retrieve SQLite version: {err}"),
                    None,
                ),
            }
        })
    }

    fn check_journal_mode(&self) -> CheckResult {
        probe("Journal Mode", || match self.pragma_string("journal_mode") {
            Ok(mode) if mode.eq_ignore_ascii_case("wal") => (
                CheckStatus::Ok,
                "WAL mode enabled".to_string(),
                Some("wal".to_string()),
            ),
            Ok(mode) => (
                CheckStatus::Warning,
                format!("Journal mode is {mode} (consider enabling WAL)"),
                Some(mode.to_ascii_lowercase()),
            ),
            Err(err) => (
                CheckStatus::Warning,
                format!("Could not retrieve journal mode: {err}"),
                None,
            ),
        })
    }

    fn check_table_count(&self) -> CheckResult {
        probe("Table Count", || match self.table_names() {
            Ok(names) => (
                CheckStatus::Ok,
                format!("Database contains {} tables", names.len()),
                Some(names.len().to_string()),
            ),
            Err(err) => (CheckStatus::Warning, format!("Could not count tables: {err}"), None),
        })
    }

    fn check_row_count(&self) -> CheckResult {
        probe("Total Row Count", || {
            let total = self.table_names().and_then(|names| {
                names
                    .iter()
                    .try_fold(0i64, |acc, name| Ok(acc + self.count_rows(name)?))
            });
            match total {
                Ok(total) => (
                    CheckStatus::Ok,
                    format!("Database contains {total} total rows"),
                    Some(total.to_string()),
                ),
                Err(err) => (CheckStatus::Warning, format!("Could not count rows: {err}"), None),
            }
        })
    }

    fn check_free_space(&self) -> CheckResult {
        probe("Free Space", || match self.pragma_i64("freelist_count") {
            Ok(free) if free > FREE_PAGE_WARNING => (
                CheckStatus::Warning,
                format!("Database has {free} free pages (consider VACUUM)"),
                Some(free.to_string()),
            ),
            Ok(free) => (
                CheckStatus::Ok,
                format!("Database has {free} free pages"),
                Some(free.to_string()),
            ),
            Err(err) => (
                CheckStatus::Warning,
                format!("Could not check free space: {err}"),
                None,
            ),
        })
    }

    fn check_performance(&self) -> CheckResult {
        probe("Query Performance", || {
            let start = Instant::now();
            let result = self.store.connection().query_row(
                "SELECT COUNT(*) FROM sqlite_master",
                [],
                |r| r.get::<_, i64>(0),
            );
            let elapsed = start.elapsed();
            let value = Some(format!("{elapsed:?}"));
            match result {
                Err(err) => (
                    CheckStatus::Warning,
                    format!("Performance test failed: {err}"),
                    value,
                ),
                Ok(_) if elapsed > SLOW_QUERY => (
                    CheckStatus::Warning,
                    format!("Slow query performance: {elapsed:?}"),
                    value,
                ),
                Ok(_) => (
                    CheckStatus::Ok,
                    format!("Query performance: {elapsed:?}"),
                    value,
                ),
            }
        })
    }

    fn integrity_lines(&self) -> Result<Vec<String>> {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare("PRAGMA integrity_check")
            .map_err(StoreError::storage("integrity check failed"))?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(StoreError::storage("integrity check failed"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::storage("integrity check failed"))
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .map_err(StoreError::storage("failed to list tables"))?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(StoreError::storage("failed to list tables"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::storage("failed to list tables"))
    }

    fn count_rows(&self, table: &str) -> Result<i64> {
        self.store
            .connection()
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_identifier(table)),
                [],
                |r| r.get(0),
            )
            .map_err(StoreError::storage(format!("failed to count rows in {table}")))
    }

    fn pragma_i64(&self, pragma: &str) -> Result<i64> {
        self.store
            .connection()
            .query_row(&format!("PRAGMA {pragma}"), [], |r| r.get(0))
            .map_err(StoreError::storage(format!("failed to read PRAGMA {pragma}")))
    }

    fn pragma_string(&self, pragma: &str) -> Result<String> {
        self.store
            .connection()
            .query_row(&format!("PRAGMA {pragma}"), [], |r| r.get(0))
            .map_err(StoreError::storage(format!("failed to read PRAGMA {pragma}")))
    }

    fn allocated_size(&self) -> Result<u64> {
        let pages = self.pragma_i64("page_count")?;
        let size = self.pragma_i64("page_size")?;
        Ok(u64::try_from(pages * size).unwrap_or_default())
    }

    fn file_size(&self) -> u64 {
        self.store
            .path()
            .and_then(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or_default()
    }
}

fn side_file_size(path: &Path, suffix: &str) -> u64 {
    let mut side = path.as_os_str().to_os_string();
    side.push(suffix);
    fs::metadata(side).map(|m| m.len()).unwrap_or_default()
}

fn probe<F>(name: &str, f: F) -> CheckResult
where
    F: FnOnce() -> (CheckStatus, String, Option<String>),
{
    let checked_at = Utc::now();
    let start = Instant::now();
    let (status, message, value) = f();
    CheckResult {
        name: name.to_string(),
        status,
        message,
        value,
        duration_micros: micros(start.elapsed()),
        checked_at,
    }
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

fn parse_count(check: &CheckResult) -> i64 {
    check
        .value
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

fn recommendations(report: &HealthReport) -> Vec<String> {
    let mut recs = Vec::new();
    if !report.wal_mode {
        recs.push("Enable WAL mode for better concurrency: PRAGMA journal_mode=WAL".to_string());
    }
    if report
        .check("Free Space")
        .is_some_and(|c| c.status == CheckStatus::Warning)
    {
        recs.push("Run VACUUM to reclaim free space and optimize the database".to_string());
    }
    if report.database_size > LARGE_DATABASE_BYTES {
        recs.push("Large database detected: run ANALYZE regularly to keep query plans current".to_string());
    }
    if report.total_rows > HIGH_ROW_COUNT {
        recs.push("High row count: ensure frequently queried columns are indexed".to_string());
    }
    recs
}
