//! Export and import of store contents.
//!
//! Three export formats are supported:
//!
//! - **SQL**: `CREATE TABLE IF NOT EXISTS` plus one `INSERT` per row.
//! - **JSON**: an [`ExportBundle`] with metadata and per-table rows.
//! - **CSV**: one file per table in a directory named after the output
//!   path without its extension.
//!
//! Imports accept SQL and JSON. Every import that writes runs in a single
//! transaction; a dry run does the same parsing and validation and writes
//! nothing.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use gogo_core::{ExportBundle, ExportFormat, TableRow, validate_bundle, validate_identifier};
use rusqlite::{Row, params_from_iter};
use serde::Serialize;
use tracing::{debug, info};

use crate::convert::{csv_escape, json_to_value, value_to_csv_field, value_to_json, value_to_sql_literal};
use crate::error::{Result, StoreError};
use crate::handle::Store;
use crate::migration::MigrationEngine;
use crate::query::RecordQuery;
use crate::schema::{LEDGER_TABLE, quote_identifier, with_if_not_exists};
use crate::staged::{StagedFile, is_store_file};

/// Options for [`ExportManager::export`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub output: PathBuf,
    pub format: ExportFormat,
    /// Tables to export; empty means every user table.
    pub tables: Vec<String>,
    pub include_schema: bool,
    pub include_data: bool,
    /// Discover and count without writing any file.
    pub dry_run: bool,
}

impl ExportOptions {
    pub fn new(output: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            output: output.into(),
            format,
            tables: Vec::new(),
            include_schema: true,
            include_data: true,
            dry_run: false,
        }
    }

    pub fn tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn include_schema(mut self, include: bool) -> Self {
        self.include_schema = include;
        self
    }

    pub fn include_data(mut self, include: bool) -> Self {
        self.include_data = include;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Options for [`ExportManager::import`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    pub input: PathBuf,
    pub format: ExportFormat,
    /// Check bundle version and counts before applying.
    pub validate: bool,
    pub dry_run: bool,
    /// Replace rows that collide on a unique key instead of failing.
    pub replace_existing: bool,
    /// Bring the target up to the core schema before importing.
    pub apply_migrations: bool,
}

impl ImportOptions {
    pub fn new(input: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            input: input.into(),
            format,
            validate: true,
            dry_run: false,
            replace_existing: false,
            apply_migrations: true,
        }
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }

    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }
}

/// Outcome of an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    /// Output file, or the output directory for CSV.
    pub path: PathBuf,
    pub format: ExportFormat,
    pub tables: usize,
    pub rows: usize,
    pub dry_run: bool,
}

/// Outcome of an import. For dry runs the counts are what a real run
/// would apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Core migrations applied to the target first (pending ones for a
    /// dry run).
    pub migrations: Vec<String>,
    pub statements: usize,
    pub tables: usize,
    pub rows: usize,
    pub dry_run: bool,
}

/// Export and import against a borrowed store.
pub struct ExportManager<'a> {
    store: &'a Store,
}

impl<'a> ExportManager<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Every user table, ascending by name.
    ///
    /// SQLite's internal tables and the migration ledger are excluded; the
    /// ledger can still be exported by naming it explicitly.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name <> ?1
                 ORDER BY name",
            )
            .map_err(StoreError::storage("failed to list tables"))?;
        let rows = stmt
            .query_map([LEDGER_TABLE], |r| r.get::<_, String>(0))
            .map_err(StoreError::storage("failed to list tables"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::storage("failed to list tables"))
    }

    /// Resolves the requested tables, or all tables when none are given.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for a requested table that does
    /// not exist.
    pub fn resolve_tables(&self, requested: &[String]) -> Result<Vec<String>> {
        let existing = self.table_names()?;
        if requested.is_empty() {
            return Ok(existing);
        }
        let mut resolved = Vec::with_capacity(requested.len());
        for table in requested {
            validate_identifier(table)?;
            if !existing.contains(table) && !self.ledger_exists(table)? {
                return Err(StoreError::NotFound(format!("table {table} does not exist")));
            }
            if !resolved.contains(table) {
                resolved.push(table.clone());
            }
        }
        Ok(resolved)
    }

    /// Exports store contents in the requested format.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when an output file would overwrite
    /// the store's own database file.
    pub fn export(&self, options: &ExportOptions) -> Result<ExportReport> {
        self.check_output(&options.output)?;
        let tables = self.resolve_tables(&options.tables)?;
        debug!(tables = tables.len(), format = %options.format, "exporting");

        let (path, rows) = match options.format {
            ExportFormat::Sql => (options.output.clone(), self.export_sql(&tables, options)?),
            ExportFormat::Json => (options.output.clone(), self.export_json(&tables, options)?),
            ExportFormat::Csv => {
                let dir = options.output.with_extension("");
                let rows = self.export_csv(&tables, &dir, options)?;
                (dir, rows)
            }
        };

        info!(
            path = %path.display(),
            tables = tables.len(),
            rows,
            dry_run = options.dry_run,
            "export complete"
        );
        Ok(ExportReport {
            path,
            format: options.format,
            tables: tables.len(),
            rows,
            dry_run: options.dry_run,
        })
    }

    /// Builds a structured bundle of the given tables (all when empty).
    ///
    /// Includes denormalized template and blueprint views when those
    /// tables are part of the export.
    pub fn export_bundle(&self, tables: &[String]) -> Result<ExportBundle> {
        let tables = self.resolve_tables(tables)?;
        self.build_bundle(&tables, true)
    }

    /// Imports a SQL or JSON export.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] when the input file or a target table is
    ///   missing.
    /// - [`StoreError::Config`] for CSV input.
    /// - [`StoreError::Validation`] when a bundle fails validation.
    /// - [`StoreError::Storage`] naming the failing statement; nothing is
    ///   written in that case.
    pub fn import(&self, options: &ImportOptions) -> Result<ImportReport> {
        if !options.input.exists() {
            return Err(StoreError::missing_file("import file", &options.input));
        }
        if options.format == ExportFormat::Csv {
            return Err(StoreError::Config(
                "CSV import is not supported; import a sql or json export instead".to_string(),
            ));
        }
        let migrations = self.prepare_schema(options)?;
        let mut report = match options.format {
            ExportFormat::Json => self.import_json(options, !migrations.is_empty())?,
            _ => self.import_sql(options)?,
        };
        report.migrations = migrations;
        info!(
            path = %options.input.display(),
            statements = report.statements,
            tables = report.tables,
            rows = report.rows,
            dry_run = report.dry_run,
            "import complete"
        );
        Ok(report)
    }

    fn export_sql(&self, tables: &[String], options: &ExportOptions) -> Result<usize> {
        let mut staged = if options.dry_run {
            None
        } else {
            Some(self.create_output(&options.output)?)
        };
        let mut sink = io::sink();
        let out: &mut dyn Write = match staged.as_mut() {
            Some(file) => file,
            None => &mut sink,
        };
        let write_err = write_error(&options.output);

        writeln!(out, "-- gogo database export").map_err(&write_err)?;
        writeln!(out, "-- Exported at: {}", Utc::now().to_rfc3339()).map_err(&write_err)?;
        writeln!(out, "-- Tables: {}", tables.len()).map_err(&write_err)?;

        let mut total = 0;
        for table in tables {
            writeln!(out, "\n-- Table: {table}").map_err(&write_err)?;
            if options.include_schema {
                let create = self.create_statement(table)?;
                writeln!(out, "{};", with_if_not_exists(&create)).map_err(&write_err)?;
            }
            if !options.include_data {
                continue;
            }
            let quoted_table = quote_identifier(table);
            total += self.scan_table(table, |columns, row| {
                let column_list = columns
                    .iter()
                    .map(|c| quote_identifier(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let values = (0..columns.len())
                    .map(|i| row.get_ref(i).map(value_to_sql_literal))
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(StoreError::storage(format!("failed to read row of {table}")))?
                    .join(", ");
                writeln!(out, "INSERT INTO {quoted_table} ({column_list}) VALUES ({values});")
                    .map_err(&write_err)
            })?;
        }
        out.flush().map_err(&write_err)?;
        if let Some(file) = staged {
            file.commit()?;
        }
        Ok(total)
    }

    fn export_json(&self, tables: &[String], options: &ExportOptions) -> Result<usize> {
        let bundle = self.build_bundle(tables, options.include_data)?;
        let rows = bundle.row_count();
        if !options.dry_run {
            let mut out = self.create_output(&options.output)?;
            serde_json::to_writer_pretty(&mut out, &bundle)?;
            out.commit()?;
        }
        Ok(rows)
    }

    fn export_csv(&self, tables: &[String], dir: &Path, options: &ExportOptions) -> Result<usize> {
        if !options.dry_run {
            fs::create_dir_all(dir)
                .map_err(StoreError::io(format!("failed to create directory {}", dir.display())))?;
        }

        let mut total = 0;
        for table in tables {
            let path = dir.join(format!("{table}.csv"));
            let mut staged = if options.dry_run {
                None
            } else {
                Some(self.create_output(&path)?)
            };
            let mut sink = io::sink();
            let out: &mut dyn Write = match staged.as_mut() {
                Some(file) => file,
                None => &mut sink,
            };
            let write_err = write_error(&path);

            let columns = self.column_names(table)?;
            let header = columns.iter().map(|c| csv_escape(c)).collect::<Vec<_>>().join(",");
            write!(out, "{header}\r\n").map_err(&write_err)?;
            if options.include_data {
                total += self.scan_table(table, |columns, row| {
                    let fields = (0..columns.len())
                        .map(|i| row.get_ref(i).map(value_to_csv_field))
                        .collect::<rusqlite::Result<Vec<_>>>()
                        .map_err(StoreError::storage(format!("failed to read row of {table}")))?
                        .join(",");
                    write!(out, "{fields}\r\n").map_err(&write_err)
                })?;
            }
            out.flush().map_err(&write_err)?;
            if let Some(file) = staged {
                file.commit()?;
            }
        }
        Ok(total)
    }

    fn check_output(&self, path: &Path) -> Result<()> {
        match self.store.path() {
            Some(db_path) if is_store_file(path, db_path) => Err(StoreError::Conflict(format!(
                "export output {} is the database file itself",
                path.display()
            ))),
            _ => Ok(()),
        }
    }

    fn create_output(&self, path: &Path) -> Result<StagedFile> {
        self.check_output(path)?;
        StagedFile::create(path)
    }

    fn build_bundle(&self, tables: &[String], include_data: bool) -> Result<ExportBundle> {
        let mut bundle = ExportBundle::new(Utc::now());
        for table in tables {
            let mut rows = Vec::new();
            if include_data {
                self.scan_table(table, |columns, row| {
                    let mut record = TableRow::new();
                    for (i, column) in columns.iter().enumerate() {
                        let value = row
                            .get_ref(i)
                            .map_err(StoreError::storage(format!("failed to read row of {table}")))?;
                        record.insert(column.clone(), value_to_json(value));
                    }
                    rows.push(record);
                    Ok(())
                })?;
            }
            bundle.insert_table(table.clone(), rows);
        }

        if include_data {
            let query = RecordQuery::new(self.store);
            if tables.iter().any(|t| t == "templates") {
                bundle.templates = query.list_templates()?;
            }
            if tables.iter().any(|t| t == "blueprints") {
                bundle.blueprints = query.list_blueprints()?;
            }
        }
        Ok(bundle)
    }

    /// Applies pending core migrations so that exports taken from a
    /// migrated store fit the target. A dry run only lists them.
    fn prepare_schema(&self, options: &ImportOptions) -> Result<Vec<String>> {
        if !options.apply_migrations {
            return Ok(Vec::new());
        }
        let mut engine = MigrationEngine::new(self.store);
        engine.register_core_schemas();
        if options.dry_run {
            Ok(engine.pending()?.into_iter().map(|m| m.id).collect())
        } else {
            engine.apply_all()
        }
    }

    fn import_sql(&self, options: &ImportOptions) -> Result<ImportReport> {
        let text = fs::read_to_string(&options.input).map_err(StoreError::io(format!(
            "failed to read {}",
            options.input.display()
        )))?;
        let statements: Vec<String> = split_sql_statements(&text)
            .into_iter()
            .map(|stmt| {
                if options.replace_existing {
                    with_replace(&stmt)
                } else {
                    stmt
                }
            })
            .collect();

        let targets: Vec<String> = statements.iter().filter_map(|s| insert_target(s)).collect();
        let tables: BTreeSet<&str> = targets.iter().map(String::as_str).collect();
        let report = ImportReport {
            migrations: Vec::new(),
            statements: statements.len(),
            tables: tables.len(),
            rows: targets.len(),
            dry_run: options.dry_run,
        };
        if options.dry_run {
            return Ok(report);
        }

        self.store.transaction(|tx| {
            tx.execute_batch("PRAGMA defer_foreign_keys = ON")
                .map_err(StoreError::storage("failed to defer foreign keys"))?;
            for (index, statement) in statements.iter().enumerate() {
                tx.execute_batch(statement).map_err(StoreError::storage(format!(
                    "failed to execute statement {} ({})",
                    index + 1,
                    excerpt(statement)
                )))?;
            }
            Ok(())
        })?;
        Ok(report)
    }

    /// `schema_pending` marks a dry run against a store whose core
    /// migrations have not run yet; tables they create cannot be checked.
    fn import_json(&self, options: &ImportOptions, schema_pending: bool) -> Result<ImportReport> {
        let file = File::open(&options.input).map_err(StoreError::io(format!(
            "failed to open {}",
            options.input.display()
        )))?;
        let bundle: ExportBundle = serde_json::from_reader(BufReader::new(file))?;

        if options.validate {
            let errors = validate_bundle(&bundle);
            if !errors.is_empty() {
                let joined = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
                return Err(StoreError::Validation(joined));
            }
        }
        // Names are interpolated into SQL, so they are checked even when
        // validation is off.
        for (table, rows) in &bundle.tables {
            validate_identifier(table)?;
            for column in rows.iter().flat_map(|row| row.keys()) {
                validate_identifier(column)?;
            }
        }

        let existing = self.table_names()?;
        for (table, rows) in &bundle.tables {
            if rows.is_empty() || existing.contains(table) || self.ledger_exists(table)? {
                continue;
            }
            if options.dry_run && schema_pending {
                debug!(table, "table not present until pending migrations run");
                continue;
            }
            return Err(StoreError::NotFound(format!("table {table} does not exist")));
        }

        let rows = bundle.row_count();
        let report = ImportReport {
            migrations: Vec::new(),
            statements: rows,
            tables: bundle.table_count(),
            rows,
            dry_run: options.dry_run,
        };
        if options.dry_run {
            return Ok(report);
        }

        let verb = if options.replace_existing {
            "INSERT OR REPLACE INTO"
        } else {
            "INSERT INTO"
        };
        self.store.transaction(|tx| {
            tx.execute_batch("PRAGMA defer_foreign_keys = ON")
                .map_err(StoreError::storage("failed to defer foreign keys"))?;
            for (table, rows) in &bundle.tables {
                let quoted = quote_identifier(table);
                for row in rows {
                    let sql = if row.is_empty() {
                        format!("{verb} {quoted} DEFAULT VALUES")
                    } else {
                        let columns = row.keys().map(|c| quote_identifier(c)).collect::<Vec<_>>();
                        let placeholders = vec!["?"; columns.len()].join(", ");
                        format!("{verb} {quoted} ({}) VALUES ({placeholders})", columns.join(", "))
                    };
                    let values = row.values().map(json_to_value).collect::<Result<Vec<_>>>()?;
                    tx.execute(&sql, params_from_iter(values))
                        .map_err(StoreError::storage(format!("failed to import row into {table}")))?;
                }
            }
            Ok(())
        })?;
        Ok(report)
    }

    fn ledger_exists(&self, table: &str) -> Result<bool> {
        if table != LEDGER_TABLE {
            return Ok(false);
        }
        self.store
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [LEDGER_TABLE],
                |r| r.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .map_err(StoreError::storage("failed to look up migration ledger"))
    }

    fn create_statement(&self, table: &str) -> Result<String> {
        self.store
            .connection()
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |r| r.get(0),
            )
            .map_err(StoreError::storage(format!("failed to read schema of {table}")))
    }

    fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.store.connection();
        let stmt = conn
            .prepare(&format!("SELECT * FROM {} LIMIT 0", quote_identifier(table)))
            .map_err(StoreError::storage(format!("failed to read columns of {table}")))?;
        Ok(stmt.column_names().into_iter().map(String::from).collect())
    }

    fn scan_table<F>(&self, table: &str, mut visit: F) -> Result<usize>
    where
        F: FnMut(&[String], &Row<'_>) -> Result<()>,
    {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {}", quote_identifier(table)))
            .map_err(StoreError::storage(format!("failed to read table {table}")))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query([])
            .map_err(StoreError::storage(format!("failed to read table {table}")))?;
        let mut count = 0;
        while let Some(row) = rows
            .next()
            .map_err(StoreError::storage(format!("failed to read table {table}")))?
        {
            visit(&columns, row)?;
            count += 1;
        }
        Ok(count)
    }
}

fn write_error(path: &Path) -> impl Fn(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        context: format!("failed to write {}", path.display()),
        source,
    }
}

/// Splits a SQL script into statements.
///
/// Semicolons inside quoted strings and identifiers do not terminate a
/// statement. Line and block comments are dropped, and fragments left
/// blank are skipped.
pub(crate) fn split_sql_statements(script: &str) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Normal,
        Quoted(char),
        LineComment,
        BlockComment,
    }

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                '\'' | '"' | '`' => {
                    state = State::Quoted(c);
                    current.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                ';' => {
                    push_statement(&mut statements, &current);
                    current.clear();
                }
                _ => current.push(c),
            },
            // A doubled quote closes and immediately reopens, which keeps
            // the escaped quote inside the literal.
            State::Quoted(quote) => {
                current.push(c);
                if c == quote {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    current.push('\n');
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    current.push(' ');
                    state = State::Normal;
                }
            }
        }
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, fragment: &str) {
    let trimmed = fragment.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn with_replace(statement: &str) -> String {
    const INSERT: &str = "INSERT INTO ";
    if starts_with_ignore_case(statement, INSERT) {
        format!("INSERT OR REPLACE INTO {}", &statement[INSERT.len()..])
    } else {
        statement.to_string()
    }
}

/// Target table of an `INSERT` statement, unquoted.
fn insert_target(statement: &str) -> Option<String> {
    let rest = ["INSERT OR REPLACE INTO ", "INSERT INTO "]
        .iter()
        .find(|prefix| starts_with_ignore_case(statement, prefix))
        .map(|prefix| statement[prefix.len()..].trim_start())?;
    let name = match rest.chars().next()? {
        '"' => rest[1..].split('"').next()?,
        _ => rest
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()?,
    };
    Some(name.to_string())
}

fn excerpt(statement: &str) -> String {
    const MAX: usize = 60;
    let single_line = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    match single_line.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &single_line[..cut]),
        None => single_line,
    }
}
