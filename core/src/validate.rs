//! Bundle and identifier validation.
//!
//! Catches malformed import bundles and unsafe identifiers before they
//! reach the database. Table names coming from bundles or the command line
//! are interpolated into SQL, so they must pass
//! [`validate_identifier`] first.
//!
//! # Examples
//!
//! ```
//! use gogo_core::*;
//!
//! let bundle = ExportBundle::new(chrono::Utc::now());
//! assert!(validate_bundle(&bundle).is_empty());
//!
//! assert!(validate_identifier("templates").is_ok());
//! assert!(validate_identifier("drop;--").is_err());
//! ```

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::ExportBundle;

static MIGRATION_ID_CONVENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{3,}_[A-Za-z0-9_]+$").expect("migration id pattern is valid")
});

/// Bundle and identifier validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Bundle metadata carries no format version.
    #[error("import data missing version information")]
    MissingVersion,
    /// Metadata table count disagrees with the bundle content.
    #[error("metadata declares {declared} tables but bundle contains {actual}")]
    TableCountMismatch { declared: usize, actual: usize },
    /// Metadata row count disagrees with the bundle content.
    #[error("metadata declares {declared} rows but bundle contains {actual}")]
    RowCountMismatch { declared: usize, actual: usize },
    /// Identifier is empty or contains characters other than
    /// alphanumerics and underscores.
    #[error("invalid identifier '{0}': must contain only alphanumeric characters and underscores")]
    InvalidIdentifier(String),
    /// A row in a bundle table is keyed by an invalid column name.
    #[error("invalid column '{column}' in table '{table}'")]
    InvalidColumn { table: String, column: String },
    /// Migration id is empty or contains whitespace.
    #[error("invalid migration id '{0}'")]
    InvalidMigrationId(String),
}

/// Validates an import bundle.
///
/// Checks the format version first (an unversioned bundle is rejected
/// without further checks), then that the metadata counts match the
/// content, then every table and column name.
pub fn validate_bundle(bundle: &ExportBundle) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if bundle.metadata.version.trim().is_empty() {
        errors.push(ValidationError::MissingVersion);
        return errors;
    }

    let actual_tables = bundle.table_count();
    if bundle.metadata.table_count != actual_tables {
        errors.push(ValidationError::TableCountMismatch {
            declared: bundle.metadata.table_count,
            actual: actual_tables,
        });
    }
    let actual_rows = bundle.row_count();
    if bundle.metadata.row_count != actual_rows {
        errors.push(ValidationError::RowCountMismatch {
            declared: bundle.metadata.row_count,
            actual: actual_rows,
        });
    }

    for (table, rows) in &bundle.tables {
        if let Err(err) = validate_identifier(table) {
            errors.push(err);
            continue;
        }
        for row in rows {
            for column in row.keys() {
                if validate_identifier(column).is_err() {
                    errors.push(ValidationError::InvalidColumn {
                        table: table.clone(),
                        column: column.clone(),
                    });
                    return errors;
                }
            }
        }
    }

    errors
}

/// Validates that an identifier contains only alphanumerics and underscores.
pub fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Validates a migration id: non-empty and free of whitespace.
pub fn validate_migration_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidMigrationId(id.to_string()));
    }
    Ok(())
}

/// Returns `true` if `id` follows the `NNN_description` naming convention.
///
/// Non-conventional ids are still accepted; they simply sort lexically
/// among the rest.
///
/// # Examples
///
/// ```
/// use gogo_core::follows_migration_convention;
///
/// assert!(follows_migration_convention("001_initial_schema"));
/// assert!(!follows_migration_convention("initial"));
/// ```
pub fn follows_migration_convention(id: &str) -> bool {
    MIGRATION_ID_CONVENTION.is_match(id)
}
