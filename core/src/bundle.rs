//! Self-describing export bundle.
//!
//! An [`ExportBundle`] is the structured (JSON) snapshot produced by a
//! database export: a metadata header, the generic per-table row lists,
//! and optional denormalized views of the template and blueprint tables.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BlueprintRecord, TemplateRecord};

/// Format version written into every bundle's metadata.
pub const BUNDLE_FORMAT_VERSION: &str = "1.0";

/// A generic table row keyed by column name.
pub type TableRow = serde_json::Map<String, serde_json::Value>;

/// Header describing an [`ExportBundle`].
///
/// `table_count` and `row_count` must match the bundle's `tables` content;
/// [`validate_bundle`](crate::validate_bundle) enforces this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    /// When the export was taken.
    pub exported_at: DateTime<Utc>,
    /// Bundle format version. Missing versions decode as empty so that
    /// validation, not decoding, reports them.
    #[serde(default)]
    pub version: String,
    /// Serialized format name (always `json` for bundles).
    #[serde(default)]
    pub format: String,
    pub table_count: usize,
    pub row_count: usize,
}

/// Serializable snapshot of store contents.
///
/// # Examples
///
/// ```
/// use gogo_core::{ExportBundle, TableRow};
///
/// let mut bundle = ExportBundle::new(chrono::Utc::now());
/// let mut row = TableRow::new();
/// row.insert("key".into(), "theme".into());
/// bundle.insert_table("configs", vec![row]);
///
/// assert_eq!(bundle.metadata.table_count, 1);
/// assert_eq!(bundle.metadata.row_count, 1);
/// assert_eq!(bundle.metadata.version, "1.0");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub metadata: ExportMetadata,
    /// Rows per table, ordered by table name.
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<TableRow>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<TemplateRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blueprints: Vec<BlueprintRecord>,
}

impl ExportBundle {
    /// Creates an empty bundle stamped with `exported_at`.
    pub fn new(exported_at: DateTime<Utc>) -> Self {
        Self {
            metadata: ExportMetadata {
                exported_at,
                version: BUNDLE_FORMAT_VERSION.to_string(),
                format: "json".to_string(),
                table_count: 0,
                row_count: 0,
            },
            tables: BTreeMap::new(),
            templates: Vec::new(),
            blueprints: Vec::new(),
        }
    }

    /// Adds (or replaces) a table's rows and refreshes the metadata counts.
    pub fn insert_table(&mut self, name: impl Into<String>, rows: Vec<TableRow>) {
        self.tables.insert(name.into(), rows);
        self.metadata.table_count = self.table_count();
        self.metadata.row_count = self.row_count();
    }

    /// Number of tables actually present in the bundle.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Number of rows actually present across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}
