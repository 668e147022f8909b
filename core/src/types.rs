//! Record and format types shared by the store and the CLI.
//!
//! These types describe the entities the gogo store persists (templates,
//! blueprints) in their denormalized export form, and the file formats
//! the export/import subsystem speaks. They carry no database dependency
//! so they can be serialized and validated anywhere.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// File format for database export and import.
///
/// # Examples
///
/// ```
/// use gogo_core::ExportFormat;
///
/// assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
/// assert_eq!(ExportFormat::from_path("dump.csv"), ExportFormat::Csv);
/// assert_eq!(ExportFormat::from_path("dump.bin"), ExportFormat::Sql);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Plain SQL statements (`CREATE TABLE` + `INSERT`), the default.
    #[default]
    Sql,
    /// Structured JSON bundle with metadata.
    Json,
    /// One comma-separated file per table.
    Csv,
}

impl ExportFormat {
    /// Returns the canonical lowercase name of the format.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    /// Infers the format from a file extension, falling back to SQL.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sql" => Ok(Self::Sql),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unsupported format '{other}' (expected sql, json or csv)")),
        }
    }
}

/// A project template as stored in the `templates` table.
///
/// `content` holds the raw template body; `metadata` is the parsed form of
/// the `metadata_json` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    /// Unique template name.
    pub name: String,
    /// Template kind (e.g. `cli`, `service`, `library`).
    pub kind: String,
    /// Human description, taken from `metadata.description` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Template body.
    pub content: String,
    /// Free-form metadata object.
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl TemplateRecord {
    /// Creates a template with empty metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// use gogo_core::TemplateRecord;
    ///
    /// let t = TemplateRecord::new("cli-basic", "cli", "package main");
    /// assert_eq!(t.kind, "cli");
    /// assert!(t.description.is_none());
    /// ```
    pub fn new(name: impl Into<String>, kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            description: None,
            content: content.into(),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            created_at: None,
            updated_at: None,
        }
    }
}

/// A stack preset as stored in the `blueprints` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintRecord {
    /// Unique blueprint name.
    pub name: String,
    /// Stack identifier (e.g. `chi-postgres`).
    pub stack: String,
    /// Human description, taken from `config.description` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parsed form of the `config_json` column.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl BlueprintRecord {
    pub fn new(name: impl Into<String>, stack: impl Into<String>, config: serde_json::Value) -> Self {
        let description = config
            .get("description")
            .and_then(|d| d.as_str())
            .map(String::from);
        Self {
            name: name.into(),
            stack: stack.into(),
            description,
            config,
            created_at: None,
            updated_at: None,
        }
    }
}

/// A scoped key/value configuration entry (`configs` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub scope: String,
    pub key: String,
    pub value: String,
}

/// An entry of the `audits` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub entity: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub created_at: Option<String>,
}
