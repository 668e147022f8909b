//! Shared types for the gogo project store.
//!
//! This crate defines the database-independent pieces of the store:
//!
//! - [`ExportBundle`]: the self-describing structured export snapshot
//!   with its [`ExportMetadata`] header and generic [`TableRow`]s.
//! - [`ExportFormat`]: the export/import file formats.
//! - [`TemplateRecord`], [`BlueprintRecord`], [`ConfigEntry`],
//!   [`AuditEntry`]: typed views of the persisted entities.
//!
//! Validation ([`validate_bundle`], [`validate_identifier`],
//! [`validate_migration_id`]) rejects malformed bundles and unsafe
//! identifiers before they reach SQL.
//!
//! # Example
//!
//! ```
//! use gogo_core::*;
//!
//! let mut bundle = ExportBundle::new(chrono::Utc::now());
//! let mut row = TableRow::new();
//! row.insert("name".into(), "cli-basic".into());
//! bundle.insert_table("templates", vec![row]);
//!
//! assert!(validate_bundle(&bundle).is_empty());
//! assert_eq!(ExportFormat::from_path("dump.json"), ExportFormat::Json);
//! ```

mod bundle;
mod types;
mod validate;

pub use bundle::{BUNDLE_FORMAT_VERSION, ExportBundle, ExportMetadata, TableRow};
pub use types::*;
pub use validate::{
    ValidationError, follows_migration_convention, validate_bundle, validate_identifier,
    validate_migration_id,
};
