//! Typed record access for the base tables.
//!
//! [`RecordQuery`] reads and writes templates, blueprints, scoped configs
//! and audit entries. Export builds its denormalized template/blueprint
//! views from the same loaders.
//!
//! # Example
//!
//! ```
//! use gogo_core::TemplateRecord;
//! use gogo_store::{RecordQuery, Store};
//!
//! let store = Store::open_in_memory().unwrap();
//! let query = RecordQuery::new(&store);
//!
//! query.upsert_template(&TemplateRecord::new("cli-basic", "cli", "package main")).unwrap();
//! let loaded = query.get_template("cli-basic").unwrap().unwrap();
//! assert_eq!(loaded.content, "package main");
//! ```

use gogo_core::{AuditEntry, BlueprintRecord, ConfigEntry, TemplateRecord};
use rusqlite::types::ValueRef;
use rusqlite::{OptionalExtension, Row, params};

use crate::error::{Result, StoreError};
use crate::handle::Store;

const TEMPLATE_COLUMNS: &str = "name, kind, content, metadata_json, created_at, updated_at";
const BLUEPRINT_COLUMNS: &str = "name, stack, config_json, created_at, updated_at";

/// Record-level access to a store.
pub struct RecordQuery<'a> {
    store: &'a Store,
}

impl<'a> RecordQuery<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Inserts a template or replaces the one with the same name.
    pub fn upsert_template(&self, template: &TemplateRecord) -> Result<()> {
        let metadata = serde_json::to_string(&template.metadata)?;
        self.store
            .connection()
            .execute(
                "INSERT INTO templates (name, kind, content, metadata_json) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                     kind = excluded.kind,
                     content = excluded.content,
                     metadata_json = excluded.metadata_json,
                     updated_at = CURRENT_TIMESTAMP",
                params![template.name, template.kind, template.content.as_bytes(), metadata],
            )
            .map_err(StoreError::storage(format!(
                "failed to save template {}",
                template.name
            )))?;
        Ok(())
    }

    /// Loads a template by name.
    pub fn get_template(&self, name: &str) -> Result<Option<TemplateRecord>> {
        self.store
            .connection()
            .query_row(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE name = ?1"),
                [name],
                template_from_row,
            )
            .optional()
            .map_err(StoreError::storage(format!("failed to load template {name}")))
    }

    /// Loads every template ordered by name.
    pub fn list_templates(&self) -> Result<Vec<TemplateRecord>> {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare(&format!("SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY name"))
            .map_err(StoreError::storage("failed to list templates"))?;
        let rows = stmt
            .query_map([], template_from_row)
            .map_err(StoreError::storage("failed to list templates"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::storage("failed to read template row"))
    }

    /// Deletes a template, returning whether it existed.
    pub fn delete_template(&self, name: &str) -> Result<bool> {
        let changed = self
            .store
            .connection()
            .execute("DELETE FROM templates WHERE name = ?1", [name])
            .map_err(StoreError::storage(format!("failed to delete template {name}")))?;
        Ok(changed > 0)
    }

    /// Inserts a blueprint or replaces the one with the same name.
    pub fn upsert_blueprint(&self, blueprint: &BlueprintRecord) -> Result<()> {
        let config = serde_json::to_string(&blueprint.config)?;
        self.store
            .connection()
            .execute(
                "INSERT INTO blueprints (name, stack, config_json) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                     stack = excluded.stack,
                     config_json = excluded.config_json,
                     updated_at = CURRENT_TIMESTAMP",
                params![blueprint.name, blueprint.stack, config],
            )
            .map_err(StoreError::storage(format!(
                "failed to save blueprint {}",
                blueprint.name
            )))?;
        Ok(())
    }

    pub fn get_blueprint(&self, name: &str) -> Result<Option<BlueprintRecord>> {
        self.store
            .connection()
            .query_row(
                &format!("SELECT {BLUEPRINT_COLUMNS} FROM blueprints WHERE name = ?1"),
                [name],
                blueprint_from_row,
            )
            .optional()
            .map_err(StoreError::storage(format!("failed to load blueprint {name}")))
    }

    pub fn list_blueprints(&self) -> Result<Vec<BlueprintRecord>> {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare(&format!("SELECT {BLUEPRINT_COLUMNS} FROM blueprints ORDER BY name"))
            .map_err(StoreError::storage("failed to list blueprints"))?;
        let rows = stmt
            .query_map([], blueprint_from_row)
            .map_err(StoreError::storage("failed to list blueprints"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::storage("failed to read blueprint row"))
    }

    pub fn delete_blueprint(&self, name: &str) -> Result<bool> {
        let changed = self
            .store
            .connection()
            .execute("DELETE FROM blueprints WHERE name = ?1", [name])
            .map_err(StoreError::storage(format!("failed to delete blueprint {name}")))?;
        Ok(changed > 0)
    }

    /// Sets a scoped config value, replacing any existing one.
    pub fn set_config(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        self.store
            .connection()
            .execute(
                "INSERT INTO configs (scope, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(scope, key) DO UPDATE SET value = excluded.value",
                params![scope, key, value],
            )
            .map_err(StoreError::storage(format!("failed to set config {scope}.{key}")))?;
        Ok(())
    }

    pub fn get_config(&self, scope: &str, key: &str) -> Result<Option<String>> {
        self.store
            .connection()
            .query_row(
                "SELECT value FROM configs WHERE scope = ?1 AND key = ?2",
                params![scope, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::storage(format!("failed to get config {scope}.{key}")))
    }

    /// Lists config entries, optionally restricted to one scope.
    pub fn list_configs(&self, scope: Option<&str>) -> Result<Vec<ConfigEntry>> {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare(
                "SELECT scope, key, value FROM configs
                 WHERE ?1 IS NULL OR scope = ?1
                 ORDER BY scope, key",
            )
            .map_err(StoreError::storage("failed to list configs"))?;
        let rows = stmt
            .query_map([scope], |row| {
                Ok(ConfigEntry {
                    scope: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                })
            })
            .map_err(StoreError::storage("failed to list configs"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::storage("failed to read config row"))
    }

    /// Appends an audit entry. `created_at` defaults to the current time.
    pub fn record_audit(&self, entry: &AuditEntry) -> Result<()> {
        let details = serde_json::to_string(&entry.details)?;
        self.store
            .connection()
            .execute(
                "INSERT INTO audits (actor, action, entity, details_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, COALESCE(?5, CURRENT_TIMESTAMP))",
                params![entry.actor, entry.action, entry.entity, details, entry.created_at],
            )
            .map_err(StoreError::storage(format!(
                "failed to record audit {} on {}",
                entry.action, entry.entity
            )))?;
        Ok(())
    }

    /// Most recent audit entries first, at most `limit`.
    pub fn recent_audits(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.store.connection();
        let mut stmt = conn
            .prepare(
                "SELECT actor, action, entity, details_json, created_at FROM audits
                 ORDER BY created_at DESC, id DESC LIMIT ?1",
            )
            .map_err(StoreError::storage("failed to list audits"))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map([limit], |row| {
                let details: String = row.get(3)?;
                Ok(AuditEntry {
                    actor: row.get(0)?,
                    action: row.get(1)?,
                    entity: row.get(2)?,
                    details: parse_json_column(&details),
                    created_at: row.get(4)?,
                })
            })
            .map_err(StoreError::storage("failed to list audits"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::storage("failed to read audit row"))
    }
}

/// Parses a JSON text column; malformed text is kept as a JSON string.
fn parse_json_column(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn description_of(value: &serde_json::Value) -> Option<String> {
    value
        .get("description")
        .and_then(|d| d.as_str())
        .map(String::from)
}

fn template_from_row(row: &Row<'_>) -> rusqlite::Result<TemplateRecord> {
    // Content is written as a blob but imported rows may carry text.
    let content = match row.get_ref(2)? {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
    };
    let metadata_raw: String = row.get(3)?;
    let metadata = parse_json_column(&metadata_raw);
    Ok(TemplateRecord {
        name: row.get(0)?,
        kind: row.get(1)?,
        description: description_of(&metadata),
        content,
        metadata,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn blueprint_from_row(row: &Row<'_>) -> rusqlite::Result<BlueprintRecord> {
    let config_raw: String = row.get(2)?;
    let config = parse_json_column(&config_raw);
    Ok(BlueprintRecord {
        name: row.get(0)?,
        stack: row.get(1)?,
        description: description_of(&config),
        config,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_upsert_replaces_by_name() {
        let store = Store::open_in_memory().unwrap();
        let query = RecordQuery::new(&store);

        let mut template = TemplateRecord::new("svc", "service", "v1");
        query.upsert_template(&template).unwrap();
        template.content = "v2".into();
        template.metadata = json!({"description": "HTTP service"});
        query.upsert_template(&template).unwrap();

        let all = query.list_templates().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "v2");
        assert_eq!(all[0].description.as_deref(), Some("HTTP service"));
        assert!(all[0].created_at.is_some());
    }

    #[test]
    fn test_missing_records_are_none() {
        let store = Store::open_in_memory().unwrap();
        let query = RecordQuery::new(&store);
        assert!(query.get_template("nope").unwrap().is_none());
        assert!(query.get_blueprint("nope").unwrap().is_none());
        assert!(!query.delete_template("nope").unwrap());
    }

    #[test]
    fn test_blueprint_roundtrip_and_delete() {
        let store = Store::open_in_memory().unwrap();
        let query = RecordQuery::new(&store);
        let bp = BlueprintRecord::new("api", "chi-postgres", json!({"description": "API", "port": 8080}));
        query.upsert_blueprint(&bp).unwrap();

        let loaded = query.get_blueprint("api").unwrap().unwrap();
        assert_eq!(loaded.stack, "chi-postgres");
        assert_eq!(loaded.config["port"], 8080);
        assert_eq!(loaded.description.as_deref(), Some("API"));

        assert!(query.delete_blueprint("api").unwrap());
        assert!(query.list_blueprints().unwrap().is_empty());
    }

    #[test]
    fn test_configs_are_scoped() {
        let store = Store::open_in_memory().unwrap();
        let query = RecordQuery::new(&store);
        query.set_config("global", "author", "ada").unwrap();
        query.set_config("project", "author", "grace").unwrap();
        query.set_config("global", "author", "linus").unwrap();

        assert_eq!(query.get_config("global", "author").unwrap().as_deref(), Some("linus"));
        assert_eq!(query.list_configs(None).unwrap().len(), 2);
        let project = query.list_configs(Some("project")).unwrap();
        assert_eq!(project, vec![ConfigEntry {
            scope: "project".into(),
            key: "author".into(),
            value: "grace".into(),
        }]);
    }

    #[test]
    fn test_audit_entries_newest_first() {
        let store = Store::open_in_memory().unwrap();
        let query = RecordQuery::new(&store);
        for (action, at) in [("create", "2024-01-01 00:00:00"), ("delete", "2024-02-01 00:00:00")] {
            query
                .record_audit(&AuditEntry {
                    actor: "cli".into(),
                    action: action.into(),
                    entity: "template:svc".into(),
                    details: json!({}),
                    created_at: Some(at.into()),
                })
                .unwrap();
        }
        let audits = query.recent_audits(1).unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].action, "delete");
    }
}
