//! Base schema and migration ledger DDL.
//!
//! The base schema holds six tables:
//!
//! - `templates`: named template bodies with a kind and JSON metadata
//! - `blueprints`: stack presets with a JSON config
//! - `configs`: scoped key/value settings, unique per `(scope, key)`
//! - `hooks`: scripts bound to lifecycle events
//! - `plugins`: installed plugin descriptors
//! - `audits`: append-only record of actions
//!
//! Every statement uses `IF NOT EXISTS`, so creating the schema on an
//! existing store is a no-op.

/// Name of the migration ledger table.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// Tables created by [`BASE_SCHEMA_SQL`], in creation order.
pub const BASE_TABLES: [&str; 6] = [
    "templates",
    "blueprints",
    "configs",
    "hooks",
    "plugins",
    "audits",
];

pub(crate) const BASE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS templates (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    content BLOB NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS blueprints (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    stack TEXT NOT NULL,
    config_json TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS configs (
    id INTEGER PRIMARY KEY,
    scope TEXT NOT NULL DEFAULT 'global',
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(scope, key)
);

CREATE TABLE IF NOT EXISTS hooks (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    event TEXT NOT NULL,
    language TEXT NOT NULL DEFAULT 'shell',
    script TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS plugins (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    version TEXT NOT NULL,
    entrypoint TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS audits (
    id INTEGER PRIMARY KEY,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    entity TEXT NOT NULL,
    details_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_templates_kind ON templates(kind);
CREATE INDEX IF NOT EXISTS idx_blueprints_stack ON blueprints(stack);
CREATE INDEX IF NOT EXISTS idx_configs_scope_key ON configs(scope, key);
CREATE INDEX IF NOT EXISTS idx_hooks_event ON hooks(event);
CREATE INDEX IF NOT EXISTS idx_audits_action ON audits(action);
CREATE INDEX IF NOT EXISTS idx_audits_created_at ON audits(created_at);
"#;

pub(crate) const LEDGER_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    id TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    checksum TEXT NOT NULL
);
"#;

/// Quotes an identifier for interpolation into SQL, doubling embedded quotes.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Rewrites a catalog `CREATE TABLE` statement to `CREATE TABLE IF NOT EXISTS`.
///
/// Statements that already carry the clause, or that are not plain
/// `CREATE TABLE` statements, are returned unchanged.
pub(crate) fn with_if_not_exists(create_sql: &str) -> String {
    const PREFIX: &str = "CREATE TABLE ";
    let trimmed = create_sql.trim_start();
    let head = trimmed.get(..PREFIX.len()).unwrap_or_default();
    if !head.eq_ignore_ascii_case(PREFIX) {
        return create_sql.to_string();
    }
    let rest = trimmed[PREFIX.len()..].trim_start();
    let already = rest
        .get(..13)
        .is_some_and(|clause| clause.eq_ignore_ascii_case("IF NOT EXISTS"));
    if already {
        return create_sql.to_string();
    }
    format!("CREATE TABLE IF NOT EXISTS {rest}")
}
