//! Integration tests for the gogo-store crate.

use std::fs;
use std::path::Path;

use gogo_core::{BlueprintRecord, ExportFormat, TemplateRecord};
use gogo_store::{
    BackupManager, BackupOptions, CheckStatus, ExportManager, ExportOptions, HealthChecker,
    ImportOptions, Migration, MigrationEngine, RecordQuery, RestoreOptions, Store, StoreError,
    backup_info,
};
use serde_json::json;
use tempfile::TempDir;

fn table_exists(store: &Store, name: &str) -> bool {
    store
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |r| r.get::<_, i64>(0),
        )
        .unwrap()
        == 1
}

fn count_rows(store: &Store, table: &str) -> i64 {
    store
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |r| r.get(0))
        .unwrap()
}

fn ledger_rows(store: &Store) -> i64 {
    count_rows(store, "schema_migrations")
}

/// Store with templates, blueprints, configs and hooks populated.
fn seed(store: &Store) {
    let query = RecordQuery::new(store);
    let mut template = TemplateRecord::new("cli-basic", "cli", "package main\n\nfunc main() {}\n");
    template.metadata = json!({"description": "Minimal CLI", "tags": ["go", "cli"]});
    query.upsert_template(&template).unwrap();
    query
        .upsert_template(&TemplateRecord::new("svc", "service", "it's a 'quoted'; body"))
        .unwrap();
    query
        .upsert_blueprint(&BlueprintRecord::new(
            "api",
            "chi-postgres",
            json!({"description": "HTTP API", "port": 8080}),
        ))
        .unwrap();
    query.set_config("global", "author", "Ada").unwrap();
    query.set_config("project", "license", "MIT").unwrap();
    store
        .connection()
        .execute(
            "INSERT INTO hooks (name, event, script, enabled) VALUES ('fmt', 'post_generate', 'gofmt -w .', 0)",
            [],
        )
        .unwrap();
}

fn table_snapshot(store: &Store, table: &str) -> Vec<String> {
    let mut stmt = store
        .connection()
        .prepare(&format!("SELECT * FROM \"{table}\" ORDER BY rowid"))
        .unwrap();
    let columns = stmt.column_count();
    stmt.query_map([], |row| {
        let mut parts = Vec::with_capacity(columns);
        for i in 0..columns {
            parts.push(format!("{:?}", row.get::<_, rusqlite::types::Value>(i)?));
        }
        Ok(parts.join("|"))
    })
    .unwrap()
    .collect::<Result<_, _>>()
    .unwrap()
}

// ============================================================================
// Migration engine
// ============================================================================

#[test]
fn test_pending_after_partial_apply() {
    let store = Store::open_in_memory().unwrap();
    let mut engine = MigrationEngine::new(&store);
    for i in [5, 1, 4, 2, 3] {
        engine.register(Migration::new(
            format!("00{i}_step"),
            format!("step {i}"),
            format!("CREATE TABLE t{i} (id INTEGER);"),
            format!("DROP TABLE t{i};"),
        ));
    }
    let first = engine.get("001_step").unwrap().clone();
    let third = engine.get("003_step").unwrap().clone();
    engine.apply_one(&first).unwrap();
    engine.apply_one(&third).unwrap();

    let pending: Vec<_> = engine.pending().unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(pending, ["002_step", "004_step", "005_step"]);
}

#[test]
fn test_apply_all_twice_writes_nothing_second_time() {
    let store = Store::open_in_memory().unwrap();
    let mut engine = MigrationEngine::new(&store);
    engine.register_core_schemas();

    assert_eq!(engine.apply_all().unwrap().len(), 4);
    let ledger_before = engine.applied().unwrap();
    assert!(engine.apply_all().unwrap().is_empty());
    assert!(engine.pending().unwrap().is_empty());
    assert_eq!(engine.applied().unwrap(), ledger_before);
}

#[test]
fn test_apply_then_rollback_restores_ledger_and_schema() {
    let store = Store::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&store);
    let migration = Migration::new(
        "010_widgets",
        "Create widgets",
        "CREATE TABLE widgets (id INTEGER PRIMARY KEY, label TEXT);",
        "DROP TABLE widgets;",
    );

    engine.apply_one(&migration).unwrap();
    assert!(table_exists(&store, "widgets"));
    assert!(engine.applied().unwrap().contains_key("010_widgets"));

    engine.rollback_one(&migration).unwrap();
    assert!(!table_exists(&store, "widgets"));
    assert!(engine.applied().unwrap().is_empty());
}

#[test]
fn test_empty_up_body_fails_without_ledger_row() {
    let store = Store::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&store);
    let err = engine
        .apply_one(&Migration::new("001_empty", "empty", "", "DROP TABLE x;"))
        .unwrap_err();
    assert!(matches!(err, StoreError::Config(_)));
    assert_eq!(ledger_rows(&store), 0);
}

#[test]
fn test_users_posts_scenario() {
    let store = Store::open_in_memory().unwrap();
    let mut engine = MigrationEngine::new(&store);
    engine.register(Migration::new(
        "002_posts",
        "Create posts",
        "CREATE TABLE posts (
             id INTEGER PRIMARY KEY,
             user_id INTEGER NOT NULL REFERENCES users(id),
             title TEXT NOT NULL
         );",
        "DROP TABLE posts;",
    ));
    engine.register(Migration::new(
        "001_users",
        "Create users",
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
        "DROP TABLE users;",
    ));

    assert_eq!(engine.apply_all().unwrap(), ["001_users", "002_posts"]);
    assert!(table_exists(&store, "users"));
    assert!(table_exists(&store, "posts"));
    assert_eq!(ledger_rows(&store), 2);

    assert_eq!(engine.rollback_last().unwrap().as_deref(), Some("002_posts"));
    assert!(!table_exists(&store, "posts"));
    assert!(table_exists(&store, "users"));
    assert_eq!(ledger_rows(&store), 1);
}

#[test]
fn test_status_reflects_ledger_across_engines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gogo.db");
    {
        let store = Store::open(&path).unwrap();
        let mut engine = MigrationEngine::new(&store);
        engine.register_core_schemas();
        engine.apply_all().unwrap();
        drop(engine);
        store.close().unwrap();
    }

    let store = Store::open(&path).unwrap();
    let mut engine = MigrationEngine::new(&store);
    engine.register_core_schemas();
    let status = engine.status().unwrap();
    assert_eq!(status.len(), 4);
    assert!(status.iter().all(|s| s.applied && s.checksum_matches));
    assert!(!status[3].reversible);
}

#[test]
fn test_rollback_last_follows_apply_order_not_id_order() {
    let store = Store::open_in_memory().unwrap();
    let mut engine = MigrationEngine::new(&store);
    engine.register(Migration::new(
        "001_users",
        "users",
        "CREATE TABLE users (id INTEGER PRIMARY KEY);",
        "DROP TABLE users;",
    ));
    engine.register(Migration::new(
        "002_tags",
        "tags",
        "CREATE TABLE tags (id INTEGER PRIMARY KEY);",
        "DROP TABLE tags;",
    ));

    let users = engine.get("001_users").unwrap().clone();
    let tags = engine.get("002_tags").unwrap().clone();
    engine.apply_one(&tags).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    engine.apply_one(&users).unwrap();

    assert_eq!(engine.rollback_last().unwrap().as_deref(), Some("001_users"));
    assert!(!table_exists(&store, "users"));
    assert!(table_exists(&store, "tags"));
    assert_eq!(engine.rollback_last().unwrap().as_deref(), Some("002_tags"));
    assert_eq!(ledger_rows(&store), 0);
}

#[test]
fn test_core_metadata_rollback_fails_clearly() {
    let store = Store::open_in_memory().unwrap();
    let mut engine = MigrationEngine::new(&store);
    engine.register_core_schemas();
    engine.apply_all().unwrap();

    let err = engine.rollback_last_n(2).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("004_add_metadata_columns"));
    assert!(message.contains("cannot be rolled back"));
    assert_eq!(ledger_rows(&store), 4);
}

// ============================================================================
// Export / import
// ============================================================================

#[test]
fn test_sql_export_import_round_trip_row_counts() {
    let dir = TempDir::new().unwrap();
    let source = Store::open(dir.path().join("source.db")).unwrap();
    seed(&source);
    let mut engine = MigrationEngine::new(&source);
    engine.register_core_schemas();
    engine.apply_all().unwrap();

    let dump = dir.path().join("dump.sql");
    let exported = ExportManager::new(&source)
        .export(&ExportOptions::new(&dump, ExportFormat::Sql))
        .unwrap();

    let target = Store::open(dir.path().join("target.db")).unwrap();
    let imported = ExportManager::new(&target)
        .import(&ImportOptions::new(&dump, ExportFormat::Sql))
        .unwrap();
    assert_eq!(imported.rows, exported.rows);
    assert_eq!(imported.migrations.len(), 4);

    for table in ExportManager::new(&source).table_names().unwrap() {
        assert_eq!(
            count_rows(&source, &table),
            count_rows(&target, &table),
            "row count mismatch in {table}"
        );
    }
    assert_eq!(table_snapshot(&source, "templates"), table_snapshot(&target, "templates"));
}

#[test]
fn test_json_export_import_round_trip() {
    let dir = TempDir::new().unwrap();
    let source = Store::open_in_memory().unwrap();
    seed(&source);
    let mut engine = MigrationEngine::new(&source);
    engine.register_core_schemas();
    engine.apply_all().unwrap();
    drop(engine);

    let dump = dir.path().join("dump.json");
    ExportManager::new(&source)
        .export(&ExportOptions::new(&dump, ExportFormat::Json))
        .unwrap();

    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&dump).unwrap()).unwrap();
    assert_eq!(raw["metadata"]["version"], "1.0");
    assert_eq!(raw["templates"][0]["description"], "Minimal CLI");
    assert_eq!(raw["blueprints"][0]["stack"], "chi-postgres");

    let target = Store::open_in_memory().unwrap();
    let report = ExportManager::new(&target)
        .import(&ImportOptions::new(&dump, ExportFormat::Json))
        .unwrap();
    assert_eq!(report.rows, 6);

    let query = RecordQuery::new(&target);
    let template = query.get_template("cli-basic").unwrap().unwrap();
    assert_eq!(template.content, "package main\n\nfunc main() {}\n");
    assert_eq!(template.metadata["tags"][1], "cli");
    assert_eq!(table_snapshot(&source, "hooks"), table_snapshot(&target, "hooks"));
}

#[test]
fn test_dry_run_import_performs_no_writes() {
    let dir = TempDir::new().unwrap();
    let source = Store::open_in_memory().unwrap();
    seed(&source);
    let sql = dir.path().join("dump.sql");
    let json = dir.path().join("dump.json");
    let exporter = ExportManager::new(&source);
    exporter.export(&ExportOptions::new(&sql, ExportFormat::Sql)).unwrap();
    exporter.export(&ExportOptions::new(&json, ExportFormat::Json)).unwrap();

    let target = Store::open_in_memory().unwrap();
    let before: Vec<_> = ["templates", "blueprints", "configs", "hooks"]
        .iter()
        .map(|t| count_rows(&target, t))
        .collect();

    let importer = ExportManager::new(&target);
    let sql_report = importer
        .import(&ImportOptions::new(&sql, ExportFormat::Sql).dry_run(true))
        .unwrap();
    let json_report = importer
        .import(&ImportOptions::new(&json, ExportFormat::Json).dry_run(true))
        .unwrap();
    assert!(sql_report.dry_run);
    assert_eq!(sql_report.rows, 6);
    assert_eq!(json_report.rows, 6);

    let after: Vec<_> = ["templates", "blueprints", "configs", "hooks"]
        .iter()
        .map(|t| count_rows(&target, t))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_import_from_migrated_store_into_opened_store() {
    let dir = TempDir::new().unwrap();
    let source = Store::open(dir.path().join("source.db")).unwrap();
    seed(&source);
    let mut engine = MigrationEngine::new(&source);
    engine.register_core_schemas();
    engine.apply_all().unwrap();
    drop(engine);
    source
        .connection()
        .execute(
            "INSERT INTO audit_log (table_name, record_id, action) VALUES ('templates', '1', 'create')",
            [],
        )
        .unwrap();

    let exporter = ExportManager::new(&source);
    for format in [ExportFormat::Sql, ExportFormat::Json] {
        let dump = dir.path().join(format!("dump.{format}"));
        exporter.export(&ExportOptions::new(&dump, format)).unwrap();

        let target = Store::open(dir.path().join(format!("target-{format}.db"))).unwrap();
        let preview = ExportManager::new(&target)
            .import(&ImportOptions::new(&dump, format).dry_run(true))
            .unwrap();
        assert_eq!(preview.migrations.len(), 4, "{format}");
        assert!(!table_exists(&target, "audit_log"));

        let report = ExportManager::new(&target)
            .import(&ImportOptions::new(&dump, format))
            .unwrap();
        assert_eq!(report.migrations.len(), 4, "{format}");
        for table in exporter.table_names().unwrap() {
            assert_eq!(
                count_rows(&source, &table),
                count_rows(&target, &table),
                "{format}: row count mismatch in {table}"
            );
        }
        assert_eq!(
            table_snapshot(&source, "blueprints"),
            table_snapshot(&target, "blueprints"),
            "{format}"
        );
    }
}

#[test]
fn test_import_without_migrations_keeps_schema() {
    let dir = TempDir::new().unwrap();
    let source = Store::open_in_memory().unwrap();
    seed(&source);
    let dump = dir.path().join("dump.sql");
    ExportManager::new(&source)
        .export(&ExportOptions::new(&dump, ExportFormat::Sql))
        .unwrap();

    let target = Store::open_in_memory().unwrap();
    let report = ExportManager::new(&target)
        .import(&ImportOptions::new(&dump, ExportFormat::Sql).apply_migrations(false))
        .unwrap();
    assert!(report.migrations.is_empty());
    assert!(!table_exists(&target, "audit_log"));
    assert_eq!(count_rows(&target, "templates"), 2);
}

#[test]
fn test_export_onto_store_file_is_conflict() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("gogo.db");
    let store = Store::open(&db).unwrap();
    seed(&store);

    for format in [ExportFormat::Sql, ExportFormat::Json] {
        let err = ExportManager::new(&store)
            .export(&ExportOptions::new(&db, format))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{format}");
    }
    assert_eq!(count_rows(&store, "configs"), 2);
    drop(store);

    let reopened = Store::open(&db).unwrap();
    assert_eq!(count_rows(&reopened, "templates"), 2);
    HealthChecker::new(&reopened).integrity_check().unwrap();
}

#[test]
fn test_json_import_into_missing_table_is_not_found() {
    let dir = TempDir::new().unwrap();
    let source = Store::open_in_memory().unwrap();
    source
        .connection()
        .execute_batch("CREATE TABLE extras (id INTEGER PRIMARY KEY, note TEXT); INSERT INTO extras (note) VALUES ('x');")
        .unwrap();
    let dump = dir.path().join("extras.json");
    ExportManager::new(&source)
        .export(&ExportOptions::new(&dump, ExportFormat::Json).tables(["extras"]))
        .unwrap();

    let target = Store::open_in_memory().unwrap();
    let err = ExportManager::new(&target)
        .import(&ImportOptions::new(&dump, ExportFormat::Json))
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn test_tampered_bundle_counts_fail_validation() {
    let dir = TempDir::new().unwrap();
    let source = Store::open_in_memory().unwrap();
    seed(&source);
    let dump = dir.path().join("dump.json");
    ExportManager::new(&source)
        .export(&ExportOptions::new(&dump, ExportFormat::Json))
        .unwrap();

    let mut raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&dump).unwrap()).unwrap();
    raw["metadata"]["row_count"] = json!(99);
    fs::write(&dump, serde_json::to_string(&raw).unwrap()).unwrap();

    let target = Store::open_in_memory().unwrap();
    let err = ExportManager::new(&target)
        .import(&ImportOptions::new(&dump, ExportFormat::Json))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(ref msg) if msg.contains("99")));
}

#[test]
fn test_import_missing_file_is_not_found() {
    let store = Store::open_in_memory().unwrap();
    let err = ExportManager::new(&store)
        .import(&ImportOptions::new("/definitely/not/here.sql", ExportFormat::Sql))
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

// ============================================================================
// Backup / restore
// ============================================================================

fn file_store_with_data(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("gogo.db");
    let store = Store::open(&path).unwrap();
    seed(&store);
    store.close().unwrap();
    path
}

#[test]
fn test_compressed_backup_restore_round_trip() {
    let dir = TempDir::new().unwrap();
    let db = file_store_with_data(dir.path());
    let expected = {
        let store = Store::open(&db).unwrap();
        let snapshot: Vec<_> = ["templates", "blueprints", "configs", "hooks"]
            .iter()
            .map(|t| table_snapshot(&store, t))
            .collect();
        store.close().unwrap();
        snapshot
    };

    let manager = BackupManager::new(&db);
    let artifact = dir.path().join("backups/gogo.db.gz");
    let report = manager
        .backup(&BackupOptions::new(&artifact).compress(true).verify(true))
        .unwrap();
    assert!(report.size > 0);

    {
        let store = Store::open(&db).unwrap();
        store.connection().execute("DELETE FROM templates", []).unwrap();
        store.connection().execute("DELETE FROM configs", []).unwrap();
        store.close().unwrap();
    }

    manager
        .restore(&RestoreOptions::new(&artifact).force(true).verify(true))
        .unwrap();

    let store = Store::open(&db).unwrap();
    let actual: Vec<_> = ["templates", "blueprints", "configs", "hooks"]
        .iter()
        .map(|t| table_snapshot(&store, t))
        .collect();
    assert_eq!(actual, expected);
}

#[test]
fn test_restore_requires_force_for_existing_store() {
    let dir = TempDir::new().unwrap();
    let db = file_store_with_data(dir.path());
    let manager = BackupManager::new(&db);
    let artifact = dir.path().join("raw.bak");
    manager.backup(&BackupOptions::new(&artifact)).unwrap();

    let err = manager.restore(&RestoreOptions::new(&artifact)).unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert!(err.to_string().contains("--force"));

    let report = manager
        .restore(&RestoreOptions::new(&artifact).force(true))
        .unwrap();
    assert!(!report.compressed);
    assert!(report.safety_backup.is_none());
}

#[test]
fn test_restore_into_new_location() {
    let dir = TempDir::new().unwrap();
    let db = file_store_with_data(dir.path());
    let artifact = dir.path().join("snap.gz");
    BackupManager::new(&db)
        .backup(&BackupOptions::new(&artifact).compress(true))
        .unwrap();

    let fresh = dir.path().join("elsewhere/nested/restored.db");
    BackupManager::new(&fresh)
        .restore(&RestoreOptions::new(&artifact).verify(true))
        .unwrap();

    let store = Store::open(&fresh).unwrap();
    assert_eq!(count_rows(&store, "templates"), 2);
}

#[test]
fn test_restore_missing_backup_is_not_found() {
    let dir = TempDir::new().unwrap();
    let err = BackupManager::new(dir.path().join("gogo.db"))
        .restore(&RestoreOptions::new(dir.path().join("nope.gz")))
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn test_backup_info_detects_magic_bytes_not_extension() {
    let dir = TempDir::new().unwrap();
    let gz_named_raw = dir.path().join("looks.gz");
    fs::write(&gz_named_raw, b"SQLite format 3\0").unwrap();
    let raw_named_gz = dir.path().join("looks.db");
    fs::write(&raw_named_gz, [0x1f, 0x8b, 0x08, 0x00]).unwrap();

    assert!(!backup_info(&gz_named_raw).unwrap().is_compressed);
    let info = backup_info(&raw_named_gz).unwrap();
    assert!(info.is_compressed);
    assert_eq!(info.size, 4);
    assert!(info.to_string().contains("Compressed"));
}

// ============================================================================
// Health
// ============================================================================

#[test]
fn test_health_on_fresh_file_store() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("fresh.db")).unwrap();
    let report = HealthChecker::new(&store).check();

    assert_eq!(report.status, CheckStatus::Ok);
    assert_eq!(report.check("Journal Mode").unwrap().value.as_deref(), Some("wal"));
    assert_eq!(report.check("Database Integrity").unwrap().value.as_deref(), Some("ok"));
    assert!(report.wal_mode);
    assert!(report.recommendations.is_empty());
}

#[test]
fn test_stats_on_file_store() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("stats.db")).unwrap();
    seed(&store);
    let stats = HealthChecker::new(&store).stats().unwrap();
    assert_eq!(stats.journal_mode, "wal");
    assert!(stats.page_count > 0);
    let templates = stats.tables.iter().find(|t| t.name == "templates").unwrap();
    assert_eq!(templates.row_count, 2);
}
