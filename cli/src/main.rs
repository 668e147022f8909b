mod config;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use gogo_core::ExportFormat;
use gogo_store::{
    BackupManager, BackupOptions, CheckStatus, DatabaseStats, ExportManager, ExportOptions,
    HealthChecker, HealthReport, ImportOptions, MigrationEngine, MigrationStatus, RestoreOptions,
    Store, backup_info,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Output format for status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliOutputFormat {
    Text,
    Json,
    Yaml,
}

/// Machine-readable subset of [`CliOutputFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StructuredFormat {
    Json,
    Yaml,
}

impl CliOutputFormat {
    fn structured(self) -> Option<StructuredFormat> {
        match self {
            Self::Text => None,
            Self::Json => Some(StructuredFormat::Json),
            Self::Yaml => Some(StructuredFormat::Yaml),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "gogo")]
#[command(version)]
#[command(about = "Project scaffolding store management")]
struct Cli {
    /// Database file path (default: $HOME/.gogo.db).
    #[arg(long, global = true, value_name = "PATH")]
    db_path: Option<PathBuf>,
    /// Enable debug logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Database management commands.
    Db(DbArgs),
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    operation: DbOperation,
}

#[derive(Debug, Subcommand)]
enum DbOperation {
    /// Create or open the database and apply core migrations.
    Init,
    /// Apply pending migrations, show their status, or roll back.
    Migrate(MigrateArgs),
    /// Back up the database file.
    Backup(BackupArgs),
    /// Restore the database from a backup.
    Restore(RestoreArgs),
    /// Export database contents.
    Export(ExportArgs),
    /// Import a SQL or JSON export.
    Import(ImportArgs),
    /// Run health checks.
    Status(StatusArgs),
    /// Compact the database with VACUUM.
    Vacuum,
    /// Refresh query planner statistics with ANALYZE.
    Analyze,
    /// Run a full integrity check.
    Integrity,
    /// Show database size.
    Size(SizeArgs),
    /// Describe a backup file.
    Info(InfoArgs),
}

#[derive(Debug, Args)]
struct MigrateArgs {
    /// Show migration status instead of applying.
    #[arg(long, conflicts_with = "rollback")]
    status: bool,
    /// Roll back the most recently applied migrations.
    #[arg(long)]
    rollback: bool,
    /// Number of migrations to roll back.
    #[arg(long, default_value_t = 1, requires = "rollback")]
    count: usize,
    /// Output format for --status.
    #[arg(long, value_enum, default_value = "text")]
    output_format: CliOutputFormat,
}

#[derive(Debug, Args)]
struct BackupArgs {
    /// Backup file to write.
    #[arg(long, short)]
    output: PathBuf,
    /// Gzip-compress the backup.
    #[arg(long)]
    compress: bool,
    /// Verify the backup after writing it.
    #[arg(long)]
    verify: bool,
}

#[derive(Debug, Args)]
struct RestoreArgs {
    /// Backup file to restore from.
    #[arg(long = "from", value_name = "PATH")]
    from: Option<PathBuf>,
    /// Backup file to restore from.
    #[arg(value_name = "BACKUP", conflicts_with = "from")]
    path: Option<PathBuf>,
    /// Verify the restored database.
    #[arg(long)]
    verify: bool,
    /// Back up the current database before overwriting it.
    #[arg(long)]
    backup: bool,
    /// Overwrite an existing database.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Output file (CSV exports write a directory named after it).
    #[arg(long, short)]
    output: PathBuf,
    /// Export format (default: inferred from the output extension).
    #[arg(long)]
    format: Option<ExportFormat>,
    /// Comma-separated tables to export (default: all).
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,
    /// Export table definitions only.
    #[arg(long, conflicts_with = "data_only")]
    schema_only: bool,
    /// Export rows only.
    #[arg(long)]
    data_only: bool,
    /// Report what would be exported without writing.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// File to import.
    #[arg(long = "from", value_name = "PATH")]
    from: Option<PathBuf>,
    /// File to import.
    #[arg(value_name = "FILE", conflicts_with = "from")]
    path: Option<PathBuf>,
    /// Import format (default: inferred from the file extension).
    #[arg(long)]
    format: Option<ExportFormat>,
    /// Skip bundle validation.
    #[arg(long)]
    no_validate: bool,
    /// Report what would be imported without writing.
    #[arg(long)]
    dry_run: bool,
    /// Replace rows that collide on a unique key.
    #[arg(long)]
    replace: bool,
}

#[derive(Debug, Args)]
struct StatusArgs {
    /// Include database statistics.
    #[arg(long)]
    detailed: bool,
    #[arg(long, value_enum, default_value = "text")]
    output_format: CliOutputFormat,
}

#[derive(Debug, Args)]
struct SizeArgs {
    /// Show row counts per table.
    #[arg(long)]
    breakdown: bool,
}

#[derive(Debug, Args)]
struct InfoArgs {
    /// Backup file to inspect.
    path: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    let config = Config::from_flags(cli.db_path, cli.verbose);
    init_tracing(config.verbose);
    tracing::debug!(db_path = %config.db_path.display(), "resolved database path");

    let result = match cli.command {
        Command::Db(args) => run_db(&config, args.operation),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_db(config: &Config, operation: DbOperation) -> Result<(), String> {
    match operation {
        DbOperation::Init => run_init(config),
        DbOperation::Migrate(args) => run_migrate(config, args),
        DbOperation::Backup(args) => run_backup(config, args),
        DbOperation::Restore(args) => run_restore(config, args),
        DbOperation::Export(args) => run_export(config, args),
        DbOperation::Import(args) => run_import(config, args),
        DbOperation::Status(args) => run_status(config, args),
        DbOperation::Vacuum => run_vacuum(config),
        DbOperation::Analyze => run_analyze(config),
        DbOperation::Integrity => run_integrity(config),
        DbOperation::Size(args) => run_size(config, args),
        DbOperation::Info(args) => run_info(args),
    }
}

fn core_engine(store: &Store) -> MigrationEngine<'_> {
    let mut engine = MigrationEngine::new(store);
    engine.register_core_schemas();
    engine
}

fn run_init(config: &Config) -> Result<(), String> {
    let store = config.open_store()?;
    let applied = core_engine(&store)
        .apply_all()
        .map_err(|e| format!("Migration failed: {e}"))?;
    println!("Database initialized at {}", config.db_path.display());
    if !applied.is_empty() {
        println!("Applied {} migrations:", applied.len());
        for id in &applied {
            println!("  {id}");
        }
    }
    store.close().map_err(|e| e.to_string())
}

fn run_migrate(config: &Config, args: MigrateArgs) -> Result<(), String> {
    let store = config.open_store()?;
    let engine = core_engine(&store);

    if args.status {
        let status = engine
            .status()
            .map_err(|e| format!("Failed to get migration status: {e}"))?;
        print_migration_status(&status, args.output_format)?;
    } else if args.rollback {
        let rolled_back = engine
            .rollback_last_n(args.count)
            .map_err(|e| format!("Rollback failed: {e}"))?;
        if rolled_back.is_empty() {
            println!("No migrations to roll back");
        }
        for id in &rolled_back {
            println!("Rolled back {id}");
        }
    } else {
        let applied = engine
            .apply_all()
            .map_err(|e| format!("Migration failed: {e}"))?;
        if applied.is_empty() {
            println!("No pending migrations");
        } else {
            for id in &applied {
                println!("Applied {id}");
            }
            println!("Successfully applied {} migrations", applied.len());
        }
    }

    drop(engine);
    store.close().map_err(|e| e.to_string())
}

fn print_migration_status(status: &[MigrationStatus], format: CliOutputFormat) -> Result<(), String> {
    if let Some(structured) = format.structured() {
        return print_structured(&status, structured);
    }
    println!("Migration Status:");
    for entry in status {
        let state = if entry.applied { "applied" } else { "pending" };
        let drift = if entry.checksum_matches { "" } else { " (checksum changed)" };
        println!("  {:<28} {:<8} {}{drift}", entry.id, state, entry.description);
        if let Some(at) = &entry.applied_at {
            println!("  {:<28} applied at {at}", "");
        }
    }
    Ok(())
}

fn run_backup(config: &Config, args: BackupArgs) -> Result<(), String> {
    let report = BackupManager::new(&config.db_path)
        .backup(
            &BackupOptions::new(&args.output)
                .compress(args.compress)
                .verify(args.verify),
        )
        .map_err(|e| format!("Backup failed: {e}"))?;
    println!(
        "Backup created: {} ({}{})",
        report.path.display(),
        format_bytes(report.size),
        if report.compressed { ", compressed" } else { "" }
    );
    if report.verified {
        println!("Backup verified");
    }
    Ok(())
}

fn run_restore(config: &Config, args: RestoreArgs) -> Result<(), String> {
    let source = args
        .from
        .or(args.path)
        .ok_or_else(|| "a backup file is required (--from PATH or positional)".to_string())?;
    let report = BackupManager::new(&config.db_path)
        .restore(
            &RestoreOptions::new(&source)
                .verify(args.verify)
                .create_backup(args.backup)
                .force(args.force),
        )
        .map_err(|e| format!("Restore failed: {e}"))?;
    if let Some(safety) = &report.safety_backup {
        println!("Existing database saved to {}", safety.display());
    }
    println!(
        "Database restored from {} to {}",
        source.display(),
        report.destination.display()
    );
    Ok(())
}

fn run_export(config: &Config, args: ExportArgs) -> Result<(), String> {
    let store = config.open_store()?;
    let format = args
        .format
        .unwrap_or_else(|| ExportFormat::from_path(&args.output));
    let options = ExportOptions::new(&args.output, format)
        .tables(args.tables)
        .include_schema(!args.data_only)
        .include_data(!args.schema_only)
        .dry_run(args.dry_run);
    let report = ExportManager::new(&store)
        .export(&options)
        .map_err(|e| format!("Export failed: {e}"))?;

    let verb = if report.dry_run { "Would export" } else { "Exported" };
    println!(
        "{verb} {} tables ({} rows) as {} to {}",
        report.tables,
        report.rows,
        report.format,
        report.path.display()
    );
    store.close().map_err(|e| e.to_string())
}

fn run_import(config: &Config, args: ImportArgs) -> Result<(), String> {
    let input = args
        .from
        .or(args.path)
        .ok_or_else(|| "an input file is required (--from PATH or positional)".to_string())?;
    let format = args.format.unwrap_or_else(|| ExportFormat::from_path(&input));
    let store = config.open_store()?;
    let report = ExportManager::new(&store)
        .import(
            &ImportOptions::new(&input, format)
                .validate(!args.no_validate)
                .dry_run(args.dry_run)
                .replace_existing(args.replace),
        )
        .map_err(|e| format!("Import failed: {e}"))?;

    if !report.migrations.is_empty() {
        let verb = if report.dry_run { "Would apply" } else { "Applied" };
        println!(
            "{verb} {} migrations first: {}",
            report.migrations.len(),
            report.migrations.join(", ")
        );
    }
    if report.dry_run {
        println!(
            "Dry run: would import {} rows into {} tables ({} statements)",
            report.rows, report.tables, report.statements
        );
    } else {
        println!(
            "Imported {} rows into {} tables ({} statements)",
            report.rows, report.tables, report.statements
        );
    }
    store.close().map_err(|e| e.to_string())
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    health: &'a HealthReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a DatabaseStats>,
}

fn run_status(config: &Config, args: StatusArgs) -> Result<(), String> {
    let store = config.open_store()?;
    let checker = HealthChecker::new(&store);
    let report = checker.check();
    let stats = if args.detailed {
        Some(checker.stats().map_err(|e| format!("Failed to collect statistics: {e}"))?)
    } else {
        None
    };

    match args.output_format.structured() {
        Some(structured) => print_structured(
            &StatusOutput {
                health: &report,
                stats: stats.as_ref(),
            },
            structured,
        )?,
        None => {
            print_health(&report);
            if let Some(stats) = &stats {
                println!();
                print_stats(stats, true);
            }
        }
    }

    drop(checker);
    store.close().map_err(|e| e.to_string())?;
    if report.status == CheckStatus::Error {
        return Err("database health check reported errors".to_string());
    }
    Ok(())
}

fn print_health(report: &HealthReport) {
    println!("Database Health: {}", report.status);
    if let Some(path) = &report.database_path {
        println!("Path: {path}");
    }
    println!("Size: {}", format_bytes(report.database_size));
    println!();
    for check in &report.checks {
        println!("{:<22} {:<8} {}", format!("{}:", check.name), check.status, check.message);
    }
    if !report.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for rec in &report.recommendations {
            println!("  - {rec}");
        }
    }
}

fn print_stats(stats: &DatabaseStats, breakdown: bool) {
    println!("Total size:   {}", format_bytes(stats.total_size));
    println!("Pages:        {} x {} bytes", stats.page_count, stats.page_size);
    println!(
        "Free space:   {} ({} pages)",
        format_bytes(u64::try_from(stats.free_space).unwrap_or_default()),
        stats.free_pages
    );
    if stats.wal_size > 0 {
        println!("WAL size:     {}", format_bytes(stats.wal_size));
    }
    println!("Journal mode: {}", stats.journal_mode);
    println!("Cache size:   {}", stats.cache_size);
    println!("Temp store:   {}", stats.temp_store);
    if breakdown {
        println!();
        println!("{:<24} {:>10}", "Table", "Rows");
        for table in &stats.tables {
            println!("{:<24} {:>10}", table.name, table.row_count);
        }
    }
}

fn run_vacuum(config: &Config) -> Result<(), String> {
    let store = config.open_store()?;
    let report = HealthChecker::new(&store)
        .vacuum()
        .map_err(|e| format!("Vacuum failed: {e}"))?;
    println!(
        "Vacuum complete: {} -> {} ({} reclaimed) in {:?}",
        format_bytes(report.size_before),
        format_bytes(report.size_after),
        format_bytes(report.reclaimed()),
        Duration::from_micros(report.duration_micros)
    );
    store.close().map_err(|e| e.to_string())
}

fn run_analyze(config: &Config) -> Result<(), String> {
    let store = config.open_store()?;
    let elapsed = HealthChecker::new(&store)
        .analyze()
        .map_err(|e| format!("Analyze failed: {e}"))?;
    println!("Analyze complete in {elapsed:?}");
    store.close().map_err(|e| e.to_string())
}

fn run_integrity(config: &Config) -> Result<(), String> {
    let store = config.open_store()?;
    HealthChecker::new(&store)
        .integrity_check()
        .map_err(|e| e.to_string())?;
    println!("Database integrity: ok");
    store.close().map_err(|e| e.to_string())
}

fn run_size(config: &Config, args: SizeArgs) -> Result<(), String> {
    let store = config.open_store()?;
    let stats = HealthChecker::new(&store)
        .stats()
        .map_err(|e| format!("Failed to collect statistics: {e}"))?;
    print_stats(&stats, args.breakdown);
    store.close().map_err(|e| e.to_string())
}

fn run_info(args: InfoArgs) -> Result<(), String> {
    let info = backup_info(&args.path).map_err(|e| e.to_string())?;
    println!("{info}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn print_structured<T: Serialize + ?Sized>(value: &T, format: StructuredFormat) -> Result<(), String> {
    let text = match format {
        StructuredFormat::Json => serde_json::to_string_pretty(value)
            .map_err(|e| format!("JSON serialization failed: {e}"))?,
        StructuredFormat::Yaml => {
            serde_yaml::to_string(value).map_err(|e| format!("YAML serialization failed: {e}"))?
        }
    };
    println!("{}", text.trim_end());
    Ok(())
}

/// Formats a byte count with a binary unit suffix.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_text_is_unstructured() {
        assert_eq!(CliOutputFormat::Text.structured(), None);
        assert_eq!(CliOutputFormat::Json.structured(), Some(StructuredFormat::Json));
        assert_eq!(CliOutputFormat::Yaml.structured(), Some(StructuredFormat::Yaml));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_cli_parses_export_flags() {
        let cli = Cli::try_parse_from([
            "gogo", "--db-path", "/tmp/g.db", "db", "export", "--output", "out.json",
            "--tables", "templates,configs", "--schema-only",
        ])
        .unwrap();
        let Command::Db(DbArgs { operation: DbOperation::Export(args) }) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(args.tables, ["templates", "configs"]);
        assert!(args.schema_only);
        assert!(args.format.is_none());
    }

    #[test]
    fn test_schema_only_conflicts_with_data_only() {
        let result = Cli::try_parse_from([
            "gogo", "db", "export", "--output", "x.sql", "--schema-only", "--data-only",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_restore_accepts_positional_path() {
        let cli = Cli::try_parse_from(["gogo", "db", "restore", "snap.gz", "--force"]).unwrap();
        let Command::Db(DbArgs { operation: DbOperation::Restore(args) }) = cli.command else {
            panic!("expected restore");
        };
        assert_eq!(args.path, Some(PathBuf::from("snap.gz")));
        assert!(args.force);
    }

    #[test]
    fn test_count_requires_rollback() {
        assert!(Cli::try_parse_from(["gogo", "db", "migrate", "--count", "2"]).is_err());
        assert!(Cli::try_parse_from(["gogo", "db", "migrate", "--rollback", "--count", "2"]).is_ok());
    }
}
