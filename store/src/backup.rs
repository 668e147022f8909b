//! Backup and restore of the store's backing file.
//!
//! Backups are byte copies of the database file, optionally gzip
//! compressed. Compressed artifacts are recognised by the gzip magic
//! bytes, never by file extension.
//!
//! # Example
//!
//! ```no_run
//! use gogo_store::{BackupManager, BackupOptions, RestoreOptions};
//!
//! let manager = BackupManager::new("/home/me/.gogo.db");
//! let report = manager
//!     .backup(&BackupOptions::new("/backups/gogo.db.gz").compress(true).verify(true))
//!     .unwrap();
//! println!("wrote {} bytes", report.size);
//!
//! manager
//!     .restore(&RestoreOptions::new("/backups/gogo.db.gz").force(true))
//!     .unwrap();
//! ```

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Local, Utc};
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::staged::{StagedFile, create_parent_dir, is_store_file, with_suffix};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Options for [`BackupManager::backup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOptions {
    pub output: PathBuf,
    pub compress: bool,
    pub verify: bool,
}

impl BackupOptions {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            compress: false,
            verify: false,
        }
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

/// Options for [`BackupManager::restore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOptions {
    pub backup_path: PathBuf,
    pub verify: bool,
    /// Take a raw safety copy of the existing store before overwriting it.
    pub create_backup: bool,
    /// Allow overwriting an existing store.
    pub force: bool,
}

impl RestoreOptions {
    pub fn new(backup_path: impl Into<PathBuf>) -> Self {
        Self {
            backup_path: backup_path.into(),
            verify: false,
            create_backup: false,
            force: false,
        }
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn create_backup(mut self, create_backup: bool) -> Self {
        self.create_backup = create_backup;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Outcome of a successful backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    pub path: PathBuf,
    pub size: u64,
    pub compressed: bool,
    pub verified: bool,
}

/// Outcome of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub destination: PathBuf,
    pub compressed: bool,
    pub safety_backup: Option<PathBuf>,
    pub verified: bool,
}

/// Read-only description of a backup artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Local>,
    pub is_compressed: bool,
}

impl fmt::Display for BackupInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_compressed { "Compressed" } else { "Raw" };
        write!(
            f,
            "{} ({:.2} MB, {kind}, {})",
            self.path.display(),
            self.size as f64 / (1024.0 * 1024.0),
            self.modified.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}

/// Describes a backup artifact without modifying it.
pub fn backup_info(path: impl AsRef<Path>) -> Result<BackupInfo> {
    let path = path.as_ref();
    let metadata = fs::metadata(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => StoreError::missing_file("backup file", path),
        _ => StoreError::Io {
            context: format!("failed to stat {}", path.display()),
            source: err,
        },
    })?;
    let modified = metadata
        .modified()
        .map_err(StoreError::io(format!("failed to read mtime of {}", path.display())))?;
    Ok(BackupInfo {
        path: path.to_path_buf(),
        size: metadata.len(),
        modified: DateTime::<Local>::from(modified),
        is_compressed: is_gzip(path)?,
    })
}

/// Returns `true` when the file starts with the gzip magic bytes.
pub fn is_gzip(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    let mut file =
        File::open(path).map_err(StoreError::io(format!("failed to open {}", path.display())))?;
    let mut magic = [0u8; 2];
    let mut filled = 0;
    while filled < magic.len() {
        let n = file
            .read(&mut magic[filled..])
            .map_err(StoreError::io(format!("failed to read {}", path.display())))?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(magic == GZIP_MAGIC)
}

/// Copies a store's backing file to and from backup artifacts.
pub struct BackupManager {
    db_path: PathBuf,
}

impl BackupManager {
    /// Creates a manager for the store at `db_path`.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Writes a backup of the store.
    ///
    /// The store's WAL is checkpointed first on a best-effort basis. With
    /// `verify`, a failed check returns [`StoreError::Integrity`] and the
    /// artifact is left in place for inspection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the store file does not exist.
    pub fn backup(&self, options: &BackupOptions) -> Result<BackupReport> {
        if !self.db_path.exists() {
            return Err(StoreError::missing_file("database file", &self.db_path));
        }
        if is_store_file(&options.output, &self.db_path) {
            return Err(StoreError::Conflict(format!(
                "backup output {} is the database file itself",
                options.output.display()
            )));
        }
        self.checkpoint();

        if options.compress {
            self.write_compressed(&options.output)?;
        } else {
            self.write_raw(&options.output)?;
        }

        if options.verify {
            verify_artifact(&options.output, options.compress)?;
        }

        let size = fs::metadata(&options.output)
            .map_err(StoreError::io(format!(
                "failed to stat {}",
                options.output.display()
            )))?
            .len();
        info!(
            path = %options.output.display(),
            size,
            compressed = options.compress,
            "backup written"
        );
        Ok(BackupReport {
            path: options.output.clone(),
            size,
            compressed: options.compress,
            verified: options.verify,
        })
    }

    /// Replaces the store with the contents of a backup artifact.
    ///
    /// The artifact is decoded into a sibling temporary file which is then
    /// renamed over the store, so a failed decode leaves the store intact.
    /// Stale `-wal`/`-shm` files of the destination are removed first.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] when the artifact does not exist.
    /// - [`StoreError::Conflict`] when the store exists and `force` is off.
    /// - [`StoreError::Integrity`] when `verify` is on and the restored
    ///   store fails its integrity check.
    pub fn restore(&self, options: &RestoreOptions) -> Result<RestoreReport> {
        let source = &options.backup_path;
        if !source.exists() {
            return Err(StoreError::missing_file("backup file", source));
        }

        let destination_exists = self.db_path.exists();
        if destination_exists && !options.force {
            return Err(StoreError::Conflict(format!(
                "database already exists at {} (use --force to overwrite)",
                self.db_path.display()
            )));
        }

        let safety_backup = if options.create_backup && destination_exists {
            let path = safety_backup_path(&self.db_path);
            self.backup(&BackupOptions::new(&path))?;
            info!(path = %path.display(), "created safety backup");
            Some(path)
        } else {
            None
        };

        create_parent_dir(&self.db_path)?;
        let compressed = is_gzip(source)?;
        let staging = staging_path(&self.db_path);
        if let Err(err) = decode_into(source, &staging, compressed) {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }

        for suffix in ["-wal", "-shm"] {
            remove_side_file(&self.db_path, suffix)?;
        }
        fs::rename(&staging, &self.db_path).map_err(StoreError::io(format!(
            "failed to move restored database into {}",
            self.db_path.display()
        )))?;

        if options.verify {
            verify_database(&self.db_path)?;
        }

        info!(
            from = %source.display(),
            to = %self.db_path.display(),
            compressed,
            "restore complete"
        );
        Ok(RestoreReport {
            destination: self.db_path.clone(),
            compressed,
            safety_backup,
            verified: options.verify,
        })
    }

    fn checkpoint(&self) {
        let result = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .and_then(|conn| conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())));
        match result {
            Ok(()) => debug!(path = %self.db_path.display(), "checkpointed WAL"),
            Err(err) => warn!(path = %self.db_path.display(), "WAL checkpoint skipped: {err}"),
        }
    }

    fn write_raw(&self, output: &Path) -> Result<()> {
        let mut src = File::open(&self.db_path).map_err(StoreError::io(format!(
            "failed to open {}",
            self.db_path.display()
        )))?;
        let mut dst = StagedFile::create(output)?;
        io::copy(&mut src, &mut dst)
            .map_err(StoreError::io(format!("failed to write {}", output.display())))?;
        dst.commit()
    }

    fn write_compressed(&self, output: &Path) -> Result<()> {
        let src = File::open(&self.db_path).map_err(StoreError::io(format!(
            "failed to open {}",
            self.db_path.display()
        )))?;
        let mtime = src
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| u32::try_from(d.as_secs()).ok())
            .unwrap_or_default();
        let filename = self
            .db_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut encoder = GzBuilder::new()
            .filename(filename)
            .mtime(mtime)
            .write(StagedFile::create(output)?, Compression::default());
        io::copy(&mut BufReader::new(src), &mut encoder)
            .map_err(StoreError::io(format!("failed to compress into {}", output.display())))?;
        encoder
            .finish()
            .map_err(StoreError::io(format!("failed to finish {}", output.display())))?
            .commit()
    }
}

/// `{db}.backup.{timestamp}` with microsecond resolution, suffixed with a
/// counter if that name is already taken.
fn safety_backup_path(db_path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S%.6f");
    let base = with_suffix(db_path, &format!(".backup.{stamp}"));
    let mut candidate = base.clone();
    let mut attempt = 1;
    while candidate.exists() {
        candidate = with_suffix(&base, &format!(".{attempt}"));
        attempt += 1;
    }
    candidate
}

fn staging_path(db_path: &Path) -> PathBuf {
    with_suffix(db_path, ".restoring")
}

fn remove_side_file(db_path: &Path, suffix: &str) -> Result<()> {
    let side = with_suffix(db_path, suffix);
    match fs::remove_file(&side) {
        Ok(()) => {
            debug!(path = %side.display(), "removed stale side file");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::Io {
            context: format!("failed to remove {}", side.display()),
            source: err,
        }),
    }
}

fn decode_into(source: &Path, target: &Path, compressed: bool) -> Result<()> {
    let src =
        File::open(source).map_err(StoreError::io(format!("failed to open {}", source.display())))?;
    let dst = File::create(target)
        .map_err(StoreError::io(format!("failed to create {}", target.display())))?;
    let mut writer = BufWriter::new(dst);
    let copied = if compressed {
        io::copy(&mut GzDecoder::new(BufReader::new(src)), &mut writer)
    } else {
        io::copy(&mut BufReader::new(src), &mut writer)
    };
    copied.map_err(StoreError::io(format!(
        "failed to restore from {}",
        source.display()
    )))?;
    writer
        .flush()
        .map_err(StoreError::io(format!("failed to flush {}", target.display())))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(StoreError::io(format!("failed to sync {}", target.display())))
}

fn verify_artifact(path: &Path, compressed: bool) -> Result<()> {
    if !compressed {
        return verify_database(path);
    }
    let file =
        File::open(path).map_err(StoreError::io(format!("failed to open {}", path.display())))?;
    io::copy(&mut GzDecoder::new(BufReader::new(file)), &mut io::sink()).map_err(|err| {
        StoreError::Integrity(format!(
            "backup verification failed for {}: {err}",
            path.display()
        ))
    })?;
    Ok(())
}

/// Opens `path` without creating it and runs `PRAGMA integrity_check`.
///
/// WAL-mode files need a writable handle for their shared-memory index.
pub(crate) fn verify_database(path: &Path) -> Result<()> {
    let failed = |detail: String| {
        StoreError::Integrity(format!("verification failed for {}: {detail}", path.display()))
    };
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
        .map_err(|err| failed(err.to_string()))?;
    let mut stmt = conn
        .prepare("PRAGMA integrity_check")
        .map_err(|err| failed(err.to_string()))?;
    let lines = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|err| failed(err.to_string()))?;
    if lines.len() == 1 && lines[0] == "ok" {
        Ok(())
    } else {
        Err(failed(lines.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO items (name) VALUES ('a'), ('b');",
        )
        .unwrap();
    }

    #[test]
    fn test_backup_missing_source_is_not_found() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(dir.path().join("missing.db"));
        let err = manager
            .backup(&BackupOptions::new(dir.path().join("out.db")))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_backup_onto_source_is_conflict() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("gogo.db");
        make_db(&db);
        let before = fs::read(&db).unwrap();
        let manager = BackupManager::new(&db);

        for compress in [false, true] {
            let err = manager
                .backup(&BackupOptions::new(&db).compress(compress))
                .unwrap_err();
            assert!(matches!(err, StoreError::Conflict(_)));
        }
        let aliased = dir.path().join(".").join("gogo.db");
        let err = manager.backup(&BackupOptions::new(&aliased)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert_eq!(fs::read(&db).unwrap(), before);
        let conn = Connection::open(&db).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_backup_leaves_no_staging_file() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("gogo.db");
        make_db(&db);
        let out = dir.path().join("snap.gz");
        BackupManager::new(&db)
            .backup(&BackupOptions::new(&out).compress(true))
            .unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".partial")), "{names:?}");
    }

    #[test]
    fn test_safety_backup_paths_are_distinct() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("gogo.db");
        let first = safety_backup_path(&db);
        fs::write(&first, b"taken").unwrap();
        let second = safety_backup_path(&db);
        assert_ne!(first, second);
        assert!(!second.exists());
    }

    #[test]
    fn test_repeated_safety_backups_keep_the_original() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("gogo.db");
        make_db(&db);
        let original = fs::read(&db).unwrap();
        let manager = BackupManager::new(&db);
        let artifact = dir.path().join("snap.db");
        manager.backup(&BackupOptions::new(&artifact)).unwrap();

        let options = RestoreOptions::new(&artifact).force(true).create_backup(true);
        let first = manager.restore(&options).unwrap().safety_backup.unwrap();
        let second = manager.restore(&options).unwrap().safety_backup.unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read(&first).unwrap(), original);
    }

    #[test]
    fn test_compressed_backup_has_magic_bytes() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("gogo.db");
        make_db(&db);
        let out = dir.path().join("nested/backups/gogo.bak");
        let report = BackupManager::new(&db)
            .backup(&BackupOptions::new(&out).compress(true).verify(true))
            .unwrap();
        assert!(report.compressed);
        assert!(is_gzip(&out).unwrap());
        assert!(backup_info(&out).unwrap().is_compressed);
    }

    #[test]
    fn test_raw_backup_verifies() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("gogo.db");
        make_db(&db);
        let out = dir.path().join("gogo.db.gz");
        let report = BackupManager::new(&db)
            .backup(&BackupOptions::new(&out).verify(true))
            .unwrap();
        assert!(!report.compressed);
        assert!(!is_gzip(&out).unwrap());
        assert_eq!(report.size, fs::metadata(&out).unwrap().len());
    }

    #[test]
    fn test_verify_rejects_non_database() {
        let dir = TempDir::new().unwrap();
        let junk = dir.path().join("junk.db");
        fs::write(&junk, vec![b'x'; 4096]).unwrap();
        let err = verify_database(&junk).unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
    }

    #[test]
    fn test_short_file_is_not_gzip() {
        let dir = TempDir::new().unwrap();
        let one = dir.path().join("one");
        fs::write(&one, [0x1f]).unwrap();
        assert!(!is_gzip(&one).unwrap());
    }

    #[test]
    fn test_restore_conflict_and_safety_backup() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("gogo.db");
        make_db(&db);
        let manager = BackupManager::new(&db);
        let artifact = dir.path().join("snap.gz");
        manager
            .backup(&BackupOptions::new(&artifact).compress(true))
            .unwrap();

        let err = manager.restore(&RestoreOptions::new(&artifact)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref msg) if msg.contains("--force")));

        let report = manager
            .restore(&RestoreOptions::new(&artifact).force(true).create_backup(true).verify(true))
            .unwrap();
        assert!(report.compressed);
        let safety = report.safety_backup.unwrap();
        assert!(safety.exists());
        assert!(!staging_path(&db).exists());
    }

    #[test]
    fn test_corrupt_gzip_leaves_destination_untouched() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("gogo.db");
        make_db(&db);
        let before = fs::read(&db).unwrap();

        let bad = dir.path().join("bad.gz");
        fs::write(&bad, [0x1f, 0x8b, 0x08, 0x00, 0xde, 0xad]).unwrap();
        let err = BackupManager::new(&db)
            .restore(&RestoreOptions::new(&bad).force(true))
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert_eq!(fs::read(&db).unwrap(), before);
        assert!(!staging_path(&db).exists());
    }

    #[test]
    fn test_backup_info_display() {
        let info = BackupInfo {
            path: PathBuf::from("/b/gogo.db.gz"),
            size: 3 * 1024 * 1024 / 2,
            modified: Local::now(),
            is_compressed: true,
        };
        let text = info.to_string();
        assert!(text.starts_with("/b/gogo.db.gz (1.50 MB, Compressed, "));
    }
}
