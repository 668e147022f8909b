//! Output files written under a sibling temporary name.
//!
//! A [`StagedFile`] only replaces its target on [`StagedFile::commit`].
//! Dropping it uncommitted removes the temporary file, so a failed write
//! never leaves a truncated artifact at the target path.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StoreError};

const STAGING_SUFFIX: &str = ".partial";

pub(crate) struct StagedFile {
    target: PathBuf,
    staging: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl StagedFile {
    /// Creates the parent directory of `target` and opens the staging file.
    pub(crate) fn create(target: &Path) -> Result<Self> {
        create_parent_dir(target)?;
        let staging = with_suffix(target, STAGING_SUFFIX);
        let file = File::create(&staging)
            .map_err(StoreError::io(format!("failed to create {}", staging.display())))?;
        Ok(Self {
            target: target.to_path_buf(),
            staging,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Flushes, syncs and renames the staging file over the target.
    pub(crate) fn commit(mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let result = self.finish(writer);
        if result.is_err() {
            let _ = fs::remove_file(&self.staging);
        }
        result
    }

    fn finish(&self, writer: BufWriter<File>) -> Result<()> {
        let file = writer.into_inner().map_err(|err| StoreError::Io {
            context: format!("failed to flush {}", self.staging.display()),
            source: err.into_error(),
        })?;
        file.sync_all()
            .map_err(StoreError::io(format!("failed to sync {}", self.staging.display())))?;
        drop(file);
        fs::rename(&self.staging, &self.target).map_err(StoreError::io(format!(
            "failed to move {} into place",
            self.target.display()
        )))?;
        debug!(path = %self.target.display(), "committed output file");
        Ok(())
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("staged file already committed"))
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.staging);
        }
    }
}

/// True when both paths exist and resolve to the same file.
pub(crate) fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// True when `path` is the database at `db_path` or one of its WAL side
/// files.
pub(crate) fn is_store_file(path: &Path, db_path: &Path) -> bool {
    ["", "-wal", "-shm"]
        .iter()
        .any(|suffix| same_file(path, &with_suffix(db_path, suffix)))
}

pub(crate) fn create_parent_dir(path: &Path) -> Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => fs::create_dir_all(parent).map_err(StoreError::io(format!(
            "failed to create directory {}",
            parent.display()
        ))),
        None => Ok(()),
    }
}

pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}
