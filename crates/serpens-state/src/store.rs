//! FileStore — a config file with a backup archive and a writer lock.
//!
//! Mutations go through [`FileStore::begin`], which returns a
//! [`Transaction`] holding the file's exclusive lock. Beginning a
//! transaction copies the live file to `<backup_dir>/<prefix>_<YYYYMMDD_HHMMSS>.<ext>`.
//! A transaction that is not committed restores the latest backup when it
//! is dropped, so every early return restores the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::fs::{read_optional, safe_write_all};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident, $path:expr) => {
        |e| StateError::$variant(format!("{}: {e}", $path.display()))
    };
}

/// One config file and its backup archive.
///
/// Clones share the same writer lock, so every clone of a store serializes
/// against the others.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    backup_dir: PathBuf,
    prefix: String,
    extension: String,
    lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// Create a store for `path`, archiving backups as `<prefix>_<timestamp>.<extension>`.
    pub fn new(
        path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        prefix: &str,
        extension: &str,
    ) -> Self {
        Self {
            path: path.into(),
            backup_dir: backup_dir.into(),
            prefix: prefix.to_string(),
            extension: extension.trim_start_matches('.').to_string(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Read the latest committed contents without taking the writer lock.
    ///
    /// Writes are atomic renames, so this never observes a partial file.
    pub fn read(&self) -> StateResult<Option<String>> {
        read_optional(&self.path).map_err(map_err!(Read, self.path))
    }

    /// Acquire the writer lock and back up the live file.
    pub async fn begin(&self) -> StateResult<Transaction<'_>> {
        let guard = self.lock.lock().await;
        let existed = self.path.is_file();
        let backup = if existed { Some(self.backup()?) } else { None };
        Ok(Transaction {
            store: self,
            _guard: guard,
            existed,
            backup,
            finished: false,
        })
    }

    /// All backups for this file, oldest first.
    pub fn backups(&self) -> StateResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateError::Read(format!("{}: {e}", self.backup_dir.display()))),
        };
        let prefix = format!("{}_", self.prefix);
        let suffix = format!(".{}", self.extension);
        let mut backups: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(&suffix))
            })
            .collect();
        backups.sort();
        Ok(backups)
    }

    /// The lexicographically (and so temporally) latest backup.
    pub fn latest_backup(&self) -> StateResult<Option<PathBuf>> {
        Ok(self.backups()?.pop())
    }

    fn backup(&self) -> StateResult<PathBuf> {
        fs::create_dir_all(&self.backup_dir).map_err(map_err!(Backup, self.backup_dir))?;
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let backup_path = self.unused_backup_path(&timestamp);
        fs::copy(&self.path, &backup_path).map_err(map_err!(Backup, backup_path))?;
        info!(path = ?backup_path, "backed up config");
        Ok(backup_path)
    }

    /// `<prefix>_<timestamp>.<ext>`, or with a `_NNN` counter when a backup
    /// from the same second already exists. Counters sort after the bare name.
    fn unused_backup_path(&self, timestamp: &str) -> PathBuf {
        let base = self
            .backup_dir
            .join(format!("{}_{timestamp}.{}", self.prefix, self.extension));
        if !base.exists() {
            return base;
        }
        (1..)
            .map(|n: u32| {
                self.backup_dir
                    .join(format!("{}_{timestamp}_{n:03}.{}", self.prefix, self.extension))
            })
            .find(|candidate| !candidate.exists())
            .unwrap_or(base)
    }

    /// Put the file back the way it was before the transaction.
    fn restore(&self, existed: bool) -> StateResult<()> {
        if !existed {
            // Nothing to go back to: the file did not exist before.
            if self.path.is_file() {
                fs::remove_file(&self.path).map_err(map_err!(Restore, self.path))?;
            }
            debug!(path = ?self.path, "removed file created by failed transaction");
            return Ok(());
        }

        let latest = self
            .latest_backup()?
            .ok_or_else(|| StateError::Restore(format!("no backup for {}", self.path.display())))?;
        let contents = fs::read(&latest).map_err(map_err!(Restore, latest))?;
        safe_write_all(&self.path, contents).map_err(map_err!(Restore, self.path))?;
        info!(from = ?latest, path = ?self.path, "restored config from backup");
        Ok(())
    }
}

/// Exclusive write access to a [`FileStore`].
///
/// Dropping an uncommitted transaction restores the latest backup.
pub struct Transaction<'a> {
    store: &'a FileStore,
    _guard: MutexGuard<'a, ()>,
    existed: bool,
    backup: Option<PathBuf>,
    finished: bool,
}

impl Transaction<'_> {
    /// Current contents (`None` if the file does not exist yet).
    pub fn read(&self) -> StateResult<Option<String>> {
        self.store.read()
    }

    /// Atomically replace the file contents.
    pub fn write(&mut self, contents: &str) -> StateResult<()> {
        safe_write_all(&self.store.path, contents).map_err(map_err!(Write, self.store.path))?;
        debug!(path = ?self.store.path, bytes = contents.len(), "config written");
        Ok(())
    }

    /// Backup taken when the transaction began.
    pub fn backup_path(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    /// Keep the written contents.
    pub fn commit(mut self) {
        self.finished = true;
    }

    /// Restore the backup now, reporting whether that worked.
    pub fn rollback(mut self) -> StateResult<()> {
        self.finished = true;
        self.store.restore(self.existed)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.store.restore(self.existed) {
            warn!(path = ?self.store.path, error = %e, "failed to restore config after aborted transaction");
        }
    }
}
