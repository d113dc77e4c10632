//! Filesystem helpers.
//!
//! These are synchronous on purpose: config files are small, and every call
//! happens while the owning [`FileStore`](crate::FileStore) lock is held, so
//! there is no interleaving to gain from splitting them across tasks.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Sibling path used as the staging file for [`safe_write_all`].
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replace `path` with `buf`.
///
/// The buffer is written to a staging file in the same directory, synced,
/// and renamed over the destination, so readers see either the old or the
/// new contents and never a partial file. Callers must hold the file's
/// writer lock, since the staging name is fixed.
pub fn safe_write_all<P: AsRef<Path>, B: AsRef<[u8]>>(path: P, buf: B) -> io::Result<()> {
    let path = path.as_ref();
    let tmp_path = staging_path(path);

    let result = (|| {
        let mut tmp_file = fs::File::create(&tmp_path)?;
        tmp_file.write_all(buf.as_ref())?;
        tmp_file.flush()?;
        tmp_file.sync_all()?;
        drop(tmp_file);
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() && tmp_path.is_file() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Read a file, mapping "not found" to `None`.
pub fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
