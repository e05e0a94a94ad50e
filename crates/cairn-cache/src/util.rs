use crate::error::CacheError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_millis() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as u64,
        Err(err) => {
            // System clock set before 1970; log once and carry on.
            static REPORTED: OnceLock<()> = OnceLock::new();
            if REPORTED.set(()).is_ok() {
                tracing::debug!(
                    target: "cairn.cache",
                    error = %err,
                    "system time is before unix epoch; using 0 for now_millis"
                );
            }
            0
        }
    }
}

/// Milliseconds since the epoch for a filesystem timestamp, clamped to 0.
pub fn system_time_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Reads a cache file, returning `None` for misses, non-files, and files over `limit`.
pub(crate) fn read_file_limited(path: &Path, limit: u64) -> Option<Vec<u8>> {
    // Never follow symlinks out of the cache directory.
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "cairn.cache",
                    path = %path.display(),
                    error = %err,
                    "failed to stat cache file"
                );
            }
            return None;
        }
    };
    if meta.file_type().is_symlink() || !meta.is_file() {
        remove_file_best_effort(path, "read_file_limited.invalid_type");
        return None;
    }
    if meta.len() > limit {
        tracing::debug!(
            target: "cairn.cache",
            path = %path.display(),
            len = meta.len(),
            limit,
            "cache file exceeds read limit"
        );
        return None;
    }

    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "cairn.cache",
                    path = %path.display(),
                    error = %err,
                    "failed to read cache file"
                );
            }
            None
        }
    }
}

/// Removes `path`, treating an already-missing file as success.
pub(crate) fn remove_file_best_effort(path: &Path, reason: &'static str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::debug!(
                target: "cairn.cache",
                path = %path.display(),
                reason,
                error = %err,
                "failed to remove cache file"
            );
            false
        }
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Marker that appears in the name of every temporary file written by [`StagedFile`].
pub(crate) const TMP_MARKER: &str = ".tmp.";

/// A fully written and synced temporary file waiting to be renamed over its
/// destination.
///
/// Dropping a `StagedFile` without calling [`StagedFile::commit`] removes the
/// temporary file.
#[derive(Debug)]
pub struct StagedFile {
    tmp_path: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Writes `bytes` to a unique temporary file next to `dest`.
    pub fn write(dest: &Path, bytes: &[u8]) -> Result<Self, CacheError> {
        let parent = parent_dir(dest)?;
        fs::create_dir_all(parent)?;

        let (tmp_path, mut file) = open_unique_tmp_file(dest, parent)?;
        let staged = Self {
            tmp_path,
            dest: dest.to_path_buf(),
            committed: false,
        };
        let written = file.write_all(bytes).and_then(|()| file.sync_all());
        drop(file);
        written?;
        Ok(staged)
    }

    /// Atomically renames the temporary file over the destination.
    pub fn commit(mut self) -> Result<(), CacheError> {
        rename_replacing(&self.tmp_path, &self.dest)?;
        self.committed = true;
        if let Some(parent) = self.dest.parent() {
            sync_dir_best_effort(parent, "staged_file.commit");
        }
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(err) = fs::remove_file(&self.tmp_path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "cairn.cache",
                    path = %self.tmp_path.display(),
                    error = %err,
                    "failed to remove uncommitted temporary file"
                );
            }
        }
    }
}

/// Write `bytes` to `path` via a temporary file and an atomic rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    StagedFile::write(path, bytes)?.commit()
}

fn parent_dir(path: &Path) -> Result<&Path, CacheError> {
    let Some(parent) = path.parent() else {
        return Err(io::Error::other("path has no parent").into());
    };
    Ok(if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    })
}

fn rename_replacing(from: &Path, to: &Path) -> io::Result<()> {
    const MAX_RENAME_ATTEMPTS: usize = 1024;
    let mut attempts = 0usize;
    loop {
        match fs::rename(from, to) {
            Ok(()) => return Ok(()),
            Err(err)
                if cfg!(windows)
                    && (err.kind() == io::ErrorKind::AlreadyExists || to.exists()) =>
            {
                // `rename` does not overwrite on Windows; concurrent writers may
                // race through `remove + rename`, so retry until this one lands.
                match fs::remove_file(to) {
                    Ok(()) => {}
                    Err(remove_err) if remove_err.kind() == io::ErrorKind::NotFound => {}
                    Err(remove_err) => return Err(remove_err),
                }

                attempts += 1;
                if attempts >= MAX_RENAME_ATTEMPTS {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn sync_dir_best_effort(dir: &Path, reason: &'static str) {
    #[cfg(unix)]
    {
        static SYNC_DIR_ERROR_LOGGED: OnceLock<()> = OnceLock::new();
        match fs::File::open(dir).and_then(|dir| dir.sync_all()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                if SYNC_DIR_ERROR_LOGGED.set(()).is_ok() {
                    tracing::debug!(
                        target: "cairn.cache",
                        dir = %dir.display(),
                        reason,
                        error = %err,
                        "failed to sync directory (best effort)"
                    );
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = (dir, reason);
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!("{TMP_MARKER}{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}
