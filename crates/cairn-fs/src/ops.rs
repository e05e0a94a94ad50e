//! Filesystem passthroughs that keep the `files` cache namespace coherent.

use crate::{modified_millis, FileAccess, FileAccessError};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Only list files with one of these extensions (case-insensitive, with or
    /// without the leading `.`). Empty means every file.
    pub extensions: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStats {
    pub size: u64,
    pub modified_millis: u64,
    pub is_file: bool,
    pub is_dir: bool,
}

impl FileAccess {
    /// Copies `src` to `dst` and drops any cached record for `dst`.
    pub async fn copy_file(
        &self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
    ) -> Result<PathBuf, FileAccessError> {
        let src = self.resolve(src)?;
        let dst = self.resolve(dst)?;
        let _guard = self.locks().acquire(&dst).await?;

        ensure_parent(&dst).await?;
        copy_contents(&src, &dst).await?;
        self.invalidate(&dst);

        tracing::trace!(
            target: "cairn.fs",
            src = %src.display(),
            dst = %dst.display(),
            "copied file"
        );
        Ok(dst)
    }

    /// Moves `src` to `dst`, dropping cached records for both paths.
    ///
    /// Both paths are locked, always in the same order, for the duration of
    /// the move. Falls back to copy + remove when the rename crosses devices.
    pub async fn move_file(
        &self,
        src: impl AsRef<Path>,
        dst: impl AsRef<Path>,
    ) -> Result<PathBuf, FileAccessError> {
        let src = self.resolve(src)?;
        let dst = self.resolve(dst)?;
        if src == dst {
            tokio::fs::metadata(&src)
                .await
                .map_err(|err| FileAccessError::from_io(&src, err))?;
            return Ok(dst);
        }

        let (first, second) = if src < dst { (&src, &dst) } else { (&dst, &src) };
        let _first = self.locks().acquire(first).await?;
        let _second = self.locks().acquire(second).await?;

        ensure_parent(&dst).await?;
        match tokio::fs::rename(&src, &dst).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
                tracing::debug!(
                    target: "cairn.fs",
                    src = %src.display(),
                    dst = %dst.display(),
                    "rename crosses devices; copying instead"
                );
                copy_contents(&src, &dst).await?;
                tokio::fs::remove_file(&src)
                    .await
                    .map_err(|err| FileAccessError::from_io(&src, err))?;
            }
            Err(err) => return Err(FileAccessError::from_io(&src, err)),
        }

        self.invalidate(&src);
        self.invalidate(&dst);
        Ok(dst)
    }

    /// Removes `path` and its cached record.
    pub async fn delete_file(&self, path: impl AsRef<Path>) -> Result<(), FileAccessError> {
        let abs = self.resolve(path)?;
        let _guard = self.locks().acquire(&abs).await?;

        let removed = tokio::fs::remove_file(&abs).await;
        // A missing file must not leave a record behind either.
        self.invalidate(&abs);
        removed.map_err(|err| FileAccessError::from_io(&abs, err))
    }

    /// Files under `dir`, sorted by path.
    pub async fn list_files(
        &self,
        dir: impl AsRef<Path>,
        opts: ListOptions,
    ) -> Result<Vec<PathBuf>, FileAccessError> {
        let dir = self.resolve(dir)?;
        let meta = tokio::fs::metadata(&dir)
            .await
            .map_err(|err| FileAccessError::from_io(&dir, err))?;
        if !meta.is_dir() {
            return Err(FileAccessError::Io {
                path: dir,
                source: io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
            });
        }

        let walk_root = dir.clone();
        tokio::task::spawn_blocking(move || walk_files(&walk_root, &opts))
            .await
            .map_err(|err| FileAccessError::Io {
                path: dir,
                source: io::Error::other(err),
            })
    }

    pub async fn file_stats(&self, path: impl AsRef<Path>) -> Result<FileStats, FileAccessError> {
        let abs = self.resolve(path)?;
        let meta = tokio::fs::metadata(&abs)
            .await
            .map_err(|err| FileAccessError::from_io(&abs, err))?;
        Ok(FileStats {
            size: meta.len(),
            modified_millis: modified_millis(&meta),
            is_file: meta.is_file(),
            is_dir: meta.is_dir(),
        })
    }

    pub async fn path_exists(&self, path: impl AsRef<Path>) -> bool {
        match self.resolve(path) {
            Ok(abs) => tokio::fs::try_exists(&abs).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Errors opening `src` name `src`; everything after that names `dst`.
async fn copy_contents(src: &Path, dst: &Path) -> Result<(), FileAccessError> {
    let source = tokio::fs::File::open(src)
        .await
        .map_err(|err| FileAccessError::from_io(src, err))?;
    let meta = source
        .metadata()
        .await
        .map_err(|err| FileAccessError::from_io(src, err))?;
    if !meta.is_file() {
        return Err(FileAccessError::Io {
            path: src.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        });
    }
    drop(source);

    tokio::fs::copy(src, dst)
        .await
        .map(|_| ())
        .map_err(|source| FileAccessError::Io {
            path: dst.to_path_buf(),
            source,
        })
}

async fn ensure_parent(path: &Path) -> Result<(), FileAccessError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| FileAccessError::Io {
            path: parent.to_path_buf(),
            source,
        })
}

fn walk_files(dir: &Path, opts: &ListOptions) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(dir).min_depth(1);
    if !opts.recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(target: "cairn.fs", error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !matches_extension(entry.path(), &opts.extensions) {
            continue;
        }
        files.push(entry.into_path());
    }
    files.sort();
    files
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
}
