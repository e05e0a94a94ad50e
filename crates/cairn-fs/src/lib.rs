//! Cache-backed file access.
//!
//! [`FileAccess`] reads and writes real files through the `files` cache
//! namespace. A cached [`FileRecord`] carries the source file's mtime; a read
//! that finds the file modified after that timestamp drops the record and goes
//! to disk. Writers to the same path are serialized through a shared
//! [`LockManager`].
//!
//! Every path is made absolute and lexically normalized before it is used as a
//! lock key or a cache key, so `./a.txt`, `a.txt` and `/cwd/a.txt` all refer to
//! the same entry.

mod batch;
mod error;
mod ops;

use cairn_cache::path::{absolute_path, file_cache_key};
use cairn_cache::{
    system_time_millis, CacheService, KeyKind, LockManager, PersistentCache, SetOptions,
};
use cairn_config::{CairnConfig, ConfigError};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use batch::{BatchReadReport, BatchStats, BatchWriteReport, DEFAULT_BATCH_CHUNK_SIZE};
pub use error::FileAccessError;
pub use ops::{FileStats, ListOptions};

/// Cached contents of a file. Valid while the file's mtime is `<= timestamp`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub content: String,
    /// Source mtime in milliseconds since the unix epoch.
    pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Skip the cache entirely: neither consult nor populate it.
    pub no_cache: bool,
}

impl ReadOptions {
    pub fn no_cache() -> Self {
        Self { no_cache: true }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadOutcome {
    pub content: String,
    /// Whether the content came from the cache.
    pub cached: bool,
}

#[derive(Clone, Debug)]
pub struct FileAccess {
    cache: PersistentCache,
    locks: Arc<LockManager>,
}

impl FileAccess {
    pub fn new(cache: PersistentCache, locks: Arc<LockManager>) -> Self {
        Self { cache, locks }
    }

    /// File access over the `files` namespace of the configured cache root.
    pub fn from_config(config: &CairnConfig) -> Result<Self, ConfigError> {
        let service = CacheService::new(config.cache.clone())?;
        Ok(Self::new(
            service.files(),
            Arc::new(LockManager::new(config.locks)),
        ))
    }

    pub fn cache(&self) -> &PersistentCache {
        &self.cache
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// The absolute, normalized form of `path` used for locks and cache keys.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, FileAccessError> {
        let path = path.as_ref();
        absolute_path(path).map_err(|source| FileAccessError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads `path`, serving it from the cache when the cached record is still fresh.
    pub async fn read(
        &self,
        path: impl AsRef<Path>,
        opts: ReadOptions,
    ) -> Result<ReadOutcome, FileAccessError> {
        let abs = self.resolve(path)?;
        let key = file_cache_key(&abs);

        if !opts.no_cache {
            if let Some(record) = self.cache.get::<FileRecord>(&key) {
                match tokio::fs::metadata(&abs).await {
                    Ok(meta) if modified_millis(&meta) <= record.timestamp => {
                        return Ok(ReadOutcome {
                            content: record.content,
                            cached: true,
                        });
                    }
                    Ok(meta) => {
                        tracing::debug!(
                            target: "cairn.fs",
                            path = %abs.display(),
                            cached_mtime = record.timestamp,
                            disk_mtime = modified_millis(&meta),
                            "cached file record is stale"
                        );
                        self.cache.delete(&key);
                    }
                    Err(err) => {
                        // The disk read below reports the error.
                        tracing::debug!(
                            target: "cairn.fs",
                            path = %abs.display(),
                            error = %err,
                            "failed to stat cached file"
                        );
                        self.cache.delete(&key);
                    }
                }
            }
        }

        // Stat before reading so a concurrent modification leaves the record
        // looking stale rather than fresh.
        let meta = tokio::fs::metadata(&abs)
            .await
            .map_err(|err| FileAccessError::from_io(&abs, err))?;
        let content = tokio::fs::read_to_string(&abs)
            .await
            .map_err(|err| FileAccessError::from_io(&abs, err))?;

        if !opts.no_cache {
            self.store(&key, &content, modified_millis(&meta));
        }

        Ok(ReadOutcome {
            content,
            cached: false,
        })
    }

    /// Writes `content` to `path` under the path's lock, creating parent
    /// directories, and refreshes the cached record. Returns the absolute path.
    pub async fn write(
        &self,
        path: impl AsRef<Path>,
        content: &str,
    ) -> Result<PathBuf, FileAccessError> {
        let abs = self.resolve(path)?;
        let _guard = self.locks.acquire(&abs).await?;

        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FileAccessError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&abs, content)
            .await
            .map_err(|source| FileAccessError::Io {
                path: abs.clone(),
                source,
            })?;

        match tokio::fs::metadata(&abs).await {
            Ok(meta) => self.store(&file_cache_key(&abs), content, modified_millis(&meta)),
            Err(err) => {
                tracing::debug!(
                    target: "cairn.fs",
                    path = %abs.display(),
                    error = %err,
                    "failed to stat written file; dropping cache entry"
                );
                self.invalidate(&abs);
            }
        }

        Ok(abs)
    }

    /// Drops the cached record for an absolute path.
    pub(crate) fn invalidate(&self, abs: &Path) {
        self.cache.delete(&file_cache_key(abs));
    }

    fn store(&self, key: &str, content: &str, timestamp: u64) {
        let record = FileRecord {
            content: content.to_owned(),
            timestamp,
        };
        let stored = self
            .cache
            .set(key, &record, SetOptions::default().with_kind(KeyKind::File));
        if !stored {
            tracing::debug!(target: "cairn.fs", key, "file record not cached");
        }
    }
}

pub(crate) fn modified_millis(meta: &Metadata) -> u64 {
    meta.modified().map(system_time_millis).unwrap_or(0)
}
