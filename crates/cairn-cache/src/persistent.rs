use crate::error::CacheError;
use crate::key::{KeyHash, KeyKind};
use crate::metadata::{self, EntryMetadata, METADATA_READ_LIMIT_BYTES};
use crate::util::{
    atomic_write, now_millis, read_file_limited, remove_file_best_effort, system_time_millis,
    StagedFile, TMP_MARKER,
};
use cairn_config::NamespaceConfig;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DATA_SUFFIX: &str = ".cache";
const META_SUFFIX: &str = ".cache.meta";

/// Temporary files and half-written entries younger than this are assumed to
/// belong to a write still in flight and are left alone by [`PersistentCache::prune`].
const STALE_LEFTOVER_AGE: Duration = Duration::from_secs(60);

/// Number of entries [`PersistentCache::stats`] lists when callers have no preference.
pub const DEFAULT_STATS_TOP_N: usize = 10;

/// Disk-backed key/value store for one namespace.
///
/// Each entry is two files under `<root>/<namespace>/`: `<hash>.cache` holds
/// the JSON-serialized value and `<hash>.cache.meta` the [`EntryMetadata`].
/// Both are written to temporary files first and renamed into place, data
/// before metadata, so an entry is only visible once both are complete.
///
/// The cache is an optimization layer: no method returns an error. I/O faults
/// and corrupt files are logged and read as misses.
#[derive(Clone, Debug)]
pub struct PersistentCache {
    dir: PathBuf,
    namespace: String,
    policy: NamespaceConfig,
}

/// Per-write overrides for [`PersistentCache::set`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Overrides the namespace TTL.
    pub ttl: Option<Duration>,
    /// Tags the entry explicitly instead of inferring the kind from the key.
    pub kind: Option<KeyKind>,
}

impl SetOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_kind(mut self, kind: KeyKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Entries removed.
    pub cleared: usize,
    /// Files that could not be removed.
    pub errors: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub items: usize,
    pub total_size: u64,
    pub total_hits: u64,
    /// `total_hits / (total_hits + items)`: every live entry's initial write
    /// counts as one miss.
    pub hit_rate: f64,
    /// Most-hit live entries, hit count descending.
    pub active: Vec<EntryMetadata>,
    /// Expired entries found (and deleted) during this walk.
    pub expired: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed_entries: usize,
    pub removed_files: usize,
    pub errors: usize,
}

struct EntryPaths {
    data: PathBuf,
    meta: PathBuf,
}

impl PersistentCache {
    pub fn new(root: impl AsRef<Path>, namespace: &str, policy: NamespaceConfig) -> Self {
        Self {
            dir: root.as_ref().join(namespace),
            namespace: namespace.to_owned(),
            policy,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> NamespaceConfig {
        self.policy
    }

    /// Returns the value stored under `key`, counting the access as a hit.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let (_, bytes) = self.lookup(key, true)?;
        self.decode_value(key, &bytes)
    }

    /// Like [`Self::get`] but leaves the hit count and `lastAccess` untouched.
    pub fn peek<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let (_, bytes) = self.lookup(key, false)?;
        self.decode_value(key, &bytes)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get::<IgnoredAny>(key).is_some()
    }

    /// Metadata of a live entry, without touching its access statistics.
    pub fn metadata(&self, key: &str) -> Option<EntryMetadata> {
        let paths = self.entry_paths(key);
        self.read_live_metadata(key, &paths)
    }

    /// Stores `value` under `key`. Returns `false` if the serialized value is
    /// larger than the namespace allows or the write fails.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, opts: SetOptions) -> bool {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(
                    target: "cairn.cache",
                    namespace = %self.namespace,
                    error = %CacheError::from(err),
                    "failed to serialize cache value"
                );
                return false;
            }
        };

        let size = bytes.len() as u64;
        if size > self.policy.max_size_bytes {
            tracing::debug!(
                target: "cairn.cache",
                namespace = %self.namespace,
                size,
                max_size = self.policy.max_size_bytes,
                "rejecting cache value larger than namespace limit"
            );
            return false;
        }

        let now = now_millis();
        let ttl = opts.ttl.unwrap_or_else(|| self.policy.ttl());
        let meta = EntryMetadata {
            key: key.to_owned(),
            namespace: self.namespace.clone(),
            kind: opts.kind.unwrap_or_else(|| KeyKind::infer(key)),
            created: now,
            expires: now.saturating_add(ttl.as_millis() as u64),
            last_access: now,
            size,
            hits: 0,
        };

        let paths = self.entry_paths(key);
        match write_entry(&paths, &bytes, &meta) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    target: "cairn.cache",
                    namespace = %self.namespace,
                    path = %paths.data.display(),
                    error = %err,
                    "failed to write cache entry"
                );
                false
            }
        }
    }

    /// Removes the entry for `key`. Deleting a missing key is not an error.
    pub fn delete(&self, key: &str) -> bool {
        let paths = self.entry_paths(key);
        remove_entry_files(&paths, "delete")
    }

    /// Removes every entry in the namespace.
    pub fn clear(&self) -> ClearReport {
        let mut report = ClearReport::default();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::debug!(
                        target: "cairn.cache",
                        dir = %self.dir.display(),
                        error = %err,
                        "failed to list cache namespace"
                    );
                    report.errors += 1;
                }
                return report;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !entry.file_type().is_ok_and(|ty| ty.is_file()) {
                continue;
            }
            let is_data = file_name(&path).is_some_and(|name| name.ends_with(DATA_SUFFIX));
            if remove_file_best_effort(&path, "clear") {
                if is_data {
                    report.cleared += 1;
                }
            } else {
                report.errors += 1;
            }
        }

        tracing::debug!(
            target: "cairn.cache",
            namespace = %self.namespace,
            cleared = report.cleared,
            errors = report.errors,
            "cleared cache namespace"
        );
        report
    }

    /// Walks every entry, deleting expired ones, and summarizes the rest.
    pub fn stats(&self, top_n: usize) -> CacheStats {
        let now = now_millis();
        let mut stats = CacheStats::default();
        let mut active = Vec::new();

        for (meta_path, meta) in self.scan_metadata() {
            let Some(meta) = meta else {
                continue;
            };
            let paths = paths_from_meta_path(&meta_path);
            if meta.is_expired_at(now) {
                remove_entry_files(&paths, "stats.expired");
                stats.expired += 1;
                continue;
            }
            if !paths.data.exists() {
                continue;
            }
            stats.items += 1;
            stats.total_size = stats.total_size.saturating_add(meta.size);
            stats.total_hits = stats.total_hits.saturating_add(meta.hits);
            active.push(meta);
        }

        let accesses = stats.total_hits.saturating_add(stats.items as u64);
        if accesses > 0 {
            stats.hit_rate = stats.total_hits as f64 / accesses as f64;
        }

        active.sort_by(|a, b| {
            b.hits
                .cmp(&a.hits)
                .then_with(|| b.last_access.cmp(&a.last_access))
                .then_with(|| a.key.cmp(&b.key))
        });
        active.truncate(top_n);
        stats.active = active;
        stats
    }

    /// Metadata of every live entry, sorted by key. Expired entries are deleted.
    /// Entries whose data file is missing are skipped.
    pub fn entries(&self) -> Vec<EntryMetadata> {
        let now = now_millis();
        let mut out = Vec::new();
        for (meta_path, meta) in self.scan_metadata() {
            let Some(meta) = meta else {
                continue;
            };
            let paths = paths_from_meta_path(&meta_path);
            if meta.is_expired_at(now) {
                remove_entry_files(&paths, "entries.expired");
                continue;
            }
            // Metadata without data is a half-deleted entry; `prune` removes it.
            if !paths.data.exists() {
                continue;
            }
            out.push(meta);
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Deletes expired entries, corrupt metadata, orphaned halves of entries
    /// and leftover temporary files.
    pub fn prune(&self) -> PruneReport {
        let mut report = PruneReport::default();
        let now = now_millis();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    report.errors += 1;
                }
                return report;
            }
        };

        let remove = |path: &Path, reason: &'static str, report: &mut PruneReport| {
            if remove_file_best_effort(path, reason) {
                report.removed_files += 1;
            } else {
                report.errors += 1;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_meta) = entry.metadata() else {
                continue;
            };
            if !file_meta.is_file() {
                continue;
            }
            let Some(name) = file_name(&path) else {
                continue;
            };
            let old_enough = file_meta
                .modified()
                .map(|modified| {
                    now.saturating_sub(system_time_millis(modified))
                        >= STALE_LEFTOVER_AGE.as_millis() as u64
                })
                .unwrap_or(true);

            if name.contains(TMP_MARKER) {
                if old_enough {
                    remove(&path, "prune.tmp", &mut report);
                }
            } else if name.ends_with(META_SUFFIX) {
                let paths = paths_from_meta_path(&path);
                let meta = read_file_limited(&path, METADATA_READ_LIMIT_BYTES)
                    .and_then(|bytes| metadata::decode(&bytes));
                let stale = match meta {
                    Some(meta) => meta.is_expired_at(now) || !paths.data.exists(),
                    None => true,
                };
                if stale {
                    if remove_entry_files(&paths, "prune.entry") {
                        report.removed_entries += 1;
                    } else {
                        report.errors += 1;
                    }
                }
            } else if name.ends_with(DATA_SUFFIX) {
                let meta_path = append_suffix(&path, ".meta");
                if old_enough && !meta_path.exists() {
                    remove(&path, "prune.orphan_data", &mut report);
                }
            }
        }

        tracing::debug!(
            target: "cairn.cache",
            namespace = %self.namespace,
            removed_entries = report.removed_entries,
            removed_files = report.removed_files,
            errors = report.errors,
            "pruned cache namespace"
        );
        report
    }

    fn entry_paths(&self, key: &str) -> EntryPaths {
        let hash = KeyHash::of(key);
        EntryPaths {
            data: self.dir.join(format!("{hash}{DATA_SUFFIX}")),
            meta: self.dir.join(format!("{hash}{META_SUFFIX}")),
        }
    }

    fn read_live_metadata(&self, key: &str, paths: &EntryPaths) -> Option<EntryMetadata> {
        let bytes = read_file_limited(&paths.meta, METADATA_READ_LIMIT_BYTES)?;
        let Some(meta) = metadata::decode(&bytes) else {
            tracing::debug!(
                target: "cairn.cache",
                namespace = %self.namespace,
                path = %paths.meta.display(),
                "corrupt cache metadata; treating as miss"
            );
            remove_entry_files(paths, "lookup.corrupt_metadata");
            return None;
        };

        if meta.key != key {
            // A hash collision reads as a miss. The file belongs to the other
            // key, so it stays.
            tracing::debug!(
                target: "cairn.cache",
                namespace = %self.namespace,
                path = %paths.meta.display(),
                "cache key hash collision; treating as miss"
            );
            return None;
        }

        if meta.is_expired_at(now_millis()) {
            remove_entry_files(paths, "lookup.expired");
            return None;
        }

        Some(meta)
    }

    fn lookup(&self, key: &str, touch: bool) -> Option<(EntryMetadata, Vec<u8>)> {
        let paths = self.entry_paths(key);
        let mut meta = self.read_live_metadata(key, &paths)?;

        let limit = meta.size.max(self.policy.max_size_bytes);
        let Some(bytes) = read_file_limited(&paths.data, limit) else {
            tracing::debug!(
                target: "cairn.cache",
                namespace = %self.namespace,
                path = %paths.data.display(),
                "cache metadata without readable data; treating as miss"
            );
            remove_entry_files(&paths, "lookup.missing_data");
            return None;
        };

        if touch {
            meta.hits = meta.hits.saturating_add(1);
            meta.last_access = now_millis();
            self.record_hit(&paths, &meta);
        }

        Some((meta, bytes))
    }

    /// Rewrites the hit counters of the entry `read` was taken from. Skipped
    /// when the entry has since been deleted or replaced by a newer `set`.
    fn record_hit(&self, paths: &EntryPaths, read: &EntryMetadata) {
        let current = read_file_limited(&paths.meta, METADATA_READ_LIMIT_BYTES)
            .and_then(|bytes| metadata::decode(&bytes));
        let Some(mut current) = current else {
            return;
        };
        if current.key != read.key || current.created != read.created || !paths.data.exists() {
            return;
        }

        current.hits = current.hits.max(read.hits);
        current.last_access = read.last_access;
        let written = serde_json::to_vec(&current)
            .map_err(CacheError::from)
            .and_then(|encoded| atomic_write(&paths.meta, &encoded));
        if let Err(err) = written {
            tracing::debug!(
                target: "cairn.cache",
                namespace = %self.namespace,
                path = %paths.meta.display(),
                error = %err,
                "failed to record cache hit"
            );
        }
    }

    fn decode_value<T: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> Option<T> {
        match serde_json::from_slice(bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                // A type mismatch means the caller asked for the wrong shape;
                // anything else means the file itself is damaged.
                let corrupt = !matches!(err.classify(), serde_json::error::Category::Data);
                tracing::debug!(
                    target: "cairn.cache",
                    namespace = %self.namespace,
                    corrupt,
                    error = %CacheError::from(err),
                    "failed to decode cache value; treating as miss"
                );
                if corrupt {
                    remove_entry_files(&self.entry_paths(key), "lookup.corrupt_data");
                }
                None
            }
        }
    }

    /// Every `*.cache.meta` file in the namespace with its decoded contents.
    /// Corrupt metadata yields `None` and is removed together with its data.
    fn scan_metadata(&self) -> Vec<(PathBuf, Option<EntryMetadata>)> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::debug!(
                        target: "cairn.cache",
                        dir = %self.dir.display(),
                        error = %err,
                        "failed to list cache namespace"
                    );
                }
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !file_name(&path).is_some_and(|name| name.ends_with(META_SUFFIX)) {
                continue;
            }
            let Some(bytes) = read_file_limited(&path, METADATA_READ_LIMIT_BYTES) else {
                continue;
            };
            let meta = metadata::decode(&bytes);
            if meta.is_none() {
                tracing::debug!(
                    target: "cairn.cache",
                    path = %path.display(),
                    "removing corrupt cache metadata"
                );
                remove_entry_files(&paths_from_meta_path(&path), "scan.corrupt_metadata");
            }
            out.push((path, meta));
        }
        out
    }
}

fn write_entry(paths: &EntryPaths, data: &[u8], meta: &EntryMetadata) -> Result<(), CacheError> {
    let meta_bytes = serde_json::to_vec(meta)?;
    let staged_data = StagedFile::write(&paths.data, data)?;
    let staged_meta = StagedFile::write(&paths.meta, &meta_bytes)?;
    // Data first: metadata is what makes an entry visible to readers.
    staged_data.commit()?;
    staged_meta.commit()
}

/// Metadata goes first so a reader never finds metadata pointing at missing data.
fn remove_entry_files(paths: &EntryPaths, reason: &'static str) -> bool {
    let meta_removed = remove_file_best_effort(&paths.meta, reason);
    let data_removed = remove_file_best_effort(&paths.data, reason);
    meta_removed && data_removed
}

fn paths_from_meta_path(meta_path: &Path) -> EntryPaths {
    let data = match file_name(meta_path).and_then(|name| name.strip_suffix(".meta")) {
        Some(data_name) => meta_path.with_file_name(data_name),
        None => meta_path.to_path_buf(),
    };
    EntryPaths {
        data,
        meta: meta_path.to_path_buf(),
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
