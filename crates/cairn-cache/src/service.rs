use crate::persistent::{ClearReport, PersistentCache};
use cairn_config::{CacheConfig, ConfigError};
use std::path::{Path, PathBuf};

pub const FILES_NAMESPACE: &str = "files";
pub const SEARCH_NAMESPACE: &str = "search";
pub const CONFIG_NAMESPACE: &str = "config";

/// Entry point to the on-disk cache: owns the cache root and the per-namespace
/// limits, and hands out [`PersistentCache`] handles.
#[derive(Clone, Debug)]
pub struct CacheService {
    root: PathBuf,
    config: CacheConfig,
}

impl CacheService {
    /// Builds a service from config, resolving the root (env override, config, home dir).
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        let root = config.resolve_root()?;
        tracing::debug!(target: "cairn.cache", root = %root.display(), "cache root resolved");
        Ok(Self { root, config })
    }

    /// Builds a service rooted at `root`, ignoring any root in `config`.
    pub fn with_root(root: impl Into<PathBuf>, config: CacheConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cache handle for `namespace`. Characters that cannot appear in a single
    /// directory name are replaced with `_`.
    pub fn namespace(&self, namespace: &str) -> PersistentCache {
        let dir_name = sanitize_namespace(namespace);
        PersistentCache::new(&self.root, &dir_name, self.config.namespace(namespace))
    }

    pub fn files(&self) -> PersistentCache {
        self.namespace(FILES_NAMESPACE)
    }

    pub fn search(&self) -> PersistentCache {
        self.namespace(SEARCH_NAMESPACE)
    }

    /// Clears every namespace directory under the root.
    pub fn clear_all(&self) -> ClearReport {
        let mut total = ClearReport::default();
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return total;
        };
        for entry in entries.flatten() {
            if !entry.file_type().is_ok_and(|ty| ty.is_dir()) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let report = self.namespace(&name).clear();
            total.cleared += report.cleared;
            total.errors += report.errors;
        }
        total
    }
}

fn sanitize_namespace(namespace: &str) -> String {
    let cleaned: String = namespace
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".repeat(cleaned.len().max(1)),
        _ => cleaned,
    }
}
