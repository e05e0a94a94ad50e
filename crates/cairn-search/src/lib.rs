//! Cache-first text search.
//!
//! A query runs in two phases. The cache phase scans every file entry of the
//! cache namespace in memory; it costs no I/O beyond reading the entries and
//! is not capped in total. The disk phase runs ripgrep over the search root,
//! excluding every file the cache phase already reported, and is capped at
//! `max_disk_results`.
//!
//! Both phases report paths in one canonical form (see
//! [`cairn_cache::path::canonical_path`]) relative to the search root, which is
//! what makes the exclusion exact: a file found in the cache is reported once,
//! never once per phase.

mod cache_phase;
mod disk;
mod pattern;

use cairn_cache::path::{absolute_path, canonical_path};
use cairn_cache::{
    CacheService, KeyHash, KeyKind, PersistentCache, SetOptions, SEARCH_KEY_PREFIX,
};
use cairn_config::SearchConfig;
use pattern::LinePattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search pattern: {0}")]
    InvalidPattern(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Match the pattern as plain text rather than as a regular expression.
    pub literal: bool,
    pub case_sensitive: bool,
    /// Matching lines reported per file; 0 means no cap.
    pub max_matches_per_file: usize,
    /// Cap on disk-phase matches. The cache phase is not capped.
    pub max_disk_results: usize,
    /// Extra ripgrep `--glob` filters for the disk phase.
    pub globs: Vec<String>,
}

impl SearchOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            literal: false,
            case_sensitive: config.case_sensitive,
            max_matches_per_file: config.max_matches_per_file,
            max_disk_results: config.max_disk_results,
            globs: Vec::new(),
        }
    }

    pub fn literal(mut self) -> Self {
        self.literal = true;
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Cache,
    Disk,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submatch {
    /// Byte offsets into the line.
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// One matching line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// Canonical path, relative to the search root when under it.
    pub path: String,
    /// Cache key the match came from (cache phase only).
    pub key: Option<String>,
    /// 1-based.
    pub line_number: u64,
    /// Byte offset of the first submatch.
    pub column: usize,
    pub matched_text: String,
    pub line_text: String,
    pub submatches: Vec<Submatch>,
    pub source: MatchSource,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    pub cache_hits: usize,
    pub disk_hits: usize,
    pub total_matches: usize,
    pub cache_millis: u64,
    pub disk_millis: u64,
    /// Whether the whole response was served from the result cache.
    pub from_result_cache: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub pattern: String,
    /// Cache-phase matches first, then disk-phase matches.
    pub matches: Vec<SearchMatch>,
    pub stats: SearchStats,
}

#[derive(Clone, Debug)]
pub struct SearchEngine {
    cache: PersistentCache,
    result_cache: Option<PersistentCache>,
    root: PathBuf,
    rg_path: PathBuf,
    defaults: SearchOptions,
}

impl SearchEngine {
    /// Searches the entries of `cache` and the files under `root`.
    pub fn new(cache: PersistentCache, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = absolute_path(root).unwrap_or_else(|_| root.to_path_buf());
        Self {
            cache,
            result_cache: None,
            root,
            rg_path: SearchConfig::default().rg_path,
            defaults: SearchOptions::default(),
        }
    }

    pub fn from_config(service: &CacheService, config: &SearchConfig) -> Self {
        let mut engine = Self::new(service.namespace(&config.namespace), config.resolve_root())
            .with_rg_path(config.rg_path.clone())
            .with_defaults(SearchOptions::from_config(config));
        if config.cache_results {
            engine = engine.with_result_cache(service.search());
        }
        engine
    }

    pub fn with_rg_path(mut self, rg_path: impl Into<PathBuf>) -> Self {
        self.rg_path = rg_path.into();
        self
    }

    pub fn with_defaults(mut self, defaults: SearchOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Serve repeated identical [`Self::combined_search`] calls from `cache`.
    pub fn with_result_cache(mut self, cache: PersistentCache) -> Self {
        self.result_cache = Some(cache);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Options used by callers without preferences of their own.
    pub fn default_options(&self) -> SearchOptions {
        self.defaults.clone()
    }

    /// Cache phase only.
    pub fn search_in_cache(
        &self,
        pattern: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchMatch>, SearchError> {
        let compiled = LinePattern::compile(pattern, opts.literal, opts.case_sensitive)?;
        Ok(cache_phase::scan(
            &self.cache,
            &compiled,
            &self.root_str(),
            opts.max_matches_per_file,
        ))
    }

    /// Disk phase only. `exclude` holds paths in any form; they are
    /// canonicalized against the search root before use.
    pub async fn search_on_disk(
        &self,
        pattern: &str,
        exclude: &BTreeSet<String>,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchMatch>, SearchError> {
        // Validate up front so both phases reject the same patterns.
        LinePattern::compile(pattern, opts.literal, opts.case_sensitive)?;
        let root = self.root_str();
        let excluded: BTreeSet<String> = exclude
            .iter()
            .map(|path| canonical_path(path, Some(&root)))
            .collect();
        Ok(disk::run(&self.rg_path, &self.root, pattern, &excluded, opts).await)
    }

    /// Cache phase, then the disk phase over everything the cache phase did
    /// not report.
    pub async fn combined_search(
        &self,
        pattern: &str,
        opts: &SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        let result_key = self.result_cache.as_ref().map(|_| self.result_key(pattern, opts));
        if let (Some(results), Some(key)) = (&self.result_cache, &result_key) {
            if let Some(mut response) = results.get::<SearchResponse>(key) {
                response.stats.from_result_cache = true;
                tracing::debug!(target: "cairn.search", pattern, "served search from result cache");
                return Ok(response);
            }
        }

        let started = Instant::now();
        let cache_matches = self.search_in_cache(pattern, opts)?;
        let cache_millis = started.elapsed().as_millis() as u64;

        let exclude: BTreeSet<String> = cache_matches.iter().map(|m| m.path.clone()).collect();
        let disk_started = Instant::now();
        let disk_matches = self.search_on_disk(pattern, &exclude, opts).await?;
        let disk_millis = disk_started.elapsed().as_millis() as u64;

        let stats = SearchStats {
            cache_hits: cache_matches.len(),
            disk_hits: disk_matches.len(),
            total_matches: cache_matches.len() + disk_matches.len(),
            cache_millis,
            disk_millis,
            from_result_cache: false,
        };
        let mut matches = cache_matches;
        matches.extend(disk_matches);
        let response = SearchResponse {
            pattern: pattern.to_owned(),
            matches,
            stats,
        };

        tracing::debug!(
            target: "cairn.search",
            pattern,
            cache_hits = stats.cache_hits,
            disk_hits = stats.disk_hits,
            cache_millis,
            disk_millis,
            "combined search finished"
        );

        if let (Some(results), Some(key)) = (&self.result_cache, &result_key) {
            results.set(
                key,
                &response,
                SetOptions::default().with_kind(KeyKind::Search),
            );
        }
        Ok(response)
    }

    fn root_str(&self) -> String {
        canonical_path(&self.root.to_string_lossy(), None)
    }

    fn result_key(&self, pattern: &str, opts: &SearchOptions) -> String {
        let fingerprint = serde_json::json!({
            "pattern": pattern,
            "root": self.root_str(),
            "options": opts,
        });
        format!("{SEARCH_KEY_PREFIX}{}", KeyHash::of(&fingerprint.to_string()))
    }
}
