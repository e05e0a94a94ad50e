use crate::{FileAccess, FileAccessError, ReadOptions, ReadOutcome};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Paths read concurrently per round by [`FileAccess::batch_read_chunked`].
pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 50;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub cache_hits: usize,
    pub disk_reads: usize,
}

/// Per-path outcome of a batch read, keyed by the path as the caller passed it.
#[derive(Debug, Default)]
pub struct BatchReadReport {
    pub results: BTreeMap<PathBuf, String>,
    pub errors: BTreeMap<PathBuf, FileAccessError>,
    pub stats: BatchStats,
}

impl BatchReadReport {
    fn record(&mut self, path: PathBuf, outcome: Result<ReadOutcome, FileAccessError>) {
        match outcome {
            Ok(outcome) => {
                if outcome.cached {
                    self.stats.cache_hits += 1;
                } else {
                    self.stats.disk_reads += 1;
                }
                self.results.insert(path, outcome.content);
            }
            Err(err) => {
                self.errors.insert(path, err);
            }
        }
    }

    fn merge(&mut self, other: BatchReadReport) {
        self.results.extend(other.results);
        self.errors.extend(other.errors);
        self.stats.cache_hits += other.stats.cache_hits;
        self.stats.disk_reads += other.stats.disk_reads;
    }
}

#[derive(Debug, Default)]
pub struct BatchWriteReport {
    /// Absolute paths written, in input order.
    pub results: Vec<PathBuf>,
    pub errors: BTreeMap<PathBuf, FileAccessError>,
}

impl FileAccess {
    /// Reads every path concurrently. A failure on one path lands in
    /// `errors` and does not affect the others.
    pub async fn batch_read<P: AsRef<Path>>(
        &self,
        paths: &[P],
        opts: ReadOptions,
    ) -> BatchReadReport {
        let reads = paths.iter().map(|path| async move {
            let path = path.as_ref();
            (path.to_path_buf(), self.read(path, opts).await)
        });

        let mut report = BatchReadReport::default();
        for (path, outcome) in join_all(reads).await {
            report.record(path, outcome);
        }

        tracing::debug!(
            target: "cairn.fs",
            requested = paths.len(),
            cache_hits = report.stats.cache_hits,
            disk_reads = report.stats.disk_reads,
            errors = report.errors.len(),
            "batch read finished"
        );
        report
    }

    /// [`Self::batch_read`] in rounds of `chunk_size` paths, bounding how many
    /// files are in flight at once. A `chunk_size` of zero uses
    /// [`DEFAULT_BATCH_CHUNK_SIZE`].
    pub async fn batch_read_chunked<P: AsRef<Path>>(
        &self,
        paths: &[P],
        opts: ReadOptions,
        chunk_size: usize,
    ) -> BatchReadReport {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_BATCH_CHUNK_SIZE
        } else {
            chunk_size
        };

        let mut report = BatchReadReport::default();
        for chunk in paths.chunks(chunk_size) {
            report.merge(self.batch_read(chunk, opts).await);
        }
        report
    }

    /// Writes files one at a time. Per-path failures are collected, not returned.
    pub async fn batch_write<P, S>(
        &self,
        files: impl IntoIterator<Item = (P, S)>,
    ) -> BatchWriteReport
    where
        P: AsRef<Path>,
        S: AsRef<str>,
    {
        let mut report = BatchWriteReport::default();
        for (path, content) in files {
            let path = path.as_ref();
            match self.write(path, content.as_ref()).await {
                Ok(abs) => report.results.push(abs),
                Err(err) => {
                    tracing::debug!(
                        target: "cairn.fs",
                        path = %path.display(),
                        error = %err,
                        "batch write entry failed"
                    );
                    report.errors.insert(path.to_path_buf(), err);
                }
            }
        }
        report
    }
}
