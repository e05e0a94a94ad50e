use cairn_config::LockConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock on {path}")]
    Timeout { path: PathBuf, waited: Duration },
}

/// In-process advisory locks keyed by path.
///
/// Serializes writers to the same path within one process. Waiters park on a
/// per-path [`Notify`] and are woken when the holder releases; a waiter that
/// is still blocked after `max_wait` fails with [`LockError::Timeout`].
///
/// There is no fairness between waiters, no reentrancy, and no coordination
/// with other processes.
#[derive(Debug)]
pub struct LockManager {
    max_wait: Duration,
    held: Mutex<HashMap<PathBuf, HeldLock>>,
}

#[derive(Debug)]
struct HeldLock {
    acquired_at: Instant,
    released: Arc<Notify>,
}

/// Releases its path when dropped.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct PathLockGuard<'a> {
    manager: &'a LockManager,
    path: PathBuf,
}

impl PathLockGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.path);
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        Self::with_max_wait(config.max_wait())
    }

    pub fn with_max_wait(max_wait: Duration) -> Self {
        Self {
            max_wait,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Waits until `path` is free, then takes it.
    pub async fn acquire(&self, path: &Path) -> Result<PathLockGuard<'_>, LockError> {
        let started = Instant::now();
        let deadline = started + self.max_wait;

        loop {
            let released = {
                let mut held = self.held();
                match held.get(path) {
                    Some(entry) => Arc::clone(&entry.released),
                    None => {
                        held.insert(
                            path.to_path_buf(),
                            HeldLock {
                                acquired_at: Instant::now(),
                                released: Arc::new(Notify::new()),
                            },
                        );
                        drop(held);
                        let waited = started.elapsed();
                        if !waited.is_zero() {
                            tracing::trace!(
                                target: "cairn.lock",
                                path = %path.display(),
                                ?waited,
                                "acquired contended lock"
                            );
                        }
                        return Ok(PathLockGuard {
                            manager: self,
                            path: path.to_path_buf(),
                        });
                    }
                }
            };

            let notified = released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // The holder may have released between reading the map and
            // registering for the wakeup; only park if it still holds the lock.
            if !self.is_held_by(path, &released) {
                continue;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let waited = started.elapsed();
                tracing::debug!(
                    target: "cairn.lock",
                    path = %path.display(),
                    ?waited,
                    "lock acquisition timed out"
                );
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
        }
    }

    /// Frees `path` and wakes its waiters. Returns whether it was held.
    ///
    /// There is no ownership check: any caller may release any path.
    pub fn release(&self, path: &Path) -> bool {
        let removed = self.held().remove(path);
        match removed {
            Some(entry) => {
                entry.released.notify_waiters();
                true
            }
            None => false,
        }
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.held().contains_key(path)
    }

    /// How long the current holder has had `path`.
    pub fn held_for(&self, path: &Path) -> Option<Duration> {
        self.held()
            .get(path)
            .map(|entry| entry.acquired_at.elapsed())
    }

    fn is_held_by(&self, path: &Path, released: &Arc<Notify>) -> bool {
        self.held()
            .get(path)
            .is_some_and(|entry| Arc::ptr_eq(&entry.released, released))
    }

    fn held(&self) -> MutexGuard<'_, HashMap<PathBuf, HeldLock>> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
