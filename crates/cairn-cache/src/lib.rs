//! Persistent, namespaced key/value cache shared by cairn's file access and
//! search layers.
//!
//! ## On-disk layout
//!
//! Everything lives under the cache root (see [`CacheService`]):
//! - `<root>/<namespace>/<sha256(key)>.cache`: the JSON-serialized value
//! - `<root>/<namespace>/<sha256(key)>.cache.meta`: [`EntryMetadata`]
//!   (`key`, `namespace`, `kind`, `created`, `expires`, `lastAccess`, `size`, `hits`)
//!
//! Both files are written as `*.tmp.<pid>.<n>` and renamed into place.
//!
//! Expiry is lazy: expired entries are deleted when a read, [`PersistentCache::stats`],
//! [`PersistentCache::entries`] or [`PersistentCache::prune`] comes across them.
//!
//! The crate also provides [`LockManager`], the in-process per-path lock used
//! to serialize writers, and the canonical path forms in [`path`].

mod error;
mod key;
mod lock;
mod metadata;
pub mod path;
mod persistent;
mod service;
mod util;

pub use error::CacheError;
pub use key::{
    file_key_path, KeyHash, KeyKind, CONFIG_KEY_PREFIX, FILE_KEY_PREFIX, SCRIPT_KEY_PREFIX,
    SEARCH_KEY_PREFIX,
};
pub use lock::{LockError, LockManager, PathLockGuard};
pub use metadata::EntryMetadata;
pub use persistent::{
    CacheStats, ClearReport, PersistentCache, PruneReport, SetOptions, DEFAULT_STATS_TOP_N,
};
pub use service::{CacheService, CONFIG_NAMESPACE, FILES_NAMESPACE, SEARCH_NAMESPACE};
pub use util::{atomic_write, now_millis, system_time_millis, StagedFile};
