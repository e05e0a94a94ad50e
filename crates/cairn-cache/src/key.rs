use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest of a cache key, stored as lowercase hex and used as the
/// on-disk file stem of the entry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyHash(String);

impl KeyHash {
    pub fn of(key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a cache entry holds, recorded in its metadata when it is written.
///
/// Consumers such as the cache-first search use this tag to decide whether
/// an entry is file content; nothing re-derives it from the key afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    File,
    Config,
    Script,
    Search,
}

pub const FILE_KEY_PREFIX: &str = "file:";
pub const CONFIG_KEY_PREFIX: &str = "config:";
pub const SCRIPT_KEY_PREFIX: &str = "script:";
pub const SEARCH_KEY_PREFIX: &str = "search:";

impl KeyKind {
    /// Classify a key from its shape. Only used at write time, when the
    /// writer did not tag the entry itself.
    pub fn infer(key: &str) -> Self {
        if key.starts_with(FILE_KEY_PREFIX) {
            return KeyKind::File;
        }
        if key.starts_with(CONFIG_KEY_PREFIX) {
            return KeyKind::Config;
        }
        if key.starts_with(SCRIPT_KEY_PREFIX) {
            return KeyKind::Script;
        }
        if key.starts_with(SEARCH_KEY_PREFIX) {
            return KeyKind::Search;
        }
        if looks_like_path(key) {
            return KeyKind::File;
        }
        KeyKind::Config
    }
}

/// Strips a `file:` prefix, returning the path a file key refers to.
pub fn file_key_path(key: &str) -> &str {
    key.strip_prefix(FILE_KEY_PREFIX).unwrap_or(key)
}

fn looks_like_path(key: &str) -> bool {
    if key.is_empty() || key.contains('\n') {
        return false;
    }
    if key.starts_with('/') || key.starts_with("./") || key.starts_with("../") {
        return true;
    }
    if key.starts_with(".\\") || key.starts_with("..\\") || key.starts_with("\\\\") {
        return true;
    }
    if has_drive_prefix(key) {
        return true;
    }

    // `docs/guide.md`, `src\main.rs`: a separator plus an extension on the last segment.
    let has_separator = key.contains('/') || key.contains('\\');
    let last = key.rsplit(['/', '\\']).next().unwrap_or(key);
    has_separator
        && !key.contains(char::is_whitespace)
        && last
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
}

pub(crate) fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}
