use crate::key::KeyKind;
use serde::{Deserialize, Serialize};

/// Sidecar record stored next to every cached value (`<hash>.cache.meta`).
///
/// Timestamps are milliseconds since the unix epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// Full, unhashed key. Compared on every read so a hash collision reads as a miss.
    pub key: String,
    pub namespace: String,
    pub kind: KeyKind,
    pub created: u64,
    pub expires: u64,
    pub last_access: u64,
    /// Serialized size of the value in bytes.
    pub size: u64,
    pub hits: u64,
}

impl EntryMetadata {
    pub fn is_expired_at(&self, now_millis: u64) -> bool {
        now_millis > self.expires
    }
}

/// Largest metadata file we are willing to parse; anything bigger is corrupt.
pub(crate) const METADATA_READ_LIMIT_BYTES: u64 = 64 * 1024;

pub(crate) fn decode(bytes: &[u8]) -> Option<EntryMetadata> {
    serde_json::from_slice(bytes).ok()
}
