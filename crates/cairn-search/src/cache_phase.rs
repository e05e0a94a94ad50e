use crate::pattern::LinePattern;
use crate::{MatchSource, SearchMatch};
use cairn_cache::path::canonical_path;
use cairn_cache::{file_key_path, KeyKind, PersistentCache};
use serde_json::Value;
use std::collections::BTreeSet;

/// Scans every file entry of `cache`. Non-file entries are skipped by the
/// kind recorded when they were written. The total is unbounded; each file
/// contributes at most `max_per_file` matching lines (0 = no cap).
///
/// Keys that canonicalize to the same path are one file: only the most
/// recently written readable entry for it is searched. Files come out newest
/// first.
pub(crate) fn scan(
    cache: &PersistentCache,
    pattern: &LinePattern,
    root: &str,
    max_per_file: usize,
) -> Vec<SearchMatch> {
    let mut files: Vec<_> = cache
        .entries()
        .into_iter()
        .filter(|meta| meta.kind == KeyKind::File)
        .collect();
    files.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.key.cmp(&b.key)));

    let mut out = Vec::new();
    let mut seen = BTreeSet::new();
    let mut scanned = 0usize;
    let mut shadowed = 0usize;

    for meta in files {
        let path = canonical_path(file_key_path(&meta.key), Some(root));
        if seen.contains(&path) {
            shadowed += 1;
            continue;
        }
        // `peek` so scanning does not inflate hit counts.
        let Some(value) = cache.peek::<Value>(&meta.key) else {
            continue;
        };
        scanned += 1;
        seen.insert(path.clone());

        let content = extract_content(value);
        let before = out.len();
        for (idx, line) in content.lines().enumerate() {
            if max_per_file > 0 && out.len() - before >= max_per_file {
                break;
            }
            let submatches = pattern.submatches(line);
            let Some(first) = submatches.first() else {
                continue;
            };
            out.push(SearchMatch {
                path: path.clone(),
                key: Some(meta.key.clone()),
                line_number: idx as u64 + 1,
                column: first.start,
                matched_text: first.text.clone(),
                line_text: line.to_owned(),
                submatches,
                source: MatchSource::Cache,
            });
        }
    }

    tracing::debug!(
        target: "cairn.search",
        namespace = cache.namespace(),
        scanned,
        shadowed,
        matches = out.len(),
        "cache phase finished"
    );
    out
}

/// Searchable text of a cached value: the string itself, its `content`
/// field, or the JSON rendering of anything else.
pub(crate) fn extract_content(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Object(mut map) => match map.remove("content") {
            Some(Value::String(text)) => text,
            Some(other) => {
                map.insert("content".to_owned(), other);
                Value::Object(map).to_string()
            }
            None => Value::Object(map).to_string(),
        },
        other => other.to_string(),
    }
}
