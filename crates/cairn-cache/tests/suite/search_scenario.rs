use super::new_cache;
use cairn_cache::{KeyKind, SetOptions};
use serde_json::json;

#[test]
fn file_records_are_enumerable_as_file_entries() {
    let (_tmp, cache) = new_cache(60_000, 1024);
    assert!(cache.set(
        "/tmp/a.txt",
        &json!({"content": "hello cache world", "timestamp": 1000}),
        SetOptions::default()
    ));
    assert!(cache.set("theme", "dark", SetOptions::default()));

    let files: Vec<_> = cache
        .entries()
        .into_iter()
        .filter(|meta| meta.kind == KeyKind::File)
        .map(|meta| meta.key)
        .collect();
    assert_eq!(files, ["/tmp/a.txt"]);
}
