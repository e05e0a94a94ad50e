use super::new_cache;
use cairn_cache::{KeyKind, SetOptions, DEFAULT_STATS_TOP_N};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Nested {
    name: String,
    tags: Vec<String>,
    counts: BTreeMap<String, u32>,
    parent: Option<Box<Nested>>,
}

#[test]
fn values_round_trip_before_expiry() {
    let (_tmp, cache) = new_cache(60_000, 1024 * 1024);

    let nested = Nested {
        name: "backlog".into(),
        tags: vec!["a".into(), "b".into()],
        counts: BTreeMap::from([("open".into(), 3), ("done".into(), 9)]),
        parent: Some(Box::new(Nested {
            name: "root".into(),
            tags: vec![],
            counts: BTreeMap::new(),
            parent: None,
        })),
    };
    assert!(cache.set("config:backlog", &nested, SetOptions::default()));
    assert_eq!(cache.get::<Nested>("config:backlog"), Some(nested));

    let value = json!({"content": "ünïcödé\nlines", "timestamp": 1000, "extra": [1, null, true]});
    assert!(cache.set("/tmp/a.txt", &value, SetOptions::default()));
    assert_eq!(cache.get::<serde_json::Value>("/tmp/a.txt"), Some(value));

    assert!(cache.set("empty", "", SetOptions::default()));
    assert_eq!(cache.get::<String>("empty").as_deref(), Some(""));
}

#[test]
fn oversized_values_are_rejected_without_writing() {
    let (_tmp, cache) = new_cache(60_000, 16);

    let big = "x".repeat(64);
    assert!(!cache.set("big", &big, SetOptions::default()));
    assert_eq!(cache.get::<String>("big"), None);
    assert!(!cache.has("big"));
    assert!(cache.entries().is_empty());

    // Exactly at the limit is accepted: `"` + 14 chars + `"` = 16 bytes.
    assert!(cache.set("fits", &"y".repeat(14), SetOptions::default()));
    assert!(cache.has("fits"));
}

#[test]
fn delete_is_idempotent() {
    let (_tmp, cache) = new_cache(60_000, 1024);
    assert!(cache.delete("never-written"));

    assert!(cache.set("k", "v", SetOptions::default()));
    assert!(cache.delete("k"));
    assert!(!cache.has("k"));
    assert!(cache.delete("k"));
}

#[test]
fn clear_tolerates_missing_directory_and_counts_entries() {
    let (_tmp, cache) = new_cache(60_000, 1024);
    let report = cache.clear();
    assert_eq!((report.cleared, report.errors), (0, 0));

    for i in 0..5 {
        assert!(cache.set(&format!("k{i}"), &i, SetOptions::default()));
    }
    let report = cache.clear();
    assert_eq!((report.cleared, report.errors), (5, 0));
    assert!(cache.entries().is_empty());
}

#[test]
fn corrupt_metadata_reads_as_miss() {
    let (_tmp, cache) = new_cache(60_000, 1024);
    assert!(cache.set("k", "v", SetOptions::default()));

    for entry in std::fs::read_dir(cache.dir()).unwrap() {
        let path = entry.unwrap().path();
        if path.to_string_lossy().ends_with(".meta") {
            std::fs::write(&path, b"\0\0not json").unwrap();
        }
    }

    assert_eq!(cache.get::<String>("k"), None);
    assert!(!cache.has("k"));
    // Writing again recovers.
    assert!(cache.set("k", "v2", SetOptions::default()));
    assert_eq!(cache.get::<String>("k").as_deref(), Some("v2"));
}

#[test]
fn missing_data_file_reads_as_miss() {
    let (_tmp, cache) = new_cache(60_000, 1024);
    assert!(cache.set("k", "v", SetOptions::default()));
    for entry in std::fs::read_dir(cache.dir()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) == Some("cache") {
            std::fs::remove_file(&path).unwrap();
        }
    }
    assert_eq!(cache.get::<String>("k"), None);
    assert!(cache.metadata("k").is_none());
}

#[test]
fn kinds_are_recorded_at_write_time() {
    let (_tmp, cache) = new_cache(60_000, 1024);
    assert!(cache.set("/repo/README.md", "x", SetOptions::default()));
    assert!(cache.set("theme", "dark", SetOptions::default()));
    assert!(cache.set(
        "generated-stub",
        "fn main() {}",
        SetOptions::default().with_kind(KeyKind::Script)
    ));

    assert_eq!(cache.metadata("/repo/README.md").unwrap().kind, KeyKind::File);
    assert_eq!(cache.metadata("theme").unwrap().kind, KeyKind::Config);
    assert_eq!(cache.metadata("generated-stub").unwrap().kind, KeyKind::Script);
}

#[test]
fn stats_lists_top_entries_by_hits() {
    let (_tmp, cache) = new_cache(60_000, 1024);
    for (key, hits) in [("cold", 0), ("warm", 2), ("hot", 5)] {
        assert!(cache.set(key, key, SetOptions::default()));
        for _ in 0..hits {
            assert!(cache.get::<String>(key).is_some());
        }
    }

    let stats = cache.stats(2);
    assert_eq!(stats.items, 3);
    assert_eq!(stats.total_hits, 7);
    assert_eq!(stats.expired, 0);
    let keys: Vec<_> = stats.active.iter().map(|m| m.key.as_str()).collect();
    assert_eq!(keys, ["hot", "warm"]);
    assert_eq!(stats.active[0].hits, 5);

    assert_eq!(cache.stats(DEFAULT_STATS_TOP_N).active.len(), 3);
}

#[test]
fn metadata_file_uses_documented_field_names() {
    let (_tmp, cache) = new_cache(60_000, 1024);
    assert!(cache.set("/tmp/a.txt", "v", SetOptions::default()));
    let meta_path = std::fs::read_dir(cache.dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.to_string_lossy().ends_with(".cache.meta"))
        .unwrap();
    let meta: serde_json::Value =
        serde_json::from_slice(&std::fs::read(meta_path).unwrap()).unwrap();
    for field in ["key", "namespace", "created", "expires", "lastAccess", "size", "hits"] {
        assert!(meta.get(field).is_some(), "missing {field} in {meta}");
    }
    assert_eq!(meta["namespace"], "test");
    assert_eq!(meta["size"], 3);
}
