use super::Fixture;
use cairn_cache::{KeyKind, SetOptions};
use cairn_search::{MatchSource, SearchOptions};
use serde_json::json;

#[test]
fn finds_cached_file_content() {
    let fx = Fixture::new();
    fx.cache_file("/tmp/a.txt", "hello cache world");

    let matches = fx
        .engine()
        .search_in_cache("cache", &SearchOptions::default())
        .unwrap();

    assert_eq!(matches.len(), 1);
    let found = &matches[0];
    assert_eq!(found.key.as_deref(), Some("/tmp/a.txt"));
    assert_eq!(found.path, "/tmp/a.txt");
    assert_eq!(found.line_number, 1);
    assert_eq!(found.matched_text, "cache");
    assert_eq!(found.column, 6);
    assert_eq!(found.line_text, "hello cache world");
    assert_eq!(found.source, MatchSource::Cache);
}

#[test]
fn non_file_entries_are_never_scanned() {
    let fx = Fixture::new();
    let files = fx.files();
    assert!(files.set("theme", &json!({"content": "cache"}), SetOptions::default()));
    assert!(files.set(
        "generator",
        "cache",
        SetOptions::default().with_kind(KeyKind::Script)
    ));
    assert!(files.set("config:cache", "cache", SetOptions::default()));
    fx.cache_file("file:notes/todo.md", "remember the cache");

    let matches = fx
        .engine()
        .search_in_cache("cache", &SearchOptions::default())
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path, "notes/todo.md");
}

#[test]
fn per_file_cap_applies_but_total_is_unbounded() {
    let fx = Fixture::new();
    fx.cache_file("/data/many.txt", &"cache\n".repeat(10));
    for i in 0..20 {
        fx.cache_file(&format!("/data/f{i}.txt"), "one cache line");
    }

    let opts = SearchOptions {
        max_matches_per_file: 3,
        max_disk_results: 1,
        ..SearchOptions::default()
    };
    let matches = fx.engine().search_in_cache("cache", &opts).unwrap();
    assert_eq!(matches.len(), 23);
    let from_many: Vec<_> = matches
        .iter()
        .filter(|m| m.path == "/data/many.txt")
        .map(|m| m.line_number)
        .collect();
    assert_eq!(from_many, [1, 2, 3]);
}

#[test]
fn keys_under_root_are_reported_relative() {
    let fx = Fixture::new();
    let abs = fx.root.join("src").join("lib.rs");
    fx.cache_file(&super::key_for(&abs), "fn cache() {}");
    fx.cache_file("./docs/guide.md", "Cache usage");

    let opts = SearchOptions::default().case_insensitive();
    let mut paths: Vec<_> = fx
        .engine()
        .search_in_cache("cache", &opts)
        .unwrap()
        .into_iter()
        .map(|m| m.path)
        .collect();
    paths.sort();
    assert_eq!(paths, ["docs/guide.md", "src/lib.rs"]);
}

#[test]
fn scanning_does_not_count_as_cache_hits() {
    let fx = Fixture::new();
    fx.cache_file("/tmp/a.txt", "hello cache world");
    fx.engine()
        .search_in_cache("cache", &SearchOptions::default())
        .unwrap();
    assert_eq!(fx.files().metadata("/tmp/a.txt").unwrap().hits, 0);
}

#[test]
fn raw_string_and_structured_values_are_searchable() {
    let fx = Fixture::new();
    let files = fx.files();
    assert!(files.set(
        "/tmp/raw.txt",
        "line one\nraw cache line",
        SetOptions::default()
    ));
    assert!(files.set(
        "/tmp/data.json",
        &json!({"entries": ["cache"]}),
        SetOptions::default()
    ));

    let matches = fx
        .engine()
        .search_in_cache("cache", &SearchOptions::default())
        .unwrap();
    let raw = matches.iter().find(|m| m.path == "/tmp/raw.txt").unwrap();
    assert_eq!(raw.line_number, 2);
    assert!(matches.iter().any(|m| m.path == "/tmp/data.json"));
}
