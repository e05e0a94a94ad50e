use super::{key_for, rg_available, Fixture};
use cairn_cache::CacheService;
use cairn_config::{CacheConfig, SearchConfig};
use cairn_search::{MatchSource, SearchEngine, SearchError, SearchOptions};
use std::collections::BTreeSet;
use std::time::Duration;

#[tokio::test]
async fn cached_file_is_reported_exactly_once() {
    if !rg_available() {
        return;
    }
    let fx = Fixture::new();
    let a = fx.write_disk("a.txt", "hello cache world\n");
    fx.write_disk("sub/b.txt", "no cache here\ncache again\n");
    fx.cache_file(&key_for(&a), "hello cache world");

    let response = fx
        .engine()
        .combined_search("cache", &SearchOptions::default())
        .await
        .unwrap();

    let for_a: Vec<_> = response.matches.iter().filter(|m| m.path == "a.txt").collect();
    assert_eq!(for_a.len(), 1);
    assert_eq!(for_a[0].source, MatchSource::Cache);

    let for_b: Vec<_> = response
        .matches
        .iter()
        .filter(|m| m.path == "sub/b.txt")
        .collect();
    assert_eq!(for_b.len(), 2);
    assert!(for_b.iter().all(|m| m.source == MatchSource::Disk));
    assert_eq!(for_b[1].line_number, 2);

    assert_eq!(response.stats.cache_hits, 1);
    assert_eq!(response.stats.disk_hits, 2);
    assert_eq!(response.stats.total_matches, 3);
}

#[tokio::test]
async fn differently_spelled_keys_still_deduplicate() {
    if !rg_available() {
        return;
    }
    let fx = Fixture::new();
    fx.write_disk("docs/x.md", "cache\n");
    fx.write_disk("odd[1].txt", "cache\n");
    fx.cache_file("./docs/x.md", "cache");
    fx.cache_file("file:odd[1].txt", "cache");

    let response = fx
        .engine()
        .combined_search("cache", &SearchOptions::default().literal())
        .await
        .unwrap();

    let mut paths: Vec<_> = response.matches.iter().map(|m| m.path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, ["docs/x.md", "odd[1].txt"]);
    assert_eq!(response.stats.disk_hits, 0);
}

#[tokio::test]
async fn file_cached_under_two_spellings_is_reported_once() {
    let fx = Fixture::new();
    let a = fx.write_disk("a.txt", "hello cache world\n");
    fx.cache_file(&key_for(&a), "hello cache world");
    std::thread::sleep(Duration::from_millis(5));
    fx.cache_file("./a.txt", "hello cache world, again");

    let response = fx
        .engine()
        .with_rg_path(fx.root.join("no-such-rg"))
        .combined_search("cache", &SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(response.matches.len(), 1, "{:?}", response.matches);
    let found = &response.matches[0];
    assert_eq!(found.path, "a.txt");
    assert_eq!(found.key.as_deref(), Some("./a.txt"));
    assert_eq!(found.line_text, "hello cache world, again");
    assert_eq!(response.stats.cache_hits, 1);
}

#[tokio::test]
async fn disk_results_are_capped() {
    if !rg_available() {
        return;
    }
    let fx = Fixture::new();
    for i in 0..30 {
        fx.write_disk(&format!("f{i:02}.txt"), "needle\nneedle\n");
    }

    let opts = SearchOptions {
        max_disk_results: 5,
        ..SearchOptions::default()
    };
    let found = fx
        .engine()
        .search_on_disk("needle", &BTreeSet::new(), &opts)
        .await
        .unwrap();
    assert_eq!(found.len(), 5);

    let per_file = SearchOptions {
        max_matches_per_file: 1,
        ..SearchOptions::default()
    };
    let found = fx
        .engine()
        .search_on_disk("needle", &BTreeSet::new(), &per_file)
        .await
        .unwrap();
    assert_eq!(found.len(), 30);
}

#[tokio::test]
async fn explicit_excludes_accept_absolute_paths() {
    if !rg_available() {
        return;
    }
    let fx = Fixture::new();
    let a = fx.write_disk("a.txt", "needle\n");
    fx.write_disk("b.txt", "needle\n");

    let exclude = BTreeSet::from([a.to_string_lossy().into_owned()]);
    let found = fx
        .engine()
        .search_on_disk("needle", &exclude, &SearchOptions::default())
        .await
        .unwrap();
    let paths: Vec<_> = found.iter().map(|m| m.path.as_str()).collect();
    assert_eq!(paths, ["b.txt"]);
}

#[tokio::test]
async fn missing_search_tool_degrades_to_cache_results() {
    let fx = Fixture::new();
    fx.write_disk("disk-only.txt", "cache\n");
    fx.cache_file("/tmp/a.txt", "hello cache world");

    let engine = fx.engine().with_rg_path(fx.root.join("no-such-rg"));
    let response = engine
        .combined_search("cache", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(response.stats.cache_hits, 1);
    assert_eq!(response.stats.disk_hits, 0);
    assert_eq!(response.matches.len(), 1);
}

#[tokio::test]
async fn invalid_regex_is_reported() {
    let fx = Fixture::new();
    let err = fx
        .engine()
        .combined_search("(unclosed", &SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::InvalidPattern(_)));

    // The same text as a literal is fine.
    fx.engine()
        .with_rg_path(fx.root.join("no-such-rg"))
        .combined_search("(unclosed", &SearchOptions::default().literal())
        .await
        .unwrap();
}

#[tokio::test]
async fn repeated_queries_are_served_from_result_cache() {
    let fx = Fixture::new();
    fx.cache_file("/tmp/a.txt", "hello cache world");
    let engine = fx
        .engine()
        .with_rg_path(fx.root.join("no-such-rg"))
        .with_result_cache(fx.service.search());

    let first = engine
        .combined_search("cache", &SearchOptions::default())
        .await
        .unwrap();
    assert!(!first.stats.from_result_cache);

    let second = engine
        .combined_search("cache", &SearchOptions::default())
        .await
        .unwrap();
    assert!(second.stats.from_result_cache);
    assert_eq!(second.matches, first.matches);

    let other = engine
        .combined_search("hello", &SearchOptions::default())
        .await
        .unwrap();
    assert!(!other.stats.from_result_cache);
}

#[tokio::test]
async fn engine_from_config_uses_configured_namespace_and_tool() {
    let tmp = tempfile::tempdir().unwrap();
    let service = CacheService::with_root(tmp.path().join("cache"), CacheConfig::default());
    let config = SearchConfig {
        root: Some(tmp.path().to_path_buf()),
        namespace: "docs".to_owned(),
        rg_path: tmp.path().join("no-such-rg"),
        cache_results: true,
        ..SearchConfig::default()
    };
    assert!(service.namespace("docs").set(
        "/elsewhere/readme.md",
        "cache me",
        Default::default()
    ));

    let engine = SearchEngine::from_config(&service, &config);
    let response = engine
        .combined_search("cache", &engine.default_options())
        .await
        .unwrap();
    assert_eq!(response.stats.cache_hits, 1);
    assert!(!service.search().entries().is_empty());
}
