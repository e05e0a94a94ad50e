//! Disk-phase behavior against a shell script standing in for ripgrep, so
//! these run whether or not `rg` is installed. The script ignores its
//! arguments, including the exclude globs.

use super::{key_for, Fixture};
use cairn_search::{MatchSource, SearchOptions};
use serde_json::json;
use std::collections::BTreeSet;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

/// Writes an executable `/bin/sh` script next to the search root.
fn script(fx: &Fixture, name: &str, body: &str) -> PathBuf {
    let path = fx.root.parent().unwrap().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Shell snippet printing `lines` verbatim.
fn print_lines(lines: &[String]) -> String {
    format!("cat <<'END_OF_OUTPUT'\n{}\nEND_OF_OUTPUT\n", lines.join("\n"))
}

fn rg_match(path: &str, line_number: u64, line: &str, needle: &str) -> String {
    let start = line.find(needle).unwrap();
    json!({
        "type": "match",
        "data": {
            "path": {"text": path},
            "lines": {"text": format!("{line}\n")},
            "line_number": line_number,
            "absolute_offset": 0,
            "submatches": [{"match": {"text": needle}, "start": start, "end": start + needle.len()}],
        }
    })
    .to_string()
}

fn rg_begin(path: &str) -> String {
    json!({"type": "begin", "data": {"path": {"text": path}}}).to_string()
}

#[tokio::test]
async fn disk_matches_for_cached_files_are_dropped() {
    let fx = Fixture::new();
    let a = fx.write_disk("a.txt", "hello cache world\n");
    fx.write_disk("b.txt", "more cache\n");
    fx.write_disk("docs/x.md", "cache\n");
    fx.cache_file(&key_for(&a), "hello cache world");
    fx.cache_file("./docs/x.md", "cache");

    let rg = script(
        &fx,
        "rg-stub",
        &print_lines(&[
            rg_begin("./a.txt"),
            rg_match("./a.txt", 1, "hello cache world", "cache"),
            rg_match("./b.txt", 1, "more cache", "cache"),
            rg_match("docs/x.md", 1, "cache", "cache"),
        ]),
    );

    let response = fx
        .engine()
        .with_rg_path(rg)
        .combined_search("cache", &SearchOptions::default())
        .await
        .unwrap();

    let mut seen: Vec<_> = response
        .matches
        .iter()
        .map(|m| (m.path.as_str(), m.source))
        .collect();
    seen.sort_by_key(|(path, _)| *path);
    assert_eq!(
        seen,
        [
            ("a.txt", MatchSource::Cache),
            ("b.txt", MatchSource::Disk),
            ("docs/x.md", MatchSource::Cache),
        ]
    );
    assert_eq!(response.stats.cache_hits, 2);
    assert_eq!(response.stats.disk_hits, 1);
    assert_eq!(response.stats.total_matches, 3);

    let disk = response
        .matches
        .iter()
        .find(|m| m.source == MatchSource::Disk)
        .unwrap();
    assert_eq!(disk.column, 5);
    assert_eq!(disk.line_text, "more cache");
}

#[tokio::test]
async fn abnormal_exit_drops_disk_results() {
    let fx = Fixture::new();
    fx.cache_file("/elsewhere/a.txt", "hello cache world");
    let body = format!(
        "{}exit 2\n",
        print_lines(&[rg_match("./b.txt", 1, "more cache", "cache")])
    );
    let rg = script(&fx, "rg-broken", &body);

    let response = fx
        .engine()
        .with_rg_path(rg)
        .combined_search("cache", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(response.stats.cache_hits, 1);
    assert_eq!(response.stats.disk_hits, 0);
    assert_eq!(response.matches.len(), 1);
}

#[tokio::test]
async fn no_matches_exit_code_is_not_an_error() {
    let fx = Fixture::new();
    let body = format!(
        "{}exit 1\n",
        print_lines(&[rg_match("./b.txt", 4, "cache on line four", "cache")])
    );
    let rg = script(&fx, "rg-exit-one", &body);

    let found = fx
        .engine()
        .with_rg_path(rg)
        .search_on_disk("cache", &BTreeSet::new(), &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].path, "b.txt");
    assert_eq!(found[0].line_number, 4);
}

#[tokio::test]
async fn disk_cap_stops_a_long_running_search() {
    let fx = Fixture::new();
    let lines: Vec<_> = (0..10)
        .map(|i| rg_match(&format!("./f{i}.txt"), 1, "needle", "needle"))
        .collect();
    // Keeps running after its output until it is killed.
    let body = format!("{}exec sleep 30\n", print_lines(&lines));
    let rg = script(&fx, "rg-slow", &body);

    let opts = SearchOptions {
        max_disk_results: 3,
        ..SearchOptions::default()
    };
    let engine = fx.engine().with_rg_path(rg);
    let found = tokio::time::timeout(
        Duration::from_secs(10),
        engine.search_on_disk("needle", &BTreeSet::new(), &opts),
    )
    .await
    .expect("capped search should not wait for the tool to finish")
    .unwrap();

    let paths: Vec<_> = found.iter().map(|m| m.path.as_str()).collect();
    assert_eq!(paths, ["f0.txt", "f1.txt", "f2.txt"]);
}

#[tokio::test]
async fn explicit_excludes_filter_tool_output() {
    let fx = Fixture::new();
    let a = fx.write_disk("a.txt", "needle\n");
    let rg = script(
        &fx,
        "rg-stub",
        &print_lines(&[
            rg_match("./a.txt", 1, "needle", "needle"),
            rg_match("./b.txt", 1, "needle", "needle"),
        ]),
    );

    let exclude = BTreeSet::from([a.to_string_lossy().into_owned()]);
    let found = fx
        .engine()
        .with_rg_path(rg)
        .search_on_disk("needle", &exclude, &SearchOptions::default())
        .await
        .unwrap();
    let paths: Vec<_> = found.iter().map(|m| m.path.as_str()).collect();
    assert_eq!(paths, ["b.txt"]);
}
