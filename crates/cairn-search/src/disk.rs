//! ripgrep-backed disk phase.
//!
//! ripgrep runs from the search root with `--json`, so every reported path is
//! relative to the root and canonicalizes to the same form as cache keys. Any
//! failure of the tool (missing binary, abnormal exit, unreadable output)
//! yields an empty result set.

use crate::{MatchSource, SearchMatch, SearchOptions, Submatch};
use cairn_cache::path::canonical_path;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Arguments for one ripgrep run. `excluded` holds canonical paths relative
/// to the search root; paths outside the root need no glob.
pub(crate) fn build_args(
    pattern: &str,
    excluded: &BTreeSet<String>,
    opts: &SearchOptions,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--json".into(), "--no-config".into()];
    if opts.literal {
        args.push("--fixed-strings".into());
    }
    args.push(if opts.case_sensitive {
        "--case-sensitive".into()
    } else {
        "--ignore-case".into()
    });
    if opts.max_matches_per_file > 0 {
        args.push("--max-count".into());
        args.push(opts.max_matches_per_file.to_string().into());
    }
    for glob in &opts.globs {
        args.push("--glob".into());
        args.push(glob.into());
    }
    for path in excluded {
        if is_outside_root(path) {
            continue;
        }
        args.push("--glob".into());
        args.push(format!("!/{}", escape_glob(path)).into());
    }
    args.push("-e".into());
    args.push(pattern.into());
    args.push(".".into());
    args
}

fn is_outside_root(path: &str) -> bool {
    path.starts_with('/')
        || path.starts_with("../")
        || path == ".."
        || path.as_bytes().get(1) == Some(&b':')
}

/// Wraps glob metacharacters in single-character classes so a path matches
/// only itself.
fn escape_glob(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for ch in path.chars() {
        match ch {
            '*' | '?' | '[' | '{' | '}' => {
                out.push('[');
                out.push(ch);
                out.push(']');
            }
            _ => out.push(ch),
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct RgMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RgMatch {
    path: RgText,
    lines: RgText,
    line_number: Option<u64>,
    #[serde(default)]
    submatches: Vec<RgSubmatch>,
}

/// ripgrep reports non-UTF-8 data as base64 `bytes` instead of `text`.
#[derive(Debug, Deserialize)]
struct RgText {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RgSubmatch {
    #[serde(rename = "match")]
    matched: RgText,
    start: usize,
    end: usize,
}

/// Decodes one line of `rg --json` output. Only `match` messages with
/// UTF-8 paths produce a result.
pub(crate) fn parse_line(line: &[u8], root: &str) -> Option<SearchMatch> {
    let message: RgMessage = serde_json::from_slice(line).ok()?;
    if message.kind != "match" {
        return None;
    }
    let data: RgMatch = serde_json::from_value(message.data).ok()?;
    let path = data.path.text?;
    let line_text = data
        .lines
        .text
        .map(|text| text.trim_end_matches(['\n', '\r']).to_owned())
        .unwrap_or_default();

    let submatches: Vec<Submatch> = data
        .submatches
        .into_iter()
        .map(|sub| Submatch {
            start: sub.start,
            end: sub.end,
            text: sub.matched.text.unwrap_or_default(),
        })
        .collect();
    let (column, matched_text) = submatches
        .first()
        .map(|first| (first.start, first.text.clone()))
        .unwrap_or_default();

    Some(SearchMatch {
        path: canonical_path(&path, Some(root)),
        key: None,
        line_number: data.line_number.unwrap_or(0),
        column,
        matched_text,
        line_text,
        submatches,
        source: MatchSource::Disk,
    })
}

/// Runs ripgrep under `root` and collects up to `opts.max_disk_results`
/// matches, skipping any whose path is in `excluded`.
pub(crate) async fn run(
    rg_path: &Path,
    root: &Path,
    pattern: &str,
    excluded: &BTreeSet<String>,
    opts: &SearchOptions,
) -> Vec<SearchMatch> {
    if opts.max_disk_results == 0 {
        return Vec::new();
    }

    let root_str = canonical_path(&root.to_string_lossy(), None);
    let mut cmd = Command::new(rg_path);
    cmd.args(build_args(pattern, excluded, opts))
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            if err.kind() == io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "cairn.search",
                    rg = %rg_path.display(),
                    "ripgrep not found; skipping disk phase"
                );
            } else {
                tracing::warn!(
                    target: "cairn.search",
                    rg = %rg_path.display(),
                    error = %err,
                    "failed to spawn ripgrep; skipping disk phase"
                );
            }
            return Vec::new();
        }
    };
    let Some(stdout) = child.stdout.take() else {
        return Vec::new();
    };

    let mut lines = BufReader::new(stdout).split(b'\n');
    let mut out = Vec::new();
    let mut capped = false;
    let mut malformed = 0usize;
    loop {
        let line = match lines.next_segment().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(target: "cairn.search", error = %err, "failed to read ripgrep output");
                break;
            }
        };
        if line.is_empty() {
            continue;
        }
        let Some(found) = parse_line(&line, &root_str) else {
            if serde_json::from_slice::<RgMessage>(&line).is_err() {
                malformed += 1;
            }
            continue;
        };
        if excluded.contains(&found.path) {
            continue;
        }
        out.push(found);
        if out.len() >= opts.max_disk_results {
            capped = true;
            break;
        }
    }

    if capped {
        // Enough results; stop ripgrep instead of draining the rest.
        let _ = child.start_kill();
    }
    let status = child.wait().await;

    if malformed > 0 {
        tracing::debug!(target: "cairn.search", malformed, "skipped malformed ripgrep output lines");
    }

    match status {
        Ok(status) if capped || matches!(status.code(), Some(0 | 1)) => {
            tracing::debug!(
                target: "cairn.search",
                matches = out.len(),
                capped,
                "disk phase finished"
            );
            out
        }
        Ok(status) => {
            tracing::warn!(
                target: "cairn.search",
                %status,
                discarded = out.len(),
                "ripgrep exited abnormally; dropping disk results"
            );
            Vec::new()
        }
        Err(err) => {
            tracing::warn!(target: "cairn.search", error = %err, "failed to wait for ripgrep");
            Vec::new()
        }
    }
}
