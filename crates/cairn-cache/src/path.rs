//! Canonical path forms shared by every cairn component.
//!
//! The same file can reach the cache as an absolute path, a `./`-relative
//! path, or a Windows drive-letter path, and ripgrep reports yet another form.
//! Everything that compares paths goes through [`canonical_path`] first.

use crate::key::has_drive_prefix;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a local filesystem path: drops `.` segments and
/// resolves `..` against preceding segments.
///
/// This does not hit the filesystem and does not resolve symlinks.
pub fn normalize_local_path(path: &Path) -> PathBuf {
    let mut prefix: Option<OsString> = None;
    let mut has_root = false;
    let mut stack: Vec<OsString> = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(prefix_component) => {
                prefix = Some(prefix_component.as_os_str().to_owned());
            }
            Component::RootDir => has_root = true,
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(last) = stack.last() {
                    if last != ".." {
                        stack.pop();
                        continue;
                    }
                }

                if !has_root {
                    stack.push(OsString::from(".."));
                }
            }
            Component::Normal(segment) => stack.push(segment.to_owned()),
        }
    }

    let mut out = PathBuf::new();
    match (prefix, has_root) {
        (Some(mut prefix), true) => {
            prefix.push(std::path::MAIN_SEPARATOR.to_string());
            out.push(prefix);
        }
        (Some(prefix), false) => out.push(prefix),
        (None, true) => out.push(std::path::MAIN_SEPARATOR.to_string()),
        (None, false) => {}
    }
    out.extend(stack);
    out
}

/// Makes `path` absolute against the current directory and normalizes it.
pub fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    Ok(normalize_local_path(&std::path::absolute(path)?))
}

/// The cache key under which the contents of `path` are stored.
///
/// `path` should already be absolute (see [`absolute_path`]).
pub fn file_cache_key(path: &Path) -> String {
    canonical_path(&path.to_string_lossy(), None)
}

/// Canonical string form of a path.
///
/// - backslashes become `/`
/// - a Windows drive letter is lower-cased
/// - `.` segments and leading `./` disappear, `..` is resolved lexically
/// - when `root` is given and the path lies under it, the result is relative
///   to `root`
pub fn canonical_path(path: &str, root: Option<&str>) -> String {
    let normalized = normalize_slashes(path);
    let Some(root) = root else {
        return normalized;
    };
    let root = normalize_slashes(root);
    strip_root(&normalized, &root).unwrap_or(normalized)
}

fn strip_root(path: &str, root: &str) -> Option<String> {
    if root.is_empty() {
        return None;
    }
    if root == "/" {
        return path
            .strip_prefix('/')
            .filter(|rest| !rest.is_empty())
            .map(str::to_owned);
    }
    path.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_owned)
}

fn normalize_slashes(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let (mut out, rest) = if has_drive_prefix(&replaced) {
        let drive = replaced[..1].to_ascii_lowercase();
        (format!("{drive}:"), &replaced[2..])
    } else {
        (String::new(), replaced.as_str())
    };

    let absolute = rest.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if stack.last().is_some_and(|last| *last != "..") {
                    stack.pop();
                } else if !absolute {
                    stack.push("..");
                }
            }
            segment => stack.push(segment),
        }
    }

    if absolute {
        out.push('/');
    }
    out.push_str(&stack.join("/"));
    out
}
