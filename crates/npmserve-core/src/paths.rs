use crate::version::SCHEMA_VERSION;
use std::path::PathBuf;

/// Get the cache directory for npmserve.
///
/// Uses platform-appropriate locations with versioning:
/// - Linux: `$XDG_CACHE_HOME/npmserve/v{N}` or `~/.cache/npmserve/v{N}`
/// - macOS: `~/Library/Caches/npmserve/v{N}`
/// - Windows: `%LOCALAPPDATA%\npmserve\v{N}`
#[must_use]
pub fn cache_dir() -> PathBuf {
    let base = dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".npmserve-cache"),
                |p| p.join(".cache").join("npmserve"),
            )
        },
        |p| p.join("npmserve"),
    );

    base.join(format!("v{SCHEMA_VERSION}"))
}

/// Default root of the on-disk npm package store.
#[must_use]
pub fn package_cache_dir() -> PathBuf {
    cache_dir().join("npm")
}

/// Lexically normalize a request path into a root-relative path.
///
/// `.` segments and empty segments are dropped and `..` pops the previous
/// segment. A `..` with nothing left to pop is kept, so a path that climbs
/// above the root comes back starting with `..`. The result never has a
/// leading `/`; the root itself normalizes to an empty string.
#[must_use]
pub fn normalize_request_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    segments.join("/")
}

/// Whether a normalized request path would leave the served root or name a
/// hidden entry.
#[must_use]
pub fn is_traversal(normalized: &str) -> bool {
    normalized.starts_with('.')
}
