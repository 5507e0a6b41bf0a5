//! Resolving npm dependency ranges to exact versions.

use super::error::NpmError;
use super::registry::Packument;
use semver::{Version, VersionReq};

/// Resolve a dependency range against a packument.
///
/// - an exact version is returned as-is if published
/// - a dist-tag (`latest`, `next`) resolves to the tagged version
/// - anything else is an npm range, resolved to the highest satisfying
///   version; prereleases only match comparators that name one
///
/// # Errors
/// Returns `NPM_VERSION_NOT_FOUND` if nothing satisfies the range.
pub fn resolve_version(packument: &Packument, range: &str) -> Result<Version, NpmError> {
    let name = packument.name();
    let range = range.trim();
    let published: Vec<&str> = packument.versions().collect();

    if published.contains(&range) {
        if let Ok(exact) = Version::parse(range) {
            return Ok(exact);
        }
    }

    let tag = if range.is_empty() { "latest" } else { range };
    if let Some(tagged) = packument.dist_tag(tag) {
        return Version::parse(tagged).map_err(|_| NpmError::version_not_found(name, range));
    }

    let reqs = parse_range(range).ok_or_else(|| NpmError::version_not_found(name, range))?;

    published
        .iter()
        .filter_map(|v| Version::parse(v).ok())
        .filter(|v| reqs.iter().any(|req| req.matches(v)))
        .max()
        .ok_or_else(|| NpmError::version_not_found(name, range))
}

/// Parse an npm range into its `||` alternatives. Alternatives that do not
/// parse are skipped; `None` if none parse.
fn parse_range(range: &str) -> Option<Vec<VersionReq>> {
    let reqs: Vec<VersionReq> = range
        .split("||")
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .filter_map(|alt| VersionReq::parse(&to_semver_req(alt)).ok())
        .collect();

    (!reqs.is_empty()).then_some(reqs)
}

/// Rewrite one npm range alternative into `semver` comparator syntax.
fn to_semver_req(alt: &str) -> String {
    // "1.0.0 - 2.0.0"
    if let Some((start, end)) = alt.split_once(" - ") {
        return format!(">={}, <={}", start.trim(), end.trim());
    }

    if matches!(alt, "*" | "x" | "X" | "latest") {
        return "*".to_string();
    }

    // ">= 2.1.2 < 3.0.0": operators may be detached, comparators are
    // separated by whitespace
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for token in alt.split_whitespace() {
        if token.chars().any(|c| c.is_ascii_digit() || c == 'x' || c == 'X' || c == '*') {
            comparators.push(format!("{pending_op}{}", wildcard_segments(token)));
            pending_op.clear();
        } else {
            pending_op.push_str(token);
        }
    }

    if comparators.is_empty() {
        alt.to_string()
    } else {
        comparators.join(", ")
    }
}

/// `1.x` and `1.2.X` become `1.*` and `1.2.*`; prerelease tags are kept.
fn wildcard_segments(token: &str) -> String {
    token
        .split('.')
        .map(|segment| if matches!(segment, "x" | "X") { "*" } else { segment })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packument(versions: &[&str], latest: &str) -> Packument {
        let versions_obj: serde_json::Map<String, serde_json::Value> = versions
            .iter()
            .map(|v| ((*v).to_string(), serde_json::json!({ "version": v })))
            .collect();

        Packument::from_value(serde_json::json!({
            "name": "test-pkg",
            "dist-tags": { "latest": latest, "next": "3.0.0-rc.1" },
            "versions": versions_obj
        }))
    }

    fn resolve(versions: &[&str], range: &str) -> Result<String, NpmError> {
        let latest = versions.last().copied().unwrap_or("0.0.0");
        resolve_version(&make_packument(versions, latest), range).map(|v| v.to_string())
    }

    #[test]
    fn test_exact_version() {
        assert_eq!(resolve(&["1.0.0", "2.0.0"], "1.0.0").unwrap(), "1.0.0");
    }

    #[test]
    fn test_caret_and_tilde() {
        let versions = ["1.0.0", "1.0.5", "1.5.0", "2.0.0", "2.5.0"];
        assert_eq!(resolve(&versions, "^1.0.0").unwrap(), "1.5.0");
        assert_eq!(resolve(&versions, "~1.0.0").unwrap(), "1.0.5");
        assert_eq!(resolve(&versions, "2").unwrap(), "2.5.0");
    }

    #[test]
    fn test_dist_tags() {
        let versions = ["1.0.0", "2.0.0", "3.0.0-rc.1"];
        let packument = make_packument(&versions, "2.0.0");
        assert_eq!(resolve_version(&packument, "latest").unwrap().to_string(), "2.0.0");
        assert_eq!(resolve_version(&packument, "next").unwrap().to_string(), "3.0.0-rc.1");
        assert_eq!(resolve_version(&packument, "").unwrap().to_string(), "2.0.0");
    }

    #[test]
    fn test_or_range() {
        let versions = ["1.2.0", "2.3.0", "3.0.0"];
        assert_eq!(resolve(&versions, "^1.0.0 || ^2.0.0").unwrap(), "2.3.0");
        assert_eq!(resolve(&versions, "garbage || ^1.0.0").unwrap(), "1.2.0");
    }

    #[test]
    fn test_hyphen_x_and_spaced_ranges() {
        let versions = ["1.0.0", "1.2.9", "1.3.0", "2.0.0", "2.2.0", "3.0.0"];
        assert_eq!(resolve(&versions, "1.0.0 - 2.0.0").unwrap(), "2.0.0");
        assert_eq!(resolve(&versions, "1.2.x").unwrap(), "1.2.9");
        assert_eq!(resolve(&versions, "1.x").unwrap(), "1.3.0");
        assert_eq!(resolve(&versions, "*").unwrap(), "3.0.0");
        assert_eq!(resolve(&versions, ">= 1.3.0 < 2.2.0").unwrap(), "2.0.0");
    }

    #[test]
    fn test_prerelease_tag_with_x_is_kept() {
        let versions = ["1.0.0-next.1", "1.0.0"];
        assert_eq!(resolve(&versions, ">=1.0.0-next.1").unwrap(), "1.0.0");
        assert_eq!(wildcard_segments("1.0.0-next.1"), "1.0.0-next.1");
        assert_eq!(wildcard_segments("^1.x"), "^1.*");
    }

    #[test]
    fn test_prerelease_not_matched_by_plain_range() {
        let versions = ["1.0.0", "1.1.0-beta.1"];
        assert_eq!(resolve(&versions, "^1.0.0").unwrap(), "1.0.0");
    }

    #[test]
    fn test_unsatisfiable() {
        let err = resolve(&["1.0.0"], "^5.0.0").unwrap_err();
        assert_eq!(err.code(), crate::npm::error::codes::NPM_VERSION_NOT_FOUND);
        assert!(resolve(&["1.0.0"], "github:user/repo").is_err());
    }
}
