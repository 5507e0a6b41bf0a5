//! `package.json` parsing and export map construction.
//!
//! The raw `exports` value is validated into [`ExportsField`] first, then
//! resolved into an [`ExportMap`] of export id to relative target path.

use super::error::NpmError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Conditions in the order they are tried. The first present condition
/// whose value resolves to a path wins.
pub const CONDITION_PRIORITY: &[&str] = &[
    "import", "module", "browser", "deno", "require", "node", "main", "default",
];

/// Legacy entry fields, tried in order when there is no `exports` field.
pub const LEGACY_ENTRY_FIELDS: &[&str] = &["module", "browser", "main"];

/// The subset of `package.json` this crate reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub main: Option<Value>,
    #[serde(default)]
    pub module: Option<Value>,
    #[serde(default)]
    pub browser: Option<Value>,
    #[serde(default)]
    pub exports: Option<Value>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub optional_dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Parse a manifest from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, NpmError> {
        serde_json::from_value(value)
            .map_err(|e| NpmError::manifest_invalid(format!("Invalid package.json: {e}")))
    }

    /// Read `<package_dir>/package.json`.
    pub fn load(package_dir: &Path) -> Result<Self, NpmError> {
        let path = package_dir.join("package.json");
        let text = std::fs::read_to_string(&path).map_err(|e| {
            NpmError::manifest_invalid(format!("Failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            NpmError::manifest_invalid(format!("Invalid {}: {e}", path.display()))
        })
    }

    /// Build the export map for this manifest.
    pub fn export_map(&self) -> Result<ExportMap, NpmError> {
        ExportMap::from_manifest(self)
    }
}

/// A validated export target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    Path(String),
    Fallbacks(Vec<ExportTarget>),
    Conditions(Vec<(String, ExportTarget)>),
    /// An object met while walking the root conditions that declares
    /// subpaths of its own. The subpaths register as exports when the walk
    /// reaches them; the conditions beside them resolve the target.
    Entries {
        subpaths: Vec<(String, ExportTarget)>,
        conditions: Vec<(String, ExportTarget)>,
    },
    Null,
}

/// A validated top-level `exports` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportsField {
    /// A string, array or conditions object: the `.` export.
    Root(ExportTarget),
    /// An object whose keys are all export subpaths.
    Subpaths(Vec<(String, ExportTarget)>),
    /// An object with both subpath and condition keys. The conditions
    /// give the `.` export when no `.` subpath is declared.
    Mixed {
        subpaths: Vec<(String, ExportTarget)>,
        conditions: Vec<(String, ExportTarget)>,
    },
}

/// Where a target sits: subpath keys are fatal below an export subpath.
#[derive(Debug, Clone, Copy)]
enum Scope<'a> {
    Root,
    Subpath(&'a str),
}

type Pairs = Vec<(String, ExportTarget)>;

impl ExportsField {
    /// Validate a raw `exports` value.
    pub fn parse(value: &Value) -> Result<Self, NpmError> {
        let Value::Object(map) = value else {
            return Ok(Self::Root(ExportTarget::parse_in(value, Scope::Root)?));
        };

        let (subpaths, conditions) = parse_object(map, Scope::Root)?;

        Ok(match (subpaths.is_empty(), conditions.is_empty()) {
            (true, _) => Self::Root(ExportTarget::Conditions(conditions)),
            (false, true) => Self::Subpaths(subpaths),
            (false, false) => Self::Mixed {
                subpaths,
                conditions,
            },
        })
    }

    /// Resolve every reachable export into `found`, returning the target the
    /// root conditions produce.
    fn collect(&self, found: &mut Vec<(String, String)>) -> Option<String> {
        match self {
            Self::Root(target) => target.walk(found),
            Self::Subpaths(subpaths) => {
                report_subpaths(subpaths, found);
                None
            }
            Self::Mixed {
                subpaths,
                conditions,
            } => {
                report_subpaths(subpaths, found);
                resolve_conditions(conditions, found)
            }
        }
    }
}

/// Split an object into its subpath and condition entries.
fn parse_object(
    map: &serde_json::Map<String, Value>,
    scope: Scope<'_>,
) -> Result<(Pairs, Pairs), NpmError> {
    let mut subpaths = Vec::new();
    let mut conditions = Vec::new();

    for (key, target) in map {
        if key.starts_with('.') {
            if let Scope::Subpath(parent) = scope {
                return Err(NpmError::nested_exports(parent, key));
            }
            subpaths.push((key.clone(), ExportTarget::parse_in(target, Scope::Subpath(key))?));
        } else {
            conditions.push((key.clone(), ExportTarget::parse_in(target, scope)?));
        }
    }

    Ok((subpaths, conditions))
}

fn report_subpaths(subpaths: &[(String, ExportTarget)], found: &mut Vec<(String, String)>) {
    for (id, target) in subpaths {
        if let Some(path) = target.walk(found) {
            found.push((id.clone(), path));
        }
    }
}

fn resolve_conditions(
    conditions: &[(String, ExportTarget)],
    found: &mut Vec<(String, String)>,
) -> Option<String> {
    CONDITION_PRIORITY.iter().find_map(|wanted| {
        conditions
            .iter()
            .find(|(cond, _)| cond == wanted)
            .and_then(|(_, target)| target.walk(found))
    })
}

impl ExportTarget {
    /// Validate a target nested under export subpath `parent`. Subpath keys
    /// are not allowed anywhere below it.
    pub fn parse(value: &Value, parent: &str) -> Result<Self, NpmError> {
        Self::parse_in(value, Scope::Subpath(parent))
    }

    fn parse_in(value: &Value, scope: Scope<'_>) -> Result<Self, NpmError> {
        match value {
            Value::String(s) => Ok(Self::Path(s.clone())),
            Value::Null => Ok(Self::Null),
            Value::Array(items) => items
                .iter()
                .map(|item| Self::parse_in(item, scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Fallbacks),
            Value::Object(map) => {
                let (subpaths, conditions) = parse_object(map, scope)?;
                if subpaths.is_empty() {
                    Ok(Self::Conditions(conditions))
                } else {
                    Ok(Self::Entries {
                        subpaths,
                        conditions,
                    })
                }
            }
            Value::Bool(_) | Value::Number(_) => {
                let parent = match scope {
                    Scope::Root => ".",
                    Scope::Subpath(parent) => parent,
                };
                Err(NpmError::manifest_invalid(format!(
                    "Invalid export target for '{parent}': {value}"
                )))
            }
        }
    }

    /// Resolve to a single `./`-prefixed target path, if any.
    #[must_use]
    pub fn resolve(&self) -> Option<String> {
        self.walk(&mut Vec::new())
    }

    /// Resolve like [`Self::resolve`], reporting the subpaths of every
    /// [`Self::Entries`] object the walk passes through into `found`.
    fn walk(&self, found: &mut Vec<(String, String)>) -> Option<String> {
        match self {
            Self::Path(path) => normalize_target(path),
            Self::Fallbacks(items) => items.iter().find_map(|item| item.walk(found)),
            Self::Conditions(conditions) => resolve_conditions(conditions, found),
            Self::Entries {
                subpaths,
                conditions,
            } => {
                report_subpaths(subpaths, found);
                resolve_conditions(conditions, found)
            }
            Self::Null => None,
        }
    }
}

/// Coerce a target to start with `./`. Targets that are empty, absolute,
/// or climb out of the package resolve to nothing.
fn normalize_target(path: &str) -> Option<String> {
    if path.is_empty() || path == "." || path.starts_with('/') {
        return None;
    }

    let normalized = if path.starts_with("./") {
        path.to_string()
    } else {
        format!("./{path}")
    };

    if normalized.split('/').any(|segment| segment == "..") || normalized == "./" {
        return None;
    }

    Some(normalized)
}

/// Mapping from export id (`.`, `./utils`, `./*`) to `./`-prefixed target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportMap {
    entries: BTreeMap<String, String>,
}

impl ExportMap {
    /// Build the export map for a manifest.
    ///
    /// Declared subpaths win over the target the root conditions produce,
    /// which only fills a missing `.`. Without an `exports` field the `.`
    /// export is the first legacy entry field that resolves to a path.
    pub fn from_manifest(manifest: &PackageManifest) -> Result<Self, NpmError> {
        let mut map = Self::default();

        match manifest.exports.as_ref() {
            Some(exports) if !is_absent(exports) => {
                let mut found = Vec::new();
                let root = ExportsField::parse(exports)?.collect(&mut found);
                map.entries.extend(found);
                if let Some(path) = root {
                    map.entries.entry(".".to_string()).or_insert(path);
                }
            }
            _ => {
                let legacy = [&manifest.module, &manifest.browser, &manifest.main];
                if let Some(path) = legacy.iter().find_map(|field| match field {
                    Some(Value::String(s)) => normalize_target(s),
                    _ => None,
                }) {
                    map.entries.insert(".".to_string(), path);
                }
            }
        }

        Ok(map)
    }

    /// Build a map directly from `(id, target)` pairs.
    #[must_use]
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Exact lookup of an export id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    /// Look up an export id, falling back to wildcard patterns.
    ///
    /// Exact ids win. Among matching patterns the one with the longest
    /// prefix before `*` is used.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<String> {
        if let Some(target) = self.get(id) {
            return Some(target.to_string());
        }

        self.entries
            .iter()
            .filter(|(pattern, _)| pattern.matches('*').count() == 1)
            .filter_map(|(pattern, target)| {
                let star = match_pattern(pattern, id)?;
                let resolved = substitute_star(target, &star)?;
                Some((pattern.find('*').unwrap_or(0), pattern.len(), resolved))
            })
            .max_by_key(|(prefix_len, len, _)| (*prefix_len, *len))
            .map(|(_, _, resolved)| resolved)
    }

    /// Targets that become build entry points: no wildcards, no
    /// `package.json`, no stylesheets. Deduplicated, in id order.
    #[must_use]
    pub fn entry_points(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        for (id, target) in &self.entries {
            let skip = id.contains('*')
                || target.contains('*')
                || id.ends_with("package.json")
                || target.ends_with("package.json")
                || id.ends_with(".css")
                || target.ends_with(".css");
            if !skip && !targets.contains(&target.as_str()) {
                targets.push(target);
            }
        }
        targets
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The map as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

/// Export id for a subpath of a bare import: `None` is `.`, `x` is `./x`.
#[must_use]
pub fn export_id(subpath: Option<&str>) -> String {
    match subpath {
        None | Some("") => ".".to_string(),
        Some(sub) => format!("./{}", sub.trim_end_matches('/')),
    }
}

fn is_absent(exports: &Value) -> bool {
    match exports {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Match `subpath` against a pattern with a single `*`, returning the
/// substituted part.
fn match_pattern(pattern: &str, subpath: &str) -> Option<String> {
    let star_pos = pattern.find('*')?;

    let prefix = &pattern[..star_pos];
    let suffix = &pattern[star_pos + 1..];

    if !subpath.starts_with(prefix) || !subpath.ends_with(suffix) {
        return None;
    }

    let start = prefix.len();
    let end = subpath.len() - suffix.len();

    if start >= end {
        return None;
    }

    Some(subpath[start..end].to_string())
}

/// Substitute the matched part into a target with exactly one `*`.
fn substitute_star(target: &str, star_value: &str) -> Option<String> {
    if target.matches('*').count() != 1 {
        return None;
    }

    let result = target.replace('*', star_value);

    if !result.starts_with("./") || result.split('/').any(|segment| segment == "..") {
        return None;
    }

    Some(result)
}
