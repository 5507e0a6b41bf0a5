//! Built-in engine that serves a package's files one by one.
//!
//! Starting from the entry points it follows every import, asks the
//! resolver about it, and emits each reachable file at its own relative
//! path with import specifiers rewritten to absolute URLs. No code is
//! merged or transformed beyond that; JSON files become modules with a
//! default export.

use super::engine::{BuildOutput, BuildRequest, BundleEngine, OutputFile, Resolution};
use super::error::NpmError;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Suffixes tried, in order, when a module path does not name a file.
pub const PROBE_SUFFIXES: &[&str] = &["", ".js", ".mjs", ".cjs", "/index.js"];

/// `import x from "y"`, `export * from "y"`, `import{a}from"y"`
const STATIC_IMPORT: &str = r#"(?m)(?:^|[;\s}])(?:import|export)\b[^;'"()]*?\bfrom\s*['"]([^'"\r\n]+)['"]"#;
/// `import "y"`
const SIDE_EFFECT_IMPORT: &str = r#"(?m)(?:^|[;\s}])import\s*['"]([^'"\r\n]+)['"]"#;
/// `import("y")`
const DYNAMIC_IMPORT: &str = r#"(?m)(?:^|[^\w$.])import\s*\(\s*['"]([^'"\r\n]+)['"]\s*\)"#;

/// Byte range of an import specifier inside a module's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecifierSpan {
    pub start: usize,
    pub end: usize,
    pub specifier: String,
}

/// Find the string-literal specifiers of static, side-effect and dynamic
/// imports, in source order.
#[must_use]
pub fn scan_specifiers(code: &str) -> Vec<SpecifierSpan> {
    let mut spans: Vec<SpecifierSpan> = Vec::new();

    for pattern in [STATIC_IMPORT, SIDE_EFFECT_IMPORT, DYNAMIC_IMPORT] {
        if let Ok(re) = regex_lite::Regex::new(pattern) {
            for caps in re.captures_iter(code) {
                if let Some(m) = caps.get(1) {
                    spans.push(SpecifierSpan {
                        start: m.start(),
                        end: m.end(),
                        specifier: m.as_str().to_string(),
                    });
                }
            }
        }
    }

    spans.sort_by_key(|span| span.start);
    spans.dedup_by_key(|span| span.start);
    spans
}

/// Whether a specifier is already a URL the browser can load as-is.
fn is_url_like(specifier: &str) -> bool {
    specifier.starts_with('/')
        || specifier.starts_with("data:")
        || specifier.starts_with("blob:")
        || specifier.contains("://")
}

fn is_relative(specifier: &str) -> bool {
    specifier == "." || specifier == ".." || specifier.starts_with("./") || specifier.starts_with("../")
}

/// Resolve a path the way Node resolves a relative import: the path itself,
/// then with each probe suffix.
#[must_use]
pub fn probe(path: &Path) -> Option<PathBuf> {
    let base = path.as_os_str().to_string_lossy();
    let base = base.trim_end_matches('/');

    PROBE_SUFFIXES.iter().find_map(|suffix| {
        let mut candidate = OsString::from(base);
        candidate.push(suffix);
        let candidate = PathBuf::from(candidate);
        candidate.is_file().then_some(candidate)
    })
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// `/`-separated path of `file` relative to `root`, if it is inside.
fn relative_to(root: &Path, file: &Path) -> Option<String> {
    let rel = normalize(file).strip_prefix(normalize(root)).ok()?.to_path_buf();
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

enum Pending {
    File(String),
    Virtual { path: String, code: String },
}

/// The built-in unbundled engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnbundledEngine;

impl UnbundledEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Locate a file to be emitted, relative to the package.
    fn locate(package_dir: &Path, path: &Path, what: &str) -> Result<String, NpmError> {
        let found = probe(path).ok_or_else(|| {
            NpmError::build_failed(format!("Could not resolve {what}: {}", path.display()))
        })?;
        relative_to(package_dir, &found).ok_or_else(|| {
            NpmError::build_failed(format!(
                "{what} resolves outside the package: {}",
                found.display()
            ))
        })
    }

    /// Rewrite one module's imports, queueing what it pulls in.
    async fn rewrite(
        request: &BuildRequest<'_>,
        source_path: &Path,
        code: &str,
        queue: &mut VecDeque<Pending>,
    ) -> Result<String, NpmError> {
        let importer_dir = source_path.parent().unwrap_or(request.package_dir);
        let mut out = String::with_capacity(code.len());
        let mut cursor = 0;

        for span in scan_specifiers(code) {
            if is_url_like(&span.specifier) {
                continue;
            }

            let replacement = match request.resolver.resolve(&span.specifier, source_path).await? {
                Resolution::External(url) => url,
                Resolution::File(path) => {
                    let rel = Self::locate(request.package_dir, &path, &span.specifier)?;
                    queue.push_back(Pending::File(rel.clone()));
                    format!("{}{rel}", request.public_base)
                }
                Resolution::Virtual { path, code } => {
                    let url = format!("{}{path}", request.public_base);
                    queue.push_back(Pending::Virtual { path, code });
                    url
                }
                Resolution::Unhandled if is_relative(&span.specifier) => {
                    let target = importer_dir.join(&span.specifier);
                    let rel = Self::locate(request.package_dir, &target, &span.specifier)?;
                    queue.push_back(Pending::File(rel.clone()));
                    format!("{}{rel}", request.public_base)
                }
                Resolution::Unhandled => {
                    return Err(NpmError::build_failed(format!(
                        "Unresolved import '{}' in {}",
                        span.specifier,
                        source_path.display()
                    )));
                }
            };

            out.push_str(&code[cursor..span.start]);
            out.push_str(&replacement);
            cursor = span.end;
        }

        out.push_str(&code[cursor..]);
        Ok(out)
    }
}

#[async_trait]
impl BundleEngine for UnbundledEngine {
    fn name(&self) -> &str {
        "unbundled"
    }

    async fn build(&self, request: BuildRequest<'_>) -> Result<BuildOutput, NpmError> {
        let mut output = BuildOutput::default();
        let mut queue: VecDeque<Pending> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();

        for target in &request.entry_points {
            let rel = Self::locate(
                request.package_dir,
                &request.package_dir.join(target),
                &format!("entry point '{target}'"),
            )?;
            output.entries.insert(target.clone(), rel.clone());
            queue.push_back(Pending::File(rel));
        }

        while let Some(pending) = queue.pop_front() {
            let (path, source, source_path) = match pending {
                Pending::File(rel) => {
                    let source_path = request.package_dir.join(&rel);
                    if !seen.insert(rel.clone()) {
                        continue;
                    }
                    let source = tokio::fs::read_to_string(&source_path).await.map_err(|e| {
                        NpmError::build_failed(format!("Failed to read {}: {e}", source_path.display()))
                    })?;
                    (rel, source, source_path)
                }
                Pending::Virtual { path, code } => {
                    if !seen.insert(path.clone()) {
                        continue;
                    }
                    let source_path = request.package_dir.join(&path);
                    (path, code, source_path)
                }
            };

            let contents = if path.ends_with(".json") {
                let value: serde_json::Value = serde_json::from_str(&source).map_err(|e| {
                    NpmError::build_failed(format!("Invalid JSON module {path}: {e}"))
                })?;
                format!("export default {value};\n")
            } else {
                Self::rewrite(&request, &source_path, &source, &mut queue).await?
            };

            tracing::trace!(file = %path, bytes = contents.len(), "emitted");
            output.files.push(OutputFile::new(path, contents));
        }

        Ok(output)
    }
}
