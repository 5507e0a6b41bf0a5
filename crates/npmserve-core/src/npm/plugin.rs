//! Import resolution rules used while building one package.
//!
//! - the package's own name resolves against its own export map
//! - `node:` imports become `/@node/<name>` placeholders
//! - other bare imports are dependencies: compiled through the same cache
//!   and pointed at the dependency's served file, or at a shim that digs
//!   the subpath out of the dependency's root export
//! - a broken dependency becomes a module that throws, never a failed build

use super::compiler::{CompiledPackage, NpmCompiler};
use super::engine::{ImportResolver, Resolution};
use super::error::NpmError;
use super::id::{split_bare, PackageId};
use super::manifest::{export_id, ExportMap};
use super::metadata::PackageMetadata;
use crate::urls::{error_module_url, node_builtin_url, npm_src_url};
use async_trait::async_trait;
use std::path::Path;

/// Prefix of Node built-in imports.
pub const NODE_BUILTIN_PREFIX: &str = "node:";

/// Directory inside a package's output that holds generated shims.
pub const SHIM_DIR: &str = "_shims";

/// Resolver for the build of `id`.
pub struct DependencyResolver<'a> {
    pub compiler: &'a NpmCompiler,
    pub id: &'a PackageId,
    pub package_dir: &'a Path,
    pub exports: &'a ExportMap,
    pub metadata: &'a PackageMetadata,
    /// Canonical keys of the packages whose builds led here, this one last.
    pub ancestry: &'a [String],
}

impl DependencyResolver<'_> {
    fn resolve_self(&self, subpath: Option<&str>) -> Result<Resolution, NpmError> {
        let id = export_id(subpath);
        match self.exports.resolve(&id) {
            Some(target) => Ok(Resolution::File(self.package_dir.join(target))),
            None => Err(NpmError::self_export_not_found(self.id.name(), &id)),
        }
    }

    fn placeholder(&self, specifier: &str, message: String) -> Resolution {
        tracing::warn!(package = %self.id, import = specifier, "{message}");
        Resolution::External(error_module_url(&message))
    }

    async fn resolve_dependency(&self, specifier: &str, name: &str, subpath: Option<&str>) -> Resolution {
        let Some(version) = self.metadata.dependency(name) else {
            return self.placeholder(
                specifier,
                format!("{} has no resolved version of dependency {name}", self.id),
            );
        };

        let dep_id = match PackageId::new(name, version.clone()) {
            Ok(dep_id) => dep_id,
            Err(e) => return self.placeholder(specifier, e.message().to_string()),
        };

        let key = dep_id.canonical();
        if self.ancestry.contains(&key) {
            let cycle = NpmError::dependency_cycle(self.ancestry, &key);
            return self.placeholder(specifier, cycle.message().to_string());
        }

        let dep = match self.compiler.get_compiled_from(&dep_id, self.ancestry).await {
            Ok(dep) => dep,
            Err(e) => {
                return self.placeholder(specifier, format!("Failed to compile {key}: {e}"));
            }
        };

        let export = export_id(subpath);
        if let Some(path) = dep.export_path(&export) {
            tracing::debug!(package = %self.id, import = specifier, target = %path, "dependency export");
            return Resolution::External(npm_src_url(&dep_id, &path));
        }

        match subpath {
            Some(subpath) => match property_path(subpath) {
                None => self.placeholder(
                    specifier,
                    format!("Import '{specifier}' does not name a path inside {key}"),
                ),
                Some(properties) => match shim(&dep, &properties) {
                    Some(resolution) => resolution,
                    None => self.placeholder(
                        specifier,
                        format!("{key} exports neither '{export}' nor '.'"),
                    ),
                },
            },
            None => self.placeholder(specifier, format!("{key} does not export '.'")),
        }
    }
}

#[async_trait]
impl ImportResolver for DependencyResolver<'_> {
    async fn resolve(&self, specifier: &str, _importer: &Path) -> Result<Resolution, NpmError> {
        let own = self.id.name();
        if let Some(rest) = specifier.strip_prefix(own) {
            if rest.is_empty() {
                return self.resolve_self(None);
            }
            if let Some(subpath) = rest.strip_prefix('/') {
                return self.resolve_self(Some(subpath));
            }
        }

        if let Some(builtin) = specifier.strip_prefix(NODE_BUILTIN_PREFIX) {
            return Ok(Resolution::External(node_builtin_url(builtin)));
        }

        if specifier.starts_with('.') || specifier.starts_with('/') || specifier.contains(':') {
            return Ok(Resolution::Unhandled);
        }

        let Some((name, subpath)) = split_bare(specifier) else {
            return Ok(self.placeholder(specifier, format!("Invalid import specifier '{specifier}'")));
        };

        Ok(self.resolve_dependency(specifier, name, subpath).await)
    }
}

/// Property path of a deep import subpath. Empty and `.` segments are
/// dropped; a `..` segment or an empty result yields `None`.
fn property_path(subpath: &str) -> Option<Vec<&str>> {
    let mut properties: Vec<&str> = subpath
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    if properties.is_empty() || properties.contains(&"..") {
        return None;
    }
    if let Some(last) = properties.last_mut() {
        *last = strip_script_extension(last);
    }
    Some(properties)
}

/// A shim that re-exports `properties` of the dependency's root export,
/// the way CommonJS deep imports behave.
fn shim(dep: &CompiledPackage, properties: &[&str]) -> Option<Resolution> {
    let root = dep.export_path(".")?;
    let root_url = npm_src_url(dep.id(), &root);

    let access: String = properties
        .iter()
        .map(|p| format!("?.[{}]", js_string(p)))
        .collect();

    let code = format!(
        "import * as m from {};\nconst root = m.default ?? m;\nexport default root{access};\n",
        js_string(&root_url)
    );

    Some(Resolution::Virtual {
        path: format!("{SHIM_DIR}/{}/{}.js", dep.id().name(), properties.join("/")),
        code,
    })
}

fn strip_script_extension(segment: &str) -> &str {
    [".js", ".cjs", ".mjs"]
        .iter()
        .find_map(|ext| segment.strip_suffix(ext))
        .filter(|stem| !stem.is_empty())
        .unwrap_or(segment)
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}
