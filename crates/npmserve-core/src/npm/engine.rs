//! The seam between the compile cache and a bundling engine.
//!
//! An engine receives entry points plus an [`ImportResolver`] and emits
//! the built files of one package. Every import it meets is offered to the
//! resolver first; only what comes back as [`Resolution::File`] or
//! [`Resolution::Virtual`] (or is left [`Resolution::Unhandled`] and
//! resolved by the engine itself inside the package) ends up in the output.

use super::error::NpmError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Answer of an [`ImportResolver`] for one import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Bundle this file from the package being built.
    File(PathBuf),
    /// Leave the import in place, pointing at this URL.
    External(String),
    /// Bundle a synthesized module. `path` is its output path relative to
    /// the package.
    Virtual { path: String, code: String },
    /// Not the resolver's business; the engine resolves it.
    Unhandled,
}

/// Resolution rules an engine consults during one build.
#[async_trait]
pub trait ImportResolver: Send + Sync {
    /// An error fails the whole build.
    async fn resolve(&self, specifier: &str, importer: &Path) -> Result<Resolution, NpmError>;
}

/// Input of one package build.
pub struct BuildRequest<'a> {
    pub package_dir: &'a Path,
    /// `./`-prefixed entry targets, relative to `package_dir`.
    pub entry_points: Vec<String>,
    /// Absolute URL path under which output files are served, ending in `/`.
    pub public_base: String,
    pub resolver: &'a dyn ImportResolver,
}

/// A built file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Path relative to the package, `/`-separated, no leading `./`.
    pub path: String,
    pub contents: String,
    /// BLAKE3 hash of `contents`, hex encoded.
    pub hash: String,
}

impl OutputFile {
    #[must_use]
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        let contents = contents.into();
        let hash = blake3::hash(contents.as_bytes()).to_hex().to_string();
        Self {
            path: path.into(),
            contents,
            hash,
        }
    }
}

/// Result of one package build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    pub files: Vec<OutputFile>,
    /// Entry target (as given in the request) to the output path built
    /// from it.
    pub entries: BTreeMap<String, String>,
}

/// A bundling engine.
#[async_trait]
pub trait BundleEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn build(&self, request: BuildRequest<'_>) -> Result<BuildOutput, NpmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_file_hash_is_content_addressed() {
        let a = OutputFile::new("a.js", "export default 1;");
        let b = OutputFile::new("b.js", "export default 1;");
        let c = OutputFile::new("a.js", "export default 2;");
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
        assert_eq!(a.hash.len(), 64);
    }
}
