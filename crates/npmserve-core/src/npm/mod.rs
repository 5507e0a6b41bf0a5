//! On-demand compilation of npm packages into browser-loadable modules.
//!
//! Provides:
//! - Parsing `<name>@<version>[/<subpath>]` specifiers
//! - Reading `package.json` export maps
//! - Resolving dependency versions against the npm registry
//! - Downloading and caching package tarballs
//! - A compile cache that builds each package version once
//! - Import resolution across packages during a build

pub mod compiler;
pub mod engine;
pub mod error;
pub mod id;
pub mod manifest;
pub mod metadata;
pub mod plugin;
pub mod registry;
pub mod store;
pub mod tarball;
pub mod unbundled;
pub mod version;

pub use compiler::{CacheStats, CompileResult, CompiledPackage, NpmCompiler};
pub use engine::{BuildOutput, BuildRequest, BundleEngine, ImportResolver, OutputFile, Resolution};
pub use error::{codes, NpmError};
pub use id::{parse_specifier, split_bare, PackageId};
pub use manifest::{export_id, ExportMap, PackageManifest};
pub use metadata::{MetadataLookup, PackageMetadata, RegistryLookup, StaticLookup};
pub use plugin::DependencyResolver;
pub use registry::{Packument, RegistryClient};
pub use store::{CachedPackageStore, PackageStore};
pub use unbundled::UnbundledEngine;
pub use version::resolve_version;
