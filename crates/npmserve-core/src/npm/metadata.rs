//! Dependency metadata lookup.
//!
//! For one exact package version, produce its registry URL and the exact
//! versions its direct dependencies resolve to. Nothing here is cached;
//! every compile asks again.

use super::error::NpmError;
use super::id::PackageId;
use super::registry::RegistryClient;
use super::version::resolve_version;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use semver::Version;
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// Concurrent packument fetches per lookup.
const LOOKUP_CONCURRENCY: usize = 8;

/// Registry URL and resolved direct dependencies of one package version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    pub registry_url: Url,
    pub dependencies: BTreeMap<String, Version>,
}

impl PackageMetadata {
    #[must_use]
    pub fn dependency(&self, name: &str) -> Option<&Version> {
        self.dependencies.get(name)
    }
}

/// Source of [`PackageMetadata`].
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// Fails with `NPM_REGISTRY_LOOKUP_FAILED` (or a not-found code) when the
    /// package itself cannot be looked up.
    async fn lookup(&self, id: &PackageId) -> Result<PackageMetadata, NpmError>;
}

/// Looks metadata up in the npm registry.
#[derive(Debug, Clone)]
pub struct RegistryLookup {
    client: RegistryClient,
}

impl RegistryLookup {
    #[must_use]
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &RegistryClient {
        &self.client
    }
}

#[async_trait]
impl MetadataLookup for RegistryLookup {
    async fn lookup(&self, id: &PackageId) -> Result<PackageMetadata, NpmError> {
        let packument = self.client.fetch_packument(id.name()).await?;
        let version = id.version().to_string();

        let manifest = packument
            .manifest(&version)
            .ok_or_else(|| NpmError::version_not_found(id.name(), &version))?;

        let ranges = dependency_ranges(manifest);

        let resolved: Vec<(String, Option<Version>)> = stream::iter(ranges)
            .map(|(name, range)| async move {
                let version = match self.client.fetch_packument(&name).await {
                    Ok(packument) => match resolve_version(&packument, &range) {
                        Ok(version) => Some(version),
                        Err(e) => {
                            tracing::warn!(dependency = %name, %range, error = %e, "dropping unresolvable dependency");
                            None
                        }
                    },
                    Err(e) => {
                        tracing::warn!(dependency = %name, error = %e, "dropping dependency, lookup failed");
                        None
                    }
                };
                (name, version)
            })
            .buffer_unordered(LOOKUP_CONCURRENCY)
            .collect()
            .await;

        let dependencies = resolved
            .into_iter()
            .filter_map(|(name, version)| Some((name, version?)))
            .collect();

        Ok(PackageMetadata {
            registry_url: self.client.base_url().clone(),
            dependencies,
        })
    }
}

/// Declared dependency ranges of a version manifest. Regular dependencies
/// override peer and optional ones of the same name. Ranges npm resolves
/// outside the registry (`file:`, `git+`, `workspace:` and the like) are
/// left out.
fn dependency_ranges(manifest: &serde_json::Value) -> BTreeMap<String, String> {
    let mut ranges = BTreeMap::new();

    for field in ["peerDependencies", "optionalDependencies", "dependencies"] {
        let Some(deps) = manifest.get(field).and_then(|d| d.as_object()) else {
            continue;
        };
        for (name, range) in deps {
            if let Some(range) = range.as_str().filter(|r| !r.contains(':')) {
                ranges.insert(name.clone(), range.to_string());
            }
        }
    }

    ranges
}

/// In-memory lookup for offline serving and tests.
#[derive(Debug, Clone)]
pub struct StaticLookup {
    registry_url: Url,
    packages: HashMap<String, BTreeMap<String, Version>>,
}

impl StaticLookup {
    #[must_use]
    pub fn new(registry_url: Url) -> Self {
        Self {
            registry_url,
            packages: HashMap::new(),
        }
    }

    /// Register a package and its resolved dependencies.
    pub fn insert<I, N>(&mut self, id: &PackageId, dependencies: I)
    where
        I: IntoIterator<Item = (N, Version)>,
        N: Into<String>,
    {
        self.packages.insert(
            id.canonical(),
            dependencies
                .into_iter()
                .map(|(name, version)| (name.into(), version))
                .collect(),
        );
    }

    /// Builder form of [`StaticLookup::insert`].
    #[must_use]
    pub fn with<I, N>(mut self, id: &PackageId, dependencies: I) -> Self
    where
        I: IntoIterator<Item = (N, Version)>,
        N: Into<String>,
    {
        self.insert(id, dependencies);
        self
    }
}

#[async_trait]
impl MetadataLookup for StaticLookup {
    async fn lookup(&self, id: &PackageId) -> Result<PackageMetadata, NpmError> {
        let dependencies = self.packages.get(&id.canonical()).ok_or_else(|| {
            NpmError::registry(format!("No metadata registered for {id}"))
        })?;

        Ok(PackageMetadata {
            registry_url: self.registry_url.clone(),
            dependencies: dependencies.clone(),
        })
    }
}
