//! Local package store.
//!
//! Packages live at `<root>/<registry host>/<name>/<version>/`, the layout
//! of Deno's npm cache, so an existing `$DENO_DIR/npm` can serve as root.

use super::error::{codes, NpmError};
use super::id::PackageId;
use super::registry::RegistryClient;
use super::tarball::{download_tarball, extract_tgz_atomic, MAX_TARBALL_SIZE};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use url::Url;

/// Where package sources come from.
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Return the directory holding the unpacked package, fetching it first
    /// if needed.
    async fn ensure(&self, id: &PackageId, registry_url: &Url) -> Result<PathBuf, NpmError>;
}

/// Package store on disk, filled from the registry on demand.
#[derive(Debug, Clone)]
pub struct CachedPackageStore {
    root: PathBuf,
    client: Option<RegistryClient>,
}

impl CachedPackageStore {
    /// A store that downloads missing packages with `client`.
    #[must_use]
    pub fn new(root: PathBuf, client: RegistryClient) -> Self {
        Self {
            root,
            client: Some(client),
        }
    }

    /// A store that only serves what is already on disk.
    #[must_use]
    pub fn offline(root: PathBuf) -> Self {
        Self { root, client: None }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a package, whether or not it exists yet.
    #[must_use]
    pub fn package_dir(&self, id: &PackageId, registry_url: &Url) -> PathBuf {
        let mut dir = self.root.join(registry_dir_name(registry_url));
        for segment in id.name().split('/') {
            dir.push(segment);
        }
        dir.join(id.version().to_string())
    }
}

#[async_trait]
impl PackageStore for CachedPackageStore {
    async fn ensure(&self, id: &PackageId, registry_url: &Url) -> Result<PathBuf, NpmError> {
        let dir = self.package_dir(id, registry_url);

        if dir.join("package.json").is_file() {
            return Ok(dir);
        }

        let Some(client) = &self.client else {
            return Err(NpmError::new(
                codes::NPM_PACKAGE_NOT_FOUND,
                format!("{id} is not in the package cache at {}", self.root.display()),
            ));
        };

        let packument = client.fetch_packument(id.name()).await?;
        let version = id.version().to_string();
        let tarball_url = packument
            .tarball_url(&version)
            .ok_or_else(|| NpmError::version_not_found(id.name(), &version))?;

        tracing::info!(package = %id, url = tarball_url, "downloading package");
        let bytes = download_tarball(client.http(), tarball_url, MAX_TARBALL_SIZE).await?;

        let dest = dir.clone();
        tokio::task::spawn_blocking(move || extract_tgz_atomic(&bytes, &dest))
            .await
            .map_err(|e| NpmError::extract_failed(format!("Extraction task failed: {e}")))??;

        Ok(dir)
    }
}

/// `registry.npmjs.org`, or `host_port` when a port is given.
fn registry_dir_name(registry_url: &Url) -> String {
    let host = registry_url.host_str().unwrap_or("registry");
    match registry_url.port() {
        Some(port) => format!("{host}_{port}"),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn npmjs() -> Url {
        Url::parse("https://registry.npmjs.org/").unwrap()
    }

    #[test]
    fn test_package_dir_layout() {
        let store = CachedPackageStore::offline(PathBuf::from("/cache"));
        let id = PackageId::parse("@scope/pkg", "1.2.3").unwrap();
        assert_eq!(
            store.package_dir(&id, &npmjs()),
            PathBuf::from("/cache/registry.npmjs.org/@scope/pkg/1.2.3")
        );

        let local = Url::parse("http://127.0.0.1:4873/").unwrap();
        let id = PackageId::parse("pkg", "1.0.0").unwrap();
        assert_eq!(
            store.package_dir(&id, &local),
            PathBuf::from("/cache/127.0.0.1_4873/pkg/1.0.0")
        );
    }

    #[tokio::test]
    async fn test_offline_hit_and_miss() {
        let dir = tempdir().unwrap();
        let store = CachedPackageStore::offline(dir.path().to_path_buf());
        let id = PackageId::parse("pkg", "1.0.0").unwrap();

        let err = store.ensure(&id, &npmjs()).await.unwrap_err();
        assert_eq!(err.code(), codes::NPM_PACKAGE_NOT_FOUND);

        let pkg_dir = store.package_dir(&id, &npmjs());
        std::fs::create_dir_all(&pkg_dir).unwrap();
        std::fs::write(pkg_dir.join("package.json"), "{}").unwrap();
        assert_eq!(store.ensure(&id, &npmjs()).await.unwrap(), pkg_dir);
    }
}
