//! npm registry client.

use super::error::NpmError;
use crate::version::user_agent;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Where package metadata and tarballs come from.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP access to an npm registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
}

impl RegistryClient {
    pub fn npmjs() -> Result<Self, NpmError> {
        Self::new(DEFAULT_REGISTRY)
    }

    /// A client for the registry at `base_url`. Package names are joined
    /// onto it, so a missing trailing `/` is added.
    pub fn new(base_url: &str) -> Result<Self, NpmError> {
        let mut url = Url::parse(base_url)
            .map_err(|e| NpmError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;
        if !url.path().ends_with('/') {
            let with_slash = format!("{}/", url.path());
            url.set_path(&with_slash);
        }

        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(user_agent())
            .build()
            .map_err(|e| NpmError::registry(format!("Cannot build HTTP client: {e}")))?;

        Ok(Self { base_url: url, http })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The underlying HTTP client, shared with tarball downloads.
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// `GET <registry>/<name>`. A 404 is `NPM_PACKAGE_NOT_FOUND`.
    pub async fn fetch_packument(&self, name: &str) -> Result<Packument, NpmError> {
        // @scope%2Fname
        let path = match name.strip_prefix('@') {
            Some(scoped) => format!("@{}", scoped.replacen('/', "%2F", 1)),
            None => name.to_string(),
        };
        let url = self
            .base_url
            .join(&path)
            .map_err(|e| NpmError::registry(format!("Bad packument URL for '{name}': {e}")))?;

        tracing::debug!(package = name, %url, "GET packument");
        let response = self.http.get(url).send().await?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Err(NpmError::not_found(name)),
            status if !status.is_success() => Err(NpmError::registry(format!(
                "Registry answered {status} for '{name}'"
            ))),
            _ => response
                .json()
                .await
                .map(Packument::from_value)
                .map_err(|e| NpmError::registry(format!("Unreadable packument for '{name}': {e}"))),
        }
    }
}

/// A package's registry document: dist-tags plus one manifest per
/// published version.
#[derive(Debug, Clone, PartialEq)]
pub struct Packument(serde_json::Value);

impl Packument {
    #[must_use]
    pub fn from_value(value: serde_json::Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.0.get("name").and_then(serde_json::Value::as_str).unwrap_or("unknown")
    }

    /// Version a dist-tag such as `latest` points at.
    #[must_use]
    pub fn dist_tag(&self, tag: &str) -> Option<&str> {
        self.0.get("dist-tags")?.get(tag)?.as_str()
    }

    /// Manifest of one published version.
    #[must_use]
    pub fn manifest(&self, version: &str) -> Option<&serde_json::Value> {
        self.0.get("versions")?.get(version)
    }

    #[must_use]
    pub fn tarball_url(&self, version: &str) -> Option<&str> {
        self.manifest(version)?.get("dist")?.get("tarball")?.as_str()
    }

    /// Published version strings, in document order.
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.0
            .get("versions")
            .and_then(serde_json::Value::as_object)
            .into_iter()
            .flat_map(|versions| versions.keys().map(String::as_str))
    }
}
