use crate::error::Error;
use crate::paths::package_cache_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default port of the graph/transform collaborator.
pub const DEFAULT_GRAPH_SERVER: &str = "http://localhost:3000/";

/// Process-level configuration for the npmserve CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// Configuration of the module server.
///
/// Every field has a default, so a config file only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeConfig {
    /// Project root.
    pub root_dir: PathBuf,

    /// Directory request paths on the catch-all route are resolved against.
    /// Falls back to `root_dir`.
    pub dev_server_root: Option<PathBuf>,

    pub host: String,
    pub port: u16,

    /// Base URL of the graph/transform service.
    pub graph_server: String,

    /// Root of the on-disk package store.
    pub package_cache: Option<PathBuf>,

    /// Never download packages missing from the store.
    pub offline: bool,

    /// Fail a package compile that takes longer than this.
    pub compile_timeout_secs: Option<u64>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            dev_server_root: None,
            host: "localhost".to_string(),
            port: 8000,
            graph_server: DEFAULT_GRAPH_SERVER.to_string(),
            package_cache: None,
            offline: false,
            compile_timeout_secs: None,
        }
    }
}

impl ServeConfig {
    /// Create a config rooted at `root_dir`.
    #[must_use]
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            root_dir,
            ..Default::default()
        }
    }

    /// Load a config file. Relative directories inside it are resolved
    /// against the file's own directory.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self = serde_json::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.root_dir = absolutize(base, &config.root_dir);
        config.dev_server_root = config.dev_server_root.map(|dir| absolutize(base, &dir));
        config.package_cache = config.package_cache.map(|dir| absolutize(base, &dir));

        Ok(config)
    }

    /// Directory the catch-all route serves from.
    #[must_use]
    pub fn dev_server_root(&self) -> &Path {
        self.dev_server_root.as_deref().unwrap_or(&self.root_dir)
    }

    /// Root of the package store.
    #[must_use]
    pub fn package_cache(&self) -> PathBuf {
        self.package_cache.clone().unwrap_or_else(package_cache_dir)
    }

    #[must_use]
    pub fn compile_timeout(&self) -> Option<Duration> {
        self.compile_timeout_secs.map(Duration::from_secs)
    }

    /// Parsed base URL of the graph/transform service.
    pub fn graph_server_url(&self) -> Result<Url, Error> {
        Url::parse(&self.graph_server).map_err(|source| Error::InvalidUrl {
            input: self.graph_server.clone(),
            source,
        })
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
