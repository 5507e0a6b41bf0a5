//! The compile cache.
//!
//! Every `(name, version)` is compiled at most once per process. The first
//! request starts a compile on its own task; concurrent requests for the
//! same package wait on that one compile. Results, failures included, stay
//! cached for the life of the process.

use super::engine::{BuildRequest, BundleEngine, OutputFile};
use super::error::NpmError;
use super::id::PackageId;
use super::manifest::{ExportMap, PackageManifest};
use super::metadata::MetadataLookup;
use super::plugin::DependencyResolver;
use super::store::PackageStore;
use crate::urls::npm_src_base;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Outcome of compiling one package. Cloned out to every waiter.
pub type CompileResult = Result<Arc<CompiledPackage>, NpmError>;

type InFlight = Shared<BoxFuture<'static, CompileResult>>;

/// A compiled package: its export map plus the built files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPackage {
    id: PackageId,
    exports: ExportMap,
    files: BTreeMap<String, OutputFile>,
    entries: BTreeMap<String, String>,
}

impl CompiledPackage {
    /// Assemble a compiled package from a build's output.
    #[must_use]
    pub fn from_parts(
        id: PackageId,
        exports: ExportMap,
        files: Vec<OutputFile>,
        entries: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            exports,
            files: files.into_iter().map(|f| (f.path.clone(), f)).collect(),
            entries,
        }
    }

    #[must_use]
    pub fn id(&self) -> &PackageId {
        &self.id
    }

    #[must_use]
    pub fn exports(&self) -> &ExportMap {
        &self.exports
    }

    /// A built file by package-relative path.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<&OutputFile> {
        let path = path.strip_prefix("./").unwrap_or(path);
        self.files.get(path)
    }

    pub fn files(&self) -> impl Iterator<Item = &OutputFile> {
        self.files.values()
    }

    /// Output path serving export `export_id`, if the package has one.
    #[must_use]
    pub fn export_path(&self, export_id: &str) -> Option<String> {
        let target = self.exports.resolve(export_id)?;
        if let Some(path) = self.entries.get(&target) {
            return Some(path.clone());
        }
        let path = target.strip_prefix("./").unwrap_or(&target);
        self.files.contains_key(path).then(|| path.to_string())
    }
}

/// Counts of cache entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub compiled: usize,
    pub failed: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct CacheState {
    compiled: HashMap<String, CompileResult>,
    in_flight: HashMap<String, InFlight>,
}

struct Inner {
    lookup: Arc<dyn MetadataLookup>,
    store: Arc<dyn PackageStore>,
    engine: Arc<dyn BundleEngine>,
    state: Mutex<CacheState>,
}

impl Inner {
    fn state(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit(&self, key: &str, result: CompileResult) {
        let mut state = self.state();
        state.in_flight.remove(key);
        state.compiled.insert(key.to_string(), result);
    }
}

/// Compiles npm packages on demand, each at most once.
#[derive(Clone)]
pub struct NpmCompiler {
    inner: Arc<Inner>,
    timeout: Option<Duration>,
}

impl NpmCompiler {
    #[must_use]
    pub fn new(
        lookup: Arc<dyn MetadataLookup>,
        store: Arc<dyn PackageStore>,
        engine: Arc<dyn BundleEngine>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                lookup,
                store,
                engine,
                state: Mutex::new(CacheState::default()),
            }),
            timeout: None,
        }
    }

    /// Bound every compile, dependencies included, by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn engine_name(&self) -> &str {
        self.inner.engine.name()
    }

    /// The compiled package for `id`, compiling it on first request.
    pub async fn get_compiled(&self, id: &PackageId) -> CompileResult {
        self.get_compiled_from(id, &[]).await
    }

    /// Like [`get_compiled`](Self::get_compiled), for a compile requested
    /// while building the packages in `ancestry`.
    pub async fn get_compiled_from(&self, id: &PackageId, ancestry: &[String]) -> CompileResult {
        let key = id.canonical();

        let pending = {
            let mut state = self.inner.state();
            if let Some(done) = state.compiled.get(&key) {
                tracing::trace!(package = %key, "compile cache hit");
                return done.clone();
            }
            if let Some(pending) = state.in_flight.get(&key) {
                tracing::debug!(package = %key, "joining in-flight compile");
                pending.clone()
            } else {
                let pending = self.spawn_compile(id.clone(), key.clone(), ancestry);
                state.in_flight.insert(key, pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Counts of compiled, failed and in-flight packages.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state();
        let failed = state.compiled.values().filter(|r| r.is_err()).count();
        CacheStats {
            compiled: state.compiled.len() - failed,
            failed,
            in_flight: state.in_flight.len(),
        }
    }

    /// Start compiling on a detached task. The task commits its result to
    /// the cache even when every waiter has gone away.
    fn spawn_compile(&self, id: PackageId, key: String, ancestry: &[String]) -> InFlight {
        let mut chain = ancestry.to_vec();
        chain.push(key.clone());

        let compiler = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            tracing::info!(package = %task_key, engine = compiler.engine_name(), "compiling");

            let result = match compiler.timeout {
                Some(limit) => match tokio::time::timeout(limit, compiler.compile(&id, &chain)).await {
                    Ok(result) => result,
                    Err(_) => Err(NpmError::compile_timeout(&task_key, limit.as_secs())),
                },
                None => compiler.compile(&id, &chain).await,
            };

            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            match &result {
                Ok(package) => tracing::info!(
                    package = %task_key,
                    files = package.files.len(),
                    elapsed_ms,
                    "compiled"
                ),
                Err(e) => tracing::warn!(package = %task_key, error = %e, elapsed_ms, "compile failed"),
            }

            compiler.inner.commit(&task_key, result.clone());
            result
        });

        let inner = Arc::clone(&self.inner);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    let err = NpmError::build_failed(format!("Compile task for {key} failed: {e}"));
                    inner.commit(&key, Err(err.clone()));
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn compile(&self, id: &PackageId, chain: &[String]) -> CompileResult {
        let metadata = self.inner.lookup.lookup(id).await?;
        let package_dir = self.inner.store.ensure(id, &metadata.registry_url).await?;

        let manifest = PackageManifest::load(&package_dir)?;
        if manifest.name != id.name() {
            return Err(NpmError::name_mismatch(id.name(), &manifest.name));
        }
        let exports = manifest.export_map()?;
        tracing::debug!(package = %id, exports = exports.len(), "export map");

        let resolver = DependencyResolver {
            compiler: self,
            id,
            package_dir: &package_dir,
            exports: &exports,
            metadata: &metadata,
            ancestry: chain,
        };
        let output = self
            .inner
            .engine
            .build(BuildRequest {
                package_dir: &package_dir,
                entry_points: exports.entry_points().into_iter().map(str::to_string).collect(),
                public_base: npm_src_base(id),
                resolver: &resolver,
            })
            .await?;

        Ok(Arc::new(CompiledPackage::from_parts(
            id.clone(),
            exports,
            output.files,
            output.entries,
        )))
    }
}
