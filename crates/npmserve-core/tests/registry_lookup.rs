//! Dependency lookup and package download against a mock npm registry.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use npmserve_core::npm::{
    CachedPackageStore, MetadataLookup, NpmCompiler, PackageId, PackageStore, RegistryClient,
    RegistryLookup, UnbundledEngine,
};
use semver::Version;
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tar::Builder;

#[derive(Clone)]
struct MockRegistry {
    base_url: String,
    downloads: Arc<AtomicUsize>,
}

fn create_test_tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = Builder::new(&mut tar_bytes);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(format!("package/{path}")).unwrap();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, contents.as_bytes()).unwrap();
        }
        builder.finish().unwrap();
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

fn version_manifest(registry: &MockRegistry, name: &str, version: &str) -> serde_json::Value {
    json!({
        "name": name,
        "version": version,
        "dist": {
            "tarball": format!("{}{name}/-/{name}-{version}.tgz", registry.base_url)
        }
    })
}

async fn handle_packument(
    Path(name): Path<String>,
    State(registry): State<MockRegistry>,
) -> Response {
    let packument = match name.as_str() {
        "web" => {
            let mut manifest = version_manifest(&registry, "web", "1.0.0");
            manifest["dependencies"] = json!({
                "dep": "^1.0.0",
                "gone": "^1.0.0",
                "local": "file:../local"
            });
            manifest["peerDependencies"] = json!({ "peer": ">=2" });
            json!({
                "name": "web",
                "dist-tags": { "latest": "1.0.0" },
                "versions": { "1.0.0": manifest }
            })
        }
        "dep" => json!({
            "name": "dep",
            "dist-tags": { "latest": "2.0.0" },
            "versions": {
                "1.0.0": version_manifest(&registry, "dep", "1.0.0"),
                "1.2.0": version_manifest(&registry, "dep", "1.2.0"),
                "2.0.0": version_manifest(&registry, "dep", "2.0.0")
            }
        }),
        "peer" => json!({
            "name": "peer",
            "dist-tags": { "latest": "2.1.0" },
            "versions": {
                "2.1.0": version_manifest(&registry, "peer", "2.1.0"),
                "3.0.0-beta.1": version_manifest(&registry, "peer", "3.0.0-beta.1")
            }
        }),
        _ => return (StatusCode::NOT_FOUND, "Not found").into_response(),
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        packument.to_string(),
    )
        .into_response()
}

async fn handle_tarball(
    Path((name, tarball)): Path<(String, String)>,
    State(registry): State<MockRegistry>,
) -> Response {
    let files: &[(&str, &str)] = match (name.as_str(), tarball.as_str()) {
        ("web", "web-1.0.0.tgz") => &[
            (
                "package.json",
                r#"{"name":"web","version":"1.0.0","main":"index.js","dependencies":{"dep":"^1.0.0"}}"#,
            ),
            ("index.js", "import dep from \"dep\";\nexport default dep;\n"),
        ],
        ("dep", "dep-1.2.0.tgz") => &[
            ("package.json", r#"{"name":"dep","version":"1.2.0","main":"index.js"}"#),
            ("index.js", "export default \"dep\";\n"),
        ],
        _ => return (StatusCode::NOT_FOUND, "Not found").into_response(),
    };

    registry.downloads.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/gzip")],
        create_test_tarball(files),
    )
        .into_response()
}

async fn start_mock_registry() -> MockRegistry {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = MockRegistry {
        base_url: format!("http://{addr}/"),
        downloads: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/:name", get(handle_packument))
        .route("/:name/-/:tarball", get(handle_tarball))
        .with_state(registry.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    registry
}

fn id(name: &str, version: &str) -> PackageId {
    PackageId::parse(name, version).unwrap()
}

#[tokio::test]
async fn test_lookup_resolves_direct_dependencies() {
    let registry = start_mock_registry().await;
    let client = RegistryClient::new(&registry.base_url).unwrap();
    let lookup = RegistryLookup::new(client.clone());

    let metadata = lookup.lookup(&id("web", "1.0.0")).await.unwrap();

    assert_eq!(metadata.registry_url, *client.base_url());
    assert_eq!(metadata.dependency("dep"), Some(&Version::new(1, 2, 0)));
    assert_eq!(metadata.dependency("peer"), Some(&Version::new(2, 1, 0)));
    assert_eq!(metadata.dependency("gone"), None);
    assert_eq!(metadata.dependency("local"), None);
    assert_eq!(metadata.dependencies.len(), 2);
}

#[tokio::test]
async fn test_lookup_of_unpublished_version() {
    let registry = start_mock_registry().await;
    let lookup = RegistryLookup::new(RegistryClient::new(&registry.base_url).unwrap());

    let err = lookup.lookup(&id("web", "9.9.9")).await.unwrap_err();
    assert!(err.is_not_found());

    let err = lookup.lookup(&id("nope", "1.0.0")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_store_downloads_once() {
    let registry = start_mock_registry().await;
    let client = RegistryClient::new(&registry.base_url).unwrap();
    let cache = tempfile::tempdir().unwrap();
    let store = CachedPackageStore::new(cache.path().to_path_buf(), client.clone());

    let dir = store.ensure(&id("dep", "1.2.0"), client.base_url()).await.unwrap();
    assert!(dir.join("package.json").is_file());
    assert_eq!(
        std::fs::read_to_string(dir.join("index.js")).unwrap(),
        "export default \"dep\";\n"
    );

    let again = store.ensure(&id("dep", "1.2.0"), client.base_url()).await.unwrap();
    assert_eq!(dir, again);
    assert_eq!(registry.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_store_missing_tarball() {
    let registry = start_mock_registry().await;
    let client = RegistryClient::new(&registry.base_url).unwrap();
    let cache = tempfile::tempdir().unwrap();
    let store = CachedPackageStore::new(cache.path().to_path_buf(), client.clone());

    let err = store.ensure(&id("dep", "1.0.0"), client.base_url()).await.unwrap_err();
    assert!(err.is_upstream());
}

#[tokio::test]
async fn test_compile_from_registry() {
    let registry = start_mock_registry().await;
    let client = RegistryClient::new(&registry.base_url).unwrap();
    let cache = tempfile::tempdir().unwrap();

    let compiler = NpmCompiler::new(
        Arc::new(RegistryLookup::new(client.clone())),
        Arc::new(CachedPackageStore::new(cache.path().to_path_buf(), client)),
        Arc::new(UnbundledEngine::new()),
    );

    let web = compiler.get_compiled(&id("web", "1.0.0")).await.unwrap();
    let index = &web.file("index.js").unwrap().contents;
    assert!(index.contains(r#"from "/@npm-src/dep/1.2.0/index.js""#));

    let stats = compiler.stats();
    assert_eq!(stats.compiled, 2);
    assert_eq!(registry.downloads.load(Ordering::SeqCst), 2);
}
