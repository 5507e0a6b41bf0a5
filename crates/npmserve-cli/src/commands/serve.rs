//! `npmserve serve` command implementation.
//!
//! ```text
//! GET /@npm/<package>/<version>[/<file>]   → 307 to the compiled file of that export
//! GET /@npm-src/<package>/<version>/<path> → a compiled file
//! GET /@module/error/<message>             → a module that throws <message>
//! GET /@module/<url>                       → any module, via the transform service
//! GET /<path>                              → a file under the dev server root, via the transform service
//! ```

use axum::{
    extract::{Path as AxumPath, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use miette::{IntoDiagnostic, Result};
use npmserve_core::npm::{
    codes, CachedPackageStore, NpmCompiler, NpmError, PackageId, RegistryClient, RegistryLookup,
    UnbundledEngine,
};
use npmserve_core::paths::{is_traversal, normalize_request_path};
use npmserve_core::urls::{error_module_source, export_id_from_file, npm_src_url, percent_decode};
use npmserve_core::version::version_string;
use npmserve_core::{ServeConfig, TransformClient};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use url::Url;

const JAVASCRIPT: &str = "text/javascript";
const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub compiler: NpmCompiler,
    pub transform: TransformClient,
    /// Absolute directory catch-all paths resolve against.
    pub dev_server_root: PathBuf,
}

/// The npm compiler a config describes: registry lookups, the on-disk
/// package store and the unbundled engine.
pub fn build_compiler(config: &ServeConfig) -> Result<NpmCompiler> {
    let registry = RegistryClient::npmjs().into_diagnostic()?;
    let root = config.package_cache();
    let store = if config.offline {
        CachedPackageStore::offline(root)
    } else {
        CachedPackageStore::new(root, registry.clone())
    };

    Ok(NpmCompiler::new(
        Arc::new(RegistryLookup::new(registry)),
        Arc::new(store),
        Arc::new(UnbundledEngine::new()),
    )
    .with_timeout(config.compile_timeout()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/@npm/:package/:version", get(serve_npm_root))
        .route("/@npm/:package/:version/*file", get(serve_npm_export))
        .route("/@npm-src/:package/:version/*path", get(serve_npm_src))
        .route("/@module/error/:message", get(serve_error_module))
        .route("/@module/:id", get(serve_module))
        .fallback(serve_local)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

pub async fn run(config: ServeConfig) -> Result<()> {
    let compiler = build_compiler(&config)?;
    let transform = TransformClient::new(config.graph_server_url().into_diagnostic()?).into_diagnostic()?;

    let mut dev_server_root = config.dev_server_root().to_path_buf();
    if dev_server_root.is_relative() {
        dev_server_root = std::env::current_dir().into_diagnostic()?.join(dev_server_root);
    }

    let state = AppState {
        compiler: compiler.clone(),
        transform,
        dev_server_root,
    };

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .into_diagnostic()?;
    let addr = listener.local_addr().into_diagnostic()?;

    tracing::info!(
        %addr,
        root = %state.dev_server_root.display(),
        package_cache = %config.package_cache().display(),
        graph_server = %config.graph_server,
        offline = config.offline,
        "module server listening"
    );
    println!();
    println!("  npmserve running at http://{}:{}", config.host, addr.port());
    println!("  Press Ctrl+C to stop");
    println!();

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    let stats = compiler.stats();
    tracing::info!(
        compiled = stats.compiled,
        failed = stats.failed,
        in_flight = stats.in_flight,
        "module server stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn serve_index() -> impl IntoResponse {
    (StatusCode::OK, [(header::CONTENT_TYPE, PLAIN_TEXT)], version_string())
}

async fn serve_npm_root(
    State(state): State<AppState>,
    AxumPath((package, version)): AxumPath<(String, String)>,
) -> Response {
    redirect_to_export(&state, &package, &version, "").await
}

async fn serve_npm_export(
    State(state): State<AppState>,
    AxumPath((package, version, file)): AxumPath<(String, String, String)>,
) -> Response {
    redirect_to_export(&state, &package, &version, &file).await
}

async fn redirect_to_export(state: &AppState, package: &str, version: &str, file: &str) -> Response {
    let id = match PackageId::parse(package, version) {
        Ok(id) => id,
        Err(e) => return npm_error_response(&e),
    };
    let compiled = match state.compiler.get_compiled(&id).await {
        Ok(compiled) => compiled,
        Err(e) => return npm_error_response(&e),
    };

    let export = export_id_from_file(file);
    match compiled.export_path(&export) {
        Some(path) => Redirect::temporary(&npm_src_url(&id, &path)).into_response(),
        None => text(
            StatusCode::NOT_FOUND,
            format!("{id} does not export '{export}'"),
        ),
    }
}

async fn serve_npm_src(
    State(state): State<AppState>,
    AxumPath((package, version, path)): AxumPath<(String, String, String)>,
) -> Response {
    let id = match PackageId::parse(&package, &version) {
        Ok(id) => id,
        Err(e) => return npm_error_response(&e),
    };
    let compiled = match state.compiler.get_compiled(&id).await {
        Ok(compiled) => compiled,
        Err(e) => return npm_error_response(&e),
    };

    match compiled.file(&path) {
        Some(file) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, JAVASCRIPT),
                (header::CACHE_CONTROL, "no-store"),
            ],
            file.contents.clone(),
        )
            .into_response(),
        None => text(StatusCode::NOT_FOUND, format!("{id} has no file '{path}'")),
    }
}

async fn serve_error_module(AxumPath(message): AxumPath<String>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, JAVASCRIPT),
            (header::CACHE_CONTROL, "no-store"),
        ],
        error_module_source(&message),
    )
        .into_response()
}

async fn serve_module(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> Response {
    match Url::parse(&id) {
        Ok(url) => transform(&state, &url).await,
        Err(e) => text(StatusCode::BAD_REQUEST, format!("Invalid module URL '{id}': {e}")),
    }
}

async fn serve_local(State(state): State<AppState>, uri: Uri) -> Response {
    let requested = percent_decode(uri.path());
    let normalized = normalize_request_path(&requested);

    if is_traversal(&normalized) {
        tracing::warn!(requested = %requested, normalized = %normalized, "path traversal attempt");
        return text(StatusCode::FORBIDDEN, "Access denied".to_string());
    }

    match Url::from_file_path(state.dev_server_root.join(&normalized)) {
        Ok(url) => transform(&state, &url).await,
        Err(()) => text(StatusCode::NOT_FOUND, format!("Not found: /{normalized}")),
    }
}

async fn transform(state: &AppState, module: &Url) -> Response {
    match state.transform.transform_module(module).await {
        Ok(Some(code)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, JAVASCRIPT),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            code,
        )
            .into_response(),
        Ok(None) => text(StatusCode::NOT_FOUND, format!("Not found: {module}")),
        Err(e) => {
            tracing::warn!(module = %module, error = %e, "transform service failed");
            text(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

fn npm_error_response(err: &NpmError) -> Response {
    let status = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_upstream() {
        StatusCode::BAD_GATEWAY
    } else if err.code() == codes::NPM_SPECIFIER_MALFORMED {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    text(status, err.to_string())
}

fn text(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, PLAIN_TEXT)], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Query;
    use axum::http::Request;
    use axum::Json;
    use npmserve_core::npm::StaticLookup;
    use npmserve_core::urls::module_url;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn spawn_transform_service() -> Url {
        async fn handler(
            Query(q): Query<HashMap<String, String>>,
        ) -> std::result::Result<Json<serde_json::Value>, StatusCode> {
            match q.get("module") {
                Some(module) if module.ends_with("/main.ts") => Ok(Json(serde_json::json!({
                    "result": { "code": format!("// {module}\nexport const main = 1;\n") }
                }))),
                _ => Err(StatusCode::NOT_FOUND),
            }
        }

        let app = Router::new().route("/api/v1/transform/module", get(handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    async fn test_app() -> (TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("npm/registry.npmjs.org/app/1.0.0");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(
            pkg.join("package.json"),
            r#"{"name":"app","version":"1.0.0","exports":{".":"./index.js","./util":"./util.js"}}"#,
        )
        .unwrap();
        std::fs::write(pkg.join("index.js"), "export * from './util.js';\n").unwrap();
        std::fs::write(pkg.join("util.js"), "export const util = 1;\n").unwrap();

        let lookup = StaticLookup::new(Url::parse("https://registry.npmjs.org/").unwrap()).with(
            &PackageId::parse("app", "1.0.0").unwrap(),
            Vec::<(String, semver::Version)>::new(),
        );
        let compiler = NpmCompiler::new(
            Arc::new(lookup),
            Arc::new(CachedPackageStore::offline(dir.path().join("npm"))),
            Arc::new(UnbundledEngine::new()),
        );

        let state = AppState {
            compiler,
            transform: TransformClient::new(spawn_transform_service().await).unwrap(),
            dev_server_root: dir.path().join("site"),
        };
        (dir, router(state))
    }

    async fn get_path(app: &Router, path: &str) -> (StatusCode, HashMap<String, String>, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_npm_root_redirects_to_compiled_entry() {
        let (_dir, app) = test_app().await;
        let (status, headers, _) = get_path(&app, "/@npm/app/1.0.0").await;
        assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(headers["location"], "/@npm-src/app/1.0.0/index.js");
    }

    #[tokio::test]
    async fn test_npm_subpath_redirects() {
        let (_dir, app) = test_app().await;
        let (status, headers, _) = get_path(&app, "/@npm/app/1.0.0/util").await;
        assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(headers["location"], "/@npm-src/app/1.0.0/util.js");

        let (status, _, body) = get_path(&app, "/@npm/app/1.0.0/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("./nope"));
    }

    #[tokio::test]
    async fn test_npm_src_serves_compiled_files() {
        let (_dir, app) = test_app().await;
        let (status, headers, body) = get_path(&app, "/@npm-src/app/1.0.0/index.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["content-type"], "text/javascript");
        assert_eq!(headers["cache-control"], "no-store");
        assert_eq!(body, "export * from '/@npm-src/app/1.0.0/util.js';\n");

        let (status, _, _) = get_path(&app, "/@npm-src/app/1.0.0/missing.js").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_npm_error_statuses() {
        let (_dir, app) = test_app().await;

        let (status, _, body) = get_path(&app, "/@npm/app/not-a-version").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("NPM_SPECIFIER_MALFORMED: "));

        let (status, _, body) = get_path(&app, "/@npm/unknown/1.0.0").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.starts_with("NPM_REGISTRY_LOOKUP_FAILED: "));
    }

    #[tokio::test]
    async fn test_error_module() {
        let (_dir, app) = test_app().await;
        let (status, headers, body) = get_path(&app, "/@module/error/boom%20%22here%22").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["content-type"], "text/javascript");
        assert!(body.contains(r#"throw new Error("boom \"here\"");"#));
    }

    #[tokio::test]
    async fn test_module_route() {
        let (_dir, app) = test_app().await;

        let (status, _, body) = get_path(&app, &module_url("file:///app/main.ts")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("// file:///app/main.ts"));

        let (status, _, _) = get_path(&app, "/@module/not%20a%20url").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = get_path(&app, &module_url("file:///app/other.ts")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_local_files_go_through_transform() {
        let (dir, app) = test_app().await;
        let (status, headers, body) = get_path(&app, "/src/./lib/../main.ts").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["content-type"], "text/javascript");
        let expected = Url::from_file_path(dir.path().join("site/src/main.ts")).unwrap();
        assert!(body.contains(expected.as_str()));

        let (status, _, _) = get_path(&app, "/src/missing.ts").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_traversal_is_forbidden() {
        let (_dir, app) = test_app().await;
        for path in ["/src/../../etc/passwd", "/%2E%2E/secret", "/.env"] {
            let (status, _, body) = get_path(&app, path).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{path}");
            assert_eq!(body, "Access denied");
        }
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let (_dir, app) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/@npm-src/app/1.0.0/util.js")
                    .header(header::ORIGIN, "http://example.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
