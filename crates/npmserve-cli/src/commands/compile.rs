//! `npmserve compile` command implementation.

use super::serve::build_compiler;
use miette::{IntoDiagnostic, Result};
use npmserve_core::npm::{export_id, parse_specifier};
use npmserve_core::urls::{npm_src_url, npm_url};
use npmserve_core::ServeConfig;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct CompiledFile {
    path: String,
    url: String,
    hash: String,
    bytes: usize,
}

#[derive(Serialize)]
struct CompileReport {
    package: String,
    engine: String,
    /// `/@npm/` URL a browser would import.
    url: String,
    export: String,
    export_path: Option<String>,
    files: Vec<CompiledFile>,
}

pub async fn run(
    specifier: &str,
    package_cache: Option<PathBuf>,
    offline: bool,
    json: bool,
) -> Result<()> {
    let (id, subpath) = parse_specifier(specifier).into_diagnostic()?;

    let config = ServeConfig {
        package_cache,
        offline,
        ..ServeConfig::default()
    };
    let compiler = build_compiler(&config)?;
    let compiled = compiler.get_compiled(&id).await.into_diagnostic()?;

    let export = export_id(subpath.as_deref());
    let report = CompileReport {
        package: id.canonical(),
        engine: compiler.engine_name().to_string(),
        url: npm_url(&id, subpath.as_deref()),
        export_path: compiled.export_path(&export),
        export,
        files: compiled
            .files()
            .map(|f| CompiledFile {
                path: f.path.clone(),
                url: npm_src_url(&id, &f.path),
                hash: f.hash.clone(),
                bytes: f.contents.len(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        return Ok(());
    }

    println!("{} ({} files, {} engine)", report.package, report.files.len(), report.engine);
    match &report.export_path {
        Some(path) => println!("  {} -> {}", report.url, npm_src_url(&id, path)),
        None => println!("  {} is not exported", report.export),
    }
    for file in &report.files {
        println!("  {:>8}  {}", file.bytes, file.path);
    }
    Ok(())
}
