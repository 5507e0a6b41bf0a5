//! `npmserve exports` command implementation.

use miette::{IntoDiagnostic, Result};
use npmserve_core::npm::PackageManifest;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct ExportsReport {
    name: String,
    version: String,
    exports: serde_json::Value,
    entry_points: Vec<String>,
}

pub fn run(dir: &Path, json: bool) -> Result<()> {
    let manifest = PackageManifest::load(dir).into_diagnostic()?;
    let exports = manifest.export_map().into_diagnostic()?;

    if json {
        let report = ExportsReport {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            exports: exports.to_json(),
            entry_points: exports.entry_points().into_iter().map(str::to_string).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        return Ok(());
    }

    println!("{}@{}", manifest.name, manifest.version);
    if exports.is_empty() {
        println!("  (no exports)");
    }
    let width = exports.iter().map(|(id, _)| id.len()).max().unwrap_or(0);
    for (id, target) in exports.iter() {
        println!("  {id:<width$}  {target}");
    }
    Ok(())
}
