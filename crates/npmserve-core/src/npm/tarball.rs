//! Tarball download and extraction.

use super::error::NpmError;
use bytes::Bytes;
use flate2::read::GzDecoder;
use reqwest::Client;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tar::Archive;

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Download a tarball, refusing bodies larger than `max_bytes`.
pub async fn download_tarball(client: &Client, url: &str, max_bytes: u64) -> Result<Bytes, NpmError> {
    let response = client
        .get(url)
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .send()
        .await
        .map_err(|e| NpmError::download_failed(format!("Failed to download '{url}': {e}")))?;

    if !response.status().is_success() {
        return Err(NpmError::download_failed(format!(
            "Download failed with status {} for '{url}'",
            response.status()
        )));
    }

    if let Some(len) = response.content_length().filter(|len| *len > max_bytes) {
        return Err(NpmError::download_failed(format!(
            "Tarball too large: {len} bytes (max: {max_bytes})"
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| NpmError::download_failed(format!("Failed to read response body: {e}")))?;

    if bytes.len() as u64 > max_bytes {
        return Err(NpmError::download_failed(format!(
            "Tarball too large: {} bytes (max: {max_bytes})",
            bytes.len()
        )));
    }

    Ok(bytes)
}

/// Extract an npm tarball so that its single top-level directory becomes
/// `dest`.
///
/// Extraction goes to a sibling temp directory that is renamed into place,
/// so `dest` is either absent or complete. If another extraction wins the
/// race the result is kept and this one discarded.
pub fn extract_tgz_atomic(bytes: &[u8], dest: &Path) -> Result<(), NpmError> {
    if dest.exists() {
        return Ok(());
    }

    let parent = dest
        .parent()
        .ok_or_else(|| NpmError::extract_failed("Destination has no parent"))?;
    fs::create_dir_all(parent)?;

    let staging = tempfile::Builder::new()
        .prefix(".tmp-extract-")
        .tempdir_in(parent)?;

    unpack(bytes, staging.path())?;
    let root = extracted_root(staging.path())?;

    match fs::rename(&root, dest) {
        Ok(()) => Ok(()),
        Err(_) if dest.exists() => Ok(()),
        Err(e) => Err(NpmError::extract_failed(format!(
            "Failed to move extracted package to {}: {e}",
            dest.display()
        ))),
    }
}

/// Unpack regular files and directories. Entries that would land outside
/// `dest` are an error; links and special files are skipped.
fn unpack(bytes: &[u8], dest: &Path) -> Result<(), NpmError> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let entries = archive
        .entries()
        .map_err(|e| NpmError::extract_failed(format!("Failed to read tarball entries: {e}")))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| NpmError::extract_failed(format!("Failed to read tarball entry: {e}")))?;

        let kind = entry.header().entry_type();
        if !kind.is_file() && !kind.is_dir() {
            continue;
        }

        let path = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let inside = entry
            .unpack_in(dest)
            .map_err(|e| NpmError::extract_failed(format!("Failed to extract '{path}': {e}")))?;
        if !inside {
            return Err(NpmError::extract_failed(format!(
                "Tarball entry escapes destination: {path}"
            )));
        }
    }

    Ok(())
}

/// npm tarballs hold one top-level directory, usually `package/` but e.g.
/// `node/` for `@types/node`.
fn extracted_root(staging: &Path) -> Result<PathBuf, NpmError> {
    let package = staging.join("package");
    if package.is_dir() {
        return Ok(package);
    }

    let dirs: Vec<PathBuf> = fs::read_dir(staging)
        .map_err(|e| NpmError::extract_failed(format!("Failed to read extracted dir: {e}")))?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|ft| ft.is_dir()))
        .map(|e| e.path())
        .collect();

    match dirs.as_slice() {
        [only] => Ok(only.clone()),
        [] => Err(NpmError::extract_failed(
            "Tarball does not contain any top-level directory",
        )),
        many => Err(NpmError::extract_failed(format!(
            "Tarball contains {} top-level directories, expected 1",
            many.len()
        ))),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::tgz;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_extract_package_prefix() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("pkg").join("1.0.0");

        let bytes = tgz(&[
            ("package/package.json", r#"{"name":"pkg","version":"1.0.0"}"#),
            ("package/lib/index.js", "export default 42;"),
        ]);
        extract_tgz_atomic(&bytes, &dest).unwrap();

        assert!(dest.join("package.json").exists());
        assert!(dest.join("lib").join("index.js").exists());
        // no staging directories left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("pkg"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_extract_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("1.0.0");
        let bytes = tgz(&[("package/index.js", "1")]);

        extract_tgz_atomic(&bytes, &dest).unwrap();
        extract_tgz_atomic(&bytes, &dest).unwrap();
        assert!(dest.join("index.js").exists());
    }

    #[test]
    fn test_non_package_prefix() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("20.1.0");
        let bytes = tgz(&[("node/index.d.ts", "export {};")]);

        extract_tgz_atomic(&bytes, &dest).unwrap();
        assert!(dest.join("index.d.ts").exists());
    }

    #[test]
    fn test_reject_empty_tarball() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("1.0.0");

        let err = extract_tgz_atomic(&tgz(&[]), &dest).unwrap_err();
        assert_eq!(err.code(), crate::npm::error::codes::NPM_EXTRACT_FAILED);
        assert!(!dest.exists());
    }

    #[test]
    fn test_reject_garbage() {
        let dir = tempdir().unwrap();
        let err = extract_tgz_atomic(b"not a tarball", &dir.path().join("x")).unwrap_err();
        assert_eq!(err.code(), crate::npm::error::codes::NPM_EXTRACT_FAILED);
    }
}
