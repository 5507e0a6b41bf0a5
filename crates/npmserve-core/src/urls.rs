//! URL grammar of the module server.
//!
//! | Path | Meaning |
//! |---|---|
//! | `/@npm/<package>/<version>[/<file>]` | export lookup, redirects to `/@npm-src/...` |
//! | `/@npm-src/<package>/<version>/<path>` | a compiled file |
//! | `/@module/<url>` | an arbitrary module, via the transform service |
//! | `/@module/error/<message>` | a module that throws `message` |
//! | `/@node/<name>` | placeholder for a Node built-in |
//!
//! Package names are percent-encoded into a single segment, so
//! `@scope/pkg` appears as `%40scope%2Fpkg`.

use crate::npm::PackageId;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

pub const NPM_PREFIX: &str = "/@npm/";
pub const NPM_SRC_PREFIX: &str = "/@npm-src/";
pub const MODULE_PREFIX: &str = "/@module/";
pub const ERROR_MODULE_PREFIX: &str = "/@module/error/";
pub const NODE_PREFIX: &str = "/@node/";

/// Everything but RFC 3986 unreserved characters.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode one path segment.
#[must_use]
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Percent-decode a segment or a whole path. Invalid UTF-8 is replaced.
#[must_use]
pub fn percent_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// `/@npm/<package>/<version>` plus an optional subpath.
#[must_use]
pub fn npm_url(id: &PackageId, subpath: Option<&str>) -> String {
    let base = format!(
        "{NPM_PREFIX}{}/{}",
        encode_segment(id.name()),
        encode_segment(&id.version().to_string())
    );
    match subpath {
        Some(sub) if !sub.is_empty() => format!("{base}/{}", encode_path(sub)),
        _ => base,
    }
}

/// Base under which the compiled files of a package are served, ending in `/`.
#[must_use]
pub fn npm_src_base(id: &PackageId) -> String {
    format!(
        "{NPM_SRC_PREFIX}{}/{}/",
        encode_segment(id.name()),
        encode_segment(&id.version().to_string())
    )
}

/// URL of one compiled file. `path` is package-relative, with or without `./`.
#[must_use]
pub fn npm_src_url(id: &PackageId, path: &str) -> String {
    let path = path.strip_prefix("./").unwrap_or(path);
    format!("{}{}", npm_src_base(id), encode_path(path))
}

/// Export id for the `<file>` part of an `/@npm/` URL: `/x` and `x` both
/// become `./x`, trailing `/` is dropped, nothing at all is `.`.
#[must_use]
pub fn export_id_from_file(file: &str) -> String {
    let file = file.trim_end_matches('/');
    if file.is_empty() {
        ".".to_string()
    } else if file.starts_with('/') {
        format!(".{file}")
    } else {
        format!("./{file}")
    }
}

/// URL of a module that throws `message` when evaluated.
#[must_use]
pub fn error_module_url(message: &str) -> String {
    format!("{ERROR_MODULE_PREFIX}{}", encode_segment(message))
}

/// Source of the module behind [`error_module_url`].
#[must_use]
pub fn error_module_source(message: &str) -> String {
    let literal = serde_json::to_string(message).unwrap_or_else(|_| "\"\"".to_string());
    format!("throw new Error({literal});\nexport default undefined;\n")
}

/// URL of an arbitrary module served through the transform service.
#[must_use]
pub fn module_url(specifier: &str) -> String {
    format!("{MODULE_PREFIX}{}", encode_segment(specifier))
}

/// Placeholder URL for Node built-in `name` (`node:` prefix removed).
#[must_use]
pub fn node_builtin_url(name: &str) -> String {
    format!("{NODE_PREFIX}{}", encode_path(name))
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}
