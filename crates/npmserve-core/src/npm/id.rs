//! Package identity and specifier parsing.
//!
//! Specifiers have the form `[@scope/]name@version[/subpath]`, e.g.
//! - `react@18.2.0`
//! - `@types/node@20.1.0`
//! - `@scope/pkg@1.2.3/path/to/file`

use super::error::NpmError;
use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Maximum length npm allows for a package name.
const MAX_NAME_LEN: usize = 214;

/// An exact, resolved package version.
///
/// Two ids are equal iff name and version string are equal, which is also
/// what the canonical `name@version` form compares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId {
    name: String,
    version: Version,
}

impl PackageId {
    /// Create an id from a name and an already parsed version.
    pub fn new(name: impl Into<String>, version: Version) -> Result<Self, NpmError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name, version })
    }

    /// Create an id from a name and a version string.
    pub fn parse(name: &str, version: &str) -> Result<Self, NpmError> {
        Self::new(name, parse_version(name, version)?)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The `name@version` form used as cache key and on the wire.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl FromStr for PackageId {
    type Err = NpmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_specifier(s)? {
            (id, None) => Ok(id),
            (_, Some(subpath)) => Err(NpmError::malformed_specifier(format!(
                "Expected name@version, found trailing path '{subpath}' in '{s}'"
            ))),
        }
    }
}

impl Serialize for PackageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PackageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Split a combined specifier into its identity and optional subpath.
///
/// The name of a scoped package runs through the one `/` after the scope.
/// The version follows the `@` that ends the name segment and runs to the
/// next `/`; the rest is the subpath. An empty subpath is `None`.
pub fn parse_specifier(s: &str) -> Result<(PackageId, Option<String>), NpmError> {
    let input = s.trim();

    let name_start = if input.starts_with('@') {
        let Some(slash) = input.find('/') else {
            return Err(NpmError::malformed_specifier(format!(
                "Scoped specifier is missing '/': '{s}'"
            )));
        };
        slash + 1
    } else {
        0
    };

    let rest = &input[name_start..];
    let segment_end = rest.find('/').unwrap_or(rest.len());
    let Some(at) = rest[..segment_end].rfind('@') else {
        return Err(NpmError::malformed_specifier(format!(
            "Specifier has no '@version': '{s}'"
        )));
    };

    let name = &input[..name_start + at];
    let version = &rest[at + 1..segment_end];
    let subpath = rest
        .get(segment_end + 1..)
        .map(|p| p.trim_end_matches('/'))
        .filter(|p| !p.is_empty())
        .map(String::from);

    if version.is_empty() {
        return Err(NpmError::malformed_specifier(format!(
            "Specifier has an empty version: '{s}'"
        )));
    }

    let id = PackageId::parse(name, version)
        .map_err(|e| NpmError::malformed_specifier(e.message().to_string()))?;

    Ok((id, subpath))
}

/// Split a bare import (`name[/subpath]`, no version) into package name and
/// subpath, using the same scope rule as [`parse_specifier`].
#[must_use]
pub fn split_bare(spec: &str) -> Option<(&str, Option<&str>)> {
    let name_end = if spec.starts_with('@') {
        let slash = spec.find('/')?;
        spec[slash + 1..]
            .find('/')
            .map_or(spec.len(), |p| slash + 1 + p)
    } else {
        spec.find('/').unwrap_or(spec.len())
    };

    let name = &spec[..name_end];
    if name.is_empty() || name == "@" || name.ends_with('/') {
        return None;
    }

    let subpath = spec
        .get(name_end + 1..)
        .filter(|p| !p.is_empty());

    Some((name, subpath))
}

fn parse_version(name: &str, version: &str) -> Result<Version, NpmError> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).map_err(|e| {
        NpmError::malformed_specifier(format!(
            "Invalid version '{version}' for {name}: {e}"
        ))
    })
}

/// Validate an npm package name, scoped or not.
fn validate_name(name: &str) -> Result<(), NpmError> {
    if name.is_empty() {
        return Err(NpmError::malformed_specifier("Empty package name"));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(NpmError::malformed_specifier(format!(
            "Package name exceeds {MAX_NAME_LEN} characters: '{name}'"
        )));
    }

    let bare = if let Some(scoped) = name.strip_prefix('@') {
        let Some((scope, bare)) = scoped.split_once('/') else {
            return Err(NpmError::malformed_specifier(format!(
                "Invalid scoped package name: '{name}'"
            )));
        };
        if scope.is_empty() || !scope.chars().all(is_name_char) {
            return Err(NpmError::malformed_specifier(format!(
                "Invalid scope in '{name}'"
            )));
        }
        bare
    } else {
        name
    };

    if bare.is_empty() || bare.starts_with('.') || bare.starts_with('_') {
        return Err(NpmError::malformed_specifier(format!(
            "Invalid package name: '{name}'"
        )));
    }

    if let Some(c) = bare.chars().find(|c| !is_name_char(*c)) {
        return Err(NpmError::malformed_specifier(format!(
            "Invalid character '{c}' in package name '{name}'"
        )));
    }

    Ok(())
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}
