/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Layout version of the package store, part of its directory name.
pub const SCHEMA_VERSION: u32 = 1;

/// `User-Agent` sent to the npm registry and the transform service.
#[must_use]
pub fn user_agent() -> String {
    format!("npmserve/{VERSION}")
}

/// `npmserve <version>`, plus the git hash when the build recorded one.
#[must_use]
pub fn version_string() -> String {
    match option_env!("NPMSERVE_BUILD_GIT_HASH") {
        Some(hash) => format!("npmserve {VERSION} ({hash})"),
        None => format!("npmserve {VERSION}"),
    }
}
