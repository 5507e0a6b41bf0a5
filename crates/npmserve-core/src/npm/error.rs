//! npm package error types.

use std::fmt;
use std::io;

/// npm error codes.
pub mod codes {
    pub const NPM_SPECIFIER_MALFORMED: &str = "NPM_SPECIFIER_MALFORMED";
    pub const NPM_MANIFEST_INVALID: &str = "NPM_MANIFEST_INVALID";
    pub const NPM_NESTED_EXPORTS_NOT_ALLOWED: &str = "NPM_NESTED_EXPORTS_NOT_ALLOWED";
    pub const NPM_NAME_MISMATCH: &str = "NPM_NAME_MISMATCH";
    pub const NPM_SELF_EXPORT_NOT_FOUND: &str = "NPM_SELF_EXPORT_NOT_FOUND";
    pub const NPM_REGISTRY_LOOKUP_FAILED: &str = "NPM_REGISTRY_LOOKUP_FAILED";
    pub const NPM_PACKAGE_NOT_FOUND: &str = "NPM_PACKAGE_NOT_FOUND";
    pub const NPM_VERSION_NOT_FOUND: &str = "NPM_VERSION_NOT_FOUND";
    pub const NPM_DOWNLOAD_FAILED: &str = "NPM_DOWNLOAD_FAILED";
    pub const NPM_EXTRACT_FAILED: &str = "NPM_EXTRACT_FAILED";
    pub const NPM_BUILD_FAILED: &str = "NPM_BUILD_FAILED";
    pub const NPM_COMPILE_TIMEOUT: &str = "NPM_COMPILE_TIMEOUT";
    pub const NPM_DEPENDENCY_CYCLE: &str = "NPM_DEPENDENCY_CYCLE";
    pub const NPM_CACHE_ERROR: &str = "NPM_CACHE_ERROR";
}

/// npm package error.
///
/// Cloneable so that one failed compile can be handed to every waiter and
/// kept as the cached result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpmError {
    code: &'static str,
    message: String,
}

impl NpmError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn malformed_specifier(msg: impl Into<String>) -> Self {
        Self::new(codes::NPM_SPECIFIER_MALFORMED, msg)
    }

    pub fn manifest_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::NPM_MANIFEST_INVALID, msg)
    }

    #[must_use]
    pub fn nested_exports(parent: &str, key: &str) -> Self {
        Self::new(
            codes::NPM_NESTED_EXPORTS_NOT_ALLOWED,
            format!("Nested exports are not allowed: '{key}' under '{parent}'"),
        )
    }

    #[must_use]
    pub fn name_mismatch(expected: &str, found: &str) -> Self {
        Self::new(
            codes::NPM_NAME_MISMATCH,
            format!("Package name mismatch: expected '{expected}', manifest declares '{found}'"),
        )
    }

    #[must_use]
    pub fn self_export_not_found(package: &str, export: &str) -> Self {
        Self::new(
            codes::NPM_SELF_EXPORT_NOT_FOUND,
            format!("Package '{package}' does not export '{export}'"),
        )
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::NPM_REGISTRY_LOOKUP_FAILED, msg)
    }

    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(codes::NPM_PACKAGE_NOT_FOUND, format!("Package not found: {name}"))
    }

    #[must_use]
    pub fn version_not_found(name: &str, range: &str) -> Self {
        Self::new(
            codes::NPM_VERSION_NOT_FOUND,
            format!("No version of {name} satisfies range: {range}"),
        )
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::NPM_DOWNLOAD_FAILED, msg)
    }

    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::NPM_EXTRACT_FAILED, msg)
    }

    pub fn build_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::NPM_BUILD_FAILED, msg)
    }

    #[must_use]
    pub fn compile_timeout(key: &str, secs: u64) -> Self {
        Self::new(
            codes::NPM_COMPILE_TIMEOUT,
            format!("Compiling {key} did not finish within {secs}s"),
        )
    }

    #[must_use]
    pub fn dependency_cycle(chain: &[String], key: &str) -> Self {
        Self::new(
            codes::NPM_DEPENDENCY_CYCLE,
            format!("Dependency cycle: {} -> {key}", chain.join(" -> ")),
        )
    }

    pub fn cache_error(msg: impl Into<String>) -> Self {
        Self::new(codes::NPM_CACHE_ERROR, msg)
    }

    /// Whether this error means the requested thing does not exist, as
    /// opposed to something having gone wrong while producing it.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.code,
            codes::NPM_PACKAGE_NOT_FOUND
                | codes::NPM_VERSION_NOT_FOUND
                | codes::NPM_SELF_EXPORT_NOT_FOUND
        )
    }

    /// Whether this error came from talking to the registry.
    #[must_use]
    pub fn is_upstream(&self) -> bool {
        matches!(
            self.code,
            codes::NPM_REGISTRY_LOOKUP_FAILED | codes::NPM_DOWNLOAD_FAILED
        )
    }
}

impl fmt::Display for NpmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for NpmError {}

impl From<io::Error> for NpmError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::NPM_CACHE_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for NpmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::registry(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::registry(format!("Connection failed: {e}"))
        } else {
            Self::registry(e.to_string())
        }
    }
}

impl From<serde_json::Error> for NpmError {
    fn from(e: serde_json::Error) -> Self {
        Self::manifest_invalid(format!("Invalid JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        let err = NpmError::nested_exports(".", "./inner");
        assert_eq!(err.code(), codes::NPM_NESTED_EXPORTS_NOT_ALLOWED);
        assert!(err.to_string().starts_with("NPM_NESTED_EXPORTS_NOT_ALLOWED: "));
        assert!(err.message().contains("./inner"));
    }

    #[test]
    fn test_error_codes_uppercase() {
        let all_codes = [
            codes::NPM_SPECIFIER_MALFORMED,
            codes::NPM_MANIFEST_INVALID,
            codes::NPM_NESTED_EXPORTS_NOT_ALLOWED,
            codes::NPM_NAME_MISMATCH,
            codes::NPM_SELF_EXPORT_NOT_FOUND,
            codes::NPM_REGISTRY_LOOKUP_FAILED,
            codes::NPM_PACKAGE_NOT_FOUND,
            codes::NPM_VERSION_NOT_FOUND,
            codes::NPM_DOWNLOAD_FAILED,
            codes::NPM_EXTRACT_FAILED,
            codes::NPM_BUILD_FAILED,
            codes::NPM_COMPILE_TIMEOUT,
            codes::NPM_DEPENDENCY_CYCLE,
            codes::NPM_CACHE_ERROR,
        ];

        for code in all_codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }

    #[test]
    fn test_error_classes() {
        assert!(NpmError::not_found("left-pad").is_not_found());
        assert!(NpmError::registry("boom").is_upstream());
        assert!(!NpmError::build_failed("boom").is_not_found());
        assert!(!NpmError::build_failed("boom").is_upstream());
    }

    #[test]
    fn test_cycle_message_lists_chain() {
        let chain = vec!["a@1.0.0".to_string(), "b@1.0.0".to_string()];
        let err = NpmError::dependency_cycle(&chain, "a@1.0.0");
        assert_eq!(err.message(), "Dependency cycle: a@1.0.0 -> b@1.0.0 -> a@1.0.0");
    }
}
