//! Environment variable handling
//!
//! Every variable the tool reads is looked up here so the full list lives in
//! one place.

use std::env;
use std::path::PathBuf;

// Helper for boolean environment variables that accept "1", "true", "yes"
fn is_enabled(var: &str) -> bool {
    env::var(var).ok().is_some_and(|s| {
        let s = s.to_lowercase();
        s == "1" || s == "true" || s == "yes"
    })
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var).ok().filter(|s| !s.is_empty())
}

/// Check if `ADDONKIT_DEBUG` asks for debug logging.
pub fn debug_requested() -> bool {
    is_enabled("ADDONKIT_DEBUG")
}

/// Override for the download cache (`ADDONKIT_CACHE_DIR`).
pub fn cache_dir() -> Option<PathBuf> {
    non_empty("ADDONKIT_CACHE_DIR").map(PathBuf::from)
}

/// Mirror for runtime headers and import libraries.
///
/// Checks `ADDONKIT_DIST_URL` then the conventional `NODEJS_ORG_MIRROR`.
pub fn dist_url() -> Option<String> {
    non_empty("ADDONKIT_DIST_URL").or_else(|| non_empty("NODEJS_ORG_MIRROR"))
}

/// Runtime executable to query and load-test with (`ADDONKIT_RUNTIME`).
pub fn runtime() -> Option<PathBuf> {
    non_empty("ADDONKIT_RUNTIME").map(PathBuf::from)
}

/// Explicit `CMake` executable (`CMAKE`).
pub fn cmake() -> Option<PathBuf> {
    non_empty("CMAKE").map(PathBuf::from)
}

/// Caller-provided `MAKEFLAGS`, if any.
pub fn makeflags() -> Option<String> {
    env::var("MAKEFLAGS").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_are_none() {
        assert!(non_empty("ADDONKIT_TEST_SURELY_UNSET_VARIABLE").is_none());
        assert!(!is_enabled("ADDONKIT_TEST_SURELY_UNSET_VARIABLE"));
    }

    #[test]
    fn path_is_always_set() {
        assert!(non_empty("PATH").is_some());
    }
}
