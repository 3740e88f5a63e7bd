//! Build type definitions
//!
//! Options supplied by the caller, the configuration resolved from them and
//! the state a `Builder` moves through.

use crate::arch::Triplet;
use crate::runtime::{Runtime, RuntimeError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// `CMake` build type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BuildMode {
    /// Optimized with debug info
    #[default]
    RelWithDebInfo,
    Debug,
    Release,
}

impl BuildMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RelWithDebInfo => "RelWithDebInfo",
            Self::Debug => "Debug",
            Self::Release => "Release",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown build mode '{0}' (expected RelWithDebInfo, Debug or Release)")]
pub struct ParseModeError(pub String);

impl FromStr for BuildMode {
    type Err = ParseModeError;

    /// Parse a build mode, ignoring case.
    ///
    /// # Examples
    ///
    /// ```
    /// use addonkit::builder::BuildMode;
    ///
    /// assert_eq!("release".parse::<BuildMode>().unwrap(), BuildMode::Release);
    /// assert_eq!("RELWITHDEBINFO".parse::<BuildMode>().unwrap(), BuildMode::RelWithDebInfo);
    /// assert!("fast".parse::<BuildMode>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relwithdebinfo" => Ok(Self::RelWithDebInfo),
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// Where a `Builder` is in its lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BuildState {
    #[default]
    Uninitialized,
    Configuring,
    Configured,
    Building,
    Built,
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Configuring => "configuring",
            Self::Configured => "configured",
            Self::Building => "building",
            Self::Built => "built",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Caller input; anything left unset is derived from the config file, the
/// environment or the project itself
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Directory holding `CMakeLists.txt` (defaults to the current directory)
    pub project_dir: Option<PathBuf>,
    /// Directory holding `package.json` (defaults to the nearest ancestor)
    pub package_dir: Option<PathBuf>,
    /// Output directory (defaults to the descriptor's `output`, then `build/`)
    pub build_dir: Option<PathBuf>,
    /// Runtime version to build against (defaults to the installed runtime)
    pub runtime_version: Option<String>,
    /// Target architecture (defaults to the runtime's architecture)
    pub arch: Option<String>,
    pub toolset: Option<String>,
    pub prefer_clang: Option<bool>,
    pub mode: Option<BuildMode>,
    /// Build only these targets
    pub targets: Vec<String>,
    pub verbose: bool,
    /// Try the descriptor's prebuilt binary before compiling
    pub prebuild: bool,
    /// Explicit `CMake` executable
    pub cmake: Option<PathBuf>,
    /// Explicit runtime executable
    pub runtime: Option<PathBuf>,
}

/// Fully resolved build settings, owned by one `Builder`
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub project_dir: PathBuf,
    pub package_dir: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub build_dir: PathBuf,
    /// `<build_dir>/v<runtime_version>_<arch>`, known once the version is
    pub work_dir: Option<PathBuf>,
    /// Unset when neither the options nor an installed runtime provide it
    pub runtime_version: Option<String>,
    pub triplet: Triplet,
    pub toolset: Option<String>,
    pub prefer_clang: bool,
    pub mode: BuildMode,
    pub targets: Vec<String>,
    pub verbose: bool,
    pub prebuild: bool,
    /// Mirror for headers and import libraries, without a trailing slash
    pub dist_url: String,
    pub runtime: Option<Runtime>,
    pub cmake: Option<PathBuf>,
}

impl BuildConfig {
    /// Name of the per-version work directory inside `build_dir`
    #[must_use]
    pub fn work_dir_name(runtime_version: &str, arch: &str) -> String {
        format!("v{runtime_version}_{arch}")
    }

    /// Runtime version, needed by every step except cleaning
    pub fn runtime_version(&self) -> Result<&str, RuntimeError> {
        self.runtime_version.as_deref().ok_or(RuntimeError::NotFound)
    }

    pub fn work_dir(&self) -> Result<&Path, RuntimeError> {
        self.work_dir.as_deref().ok_or(RuntimeError::NotFound)
    }
}
