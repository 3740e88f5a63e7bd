//! Configuration file management
//!
//! Reads addonkit's TOML configuration from the project or user config
//! directory and resolves the settings that can also come from the
//! environment (cache location, download mirror).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Official distribution server for Node headers and import libraries
pub const DEFAULT_DIST_URL: &str = "https://nodejs.org/dist";

/// Tool configuration loaded from TOML files
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Custom download cache directory
    #[serde(default)]
    pub cache_dir: Option<String>,

    /// Mirror to fetch headers and import libraries from
    #[serde(default)]
    pub dist_url: Option<String>,

    /// Default build type (`RelWithDebInfo`, `Debug`, `Release`)
    #[serde(default)]
    pub mode: Option<String>,

    /// Default `CMake` toolset
    #[serde(default)]
    pub toolset: Option<String>,

    /// Prefer Clang over the platform compiler
    #[serde(default)]
    pub prefer_clang: Option<bool>,

    /// Runtime executable used for version detection and load tests
    #[serde(default)]
    pub runtime: Option<String>,
}

impl Config {
    /// Load configuration from TOML files.
    /// Priority: ./.addonkit.toml -> ~/.config/addonkit/config.toml
    ///
    /// A missing file yields the default configuration; a file that exists
    /// but cannot be parsed is an error.
    pub fn load() -> Result<Self> {
        Self::load_with_options(None, false)
    }

    /// Load configuration with custom options.
    ///
    /// # Arguments
    /// * `custom_path` - Optional custom path to config file (overrides defaults)
    /// * `skip_rc` - If true, skip loading config files (return default config)
    pub fn load_with_options(custom_path: Option<&Path>, skip_rc: bool) -> Result<Self> {
        if skip_rc {
            return Ok(Self::default());
        }

        if let Some(path) = custom_path {
            return Self::load_from(path);
        }

        let local = Path::new(".addonkit.toml");
        if local.exists() {
            return Self::load_from(local);
        }

        if let Some(config_dir) = Self::user_config_dir() {
            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                return Self::load_from(&config_path);
            }
        }

        Ok(Self::default())
    }

    fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        crate::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn user_config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = env::var("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(xdg_config).join("addonkit"));
        }

        dirs::home_dir().map(|home| home.join(".config").join("addonkit"))
    }
}

/// Resolve cache directory: `ADDONKIT_CACHE_DIR` env -> Config -> platform cache dir.
pub fn cache_dir(config: Option<&Config>) -> Result<PathBuf> {
    if let Some(cache) = crate::env_vars::cache_dir() {
        return Ok(cache);
    }

    if let Some(config) = config
        && let Some(ref dir) = config.cache_dir
    {
        return Ok(PathBuf::from(dir));
    }

    if let Some(cache_base) = dirs::cache_dir() {
        return Ok(cache_base.join("addonkit"));
    }

    dirs::home_dir()
        .map(|home| home.join(".cache").join("addonkit"))
        .context("Could not determine a cache directory (no HOME or platform cache dir)")
}

/// Resolve the distribution mirror: env -> Config -> nodejs.org.
///
/// Trailing slashes are dropped so URLs can be joined with `/`.
#[must_use]
pub fn dist_url(config: Option<&Config>) -> String {
    let url = crate::env_vars::dist_url()
        .or_else(|| config.and_then(|c| c.dist_url.clone()))
        .unwrap_or_else(|| DEFAULT_DIST_URL.to_string());

    url.trim_end_matches('/').to_string()
}
