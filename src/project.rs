//! Project descriptor loading
//!
//! An add-on describes itself in the `addonkit` object of its `package.json`,
//! or in a standalone `addonkit.json` next to its `CMakeLists.txt`. Both
//! files are optional.

use crate::compat::CompatibilityRequirement;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

/// Standalone descriptor looked up in the project directory
pub const DESCRIPTOR_FILE: &str = "addonkit.json";

/// Package manifest found by walking up from the project directory
pub const PACKAGE_FILE: &str = "package.json";

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{ *([a-zA-Z_][a-zA-Z_0-9]*) *\}\}").ok());

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Minimum runtime version, written either as `"16.0.0"` or as `16`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RuntimeVersion {
    Text(String),
    Number(serde_json::Number),
}

impl std::fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

/// Add-on settings from the descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AddonSettings {
    /// Directory holding the runtime API headers (skips header downloads)
    pub api: Option<String>,
    /// Default build output directory
    pub output: Option<String>,
    /// Minimum runtime version
    pub node: Option<RuntimeVersion>,
    /// Minimum Node-API level
    pub napi: Option<u32>,
    /// Prebuilt archive, either an http(s) URL or a local path
    pub prebuild: Option<String>,
    /// Module the runtime must be able to load for a prebuild to be accepted
    pub require: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PackageManifest {
    name: Option<String>,
    version: Option<String>,
    addonkit: Option<AddonSettings>,
}

/// Values substituted into `{{ placeholder }}` templates
#[derive(Debug, Clone, Copy)]
pub struct ExpandContext<'a> {
    pub version: &'a str,
    pub platform: &'a str,
    pub arch: &'a str,
}

/// A loaded project descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectOptions {
    /// Package name, falling back to the project directory's name
    pub name: String,
    pub version: Option<String>,
    /// Directory relative paths in the settings are resolved against
    pub directory: PathBuf,
    pub settings: AddonSettings,
}

impl ProjectOptions {
    /// Load the descriptor for `project_dir`.
    ///
    /// `package_dir` defaults to the nearest ancestor holding a
    /// `package.json`. An `addonkit.json` in the project directory replaces
    /// the `addonkit` object of the package manifest.
    pub fn load(project_dir: &Path, package_dir: Option<&Path>) -> Result<Self, ProjectError> {
        let package_dir = package_dir.map_or_else(
            || {
                crate::paths::find_parent_directory(project_dir, PACKAGE_FILE)
                    .unwrap_or_else(|| project_dir.to_path_buf())
            },
            Path::to_path_buf,
        );

        let manifest_path = package_dir.join(PACKAGE_FILE);
        let manifest: PackageManifest = read_json(&manifest_path)?.unwrap_or_default();

        let descriptor_path = project_dir.join(DESCRIPTOR_FILE);
        let (directory, settings) = match read_json::<AddonSettings>(&descriptor_path)? {
            Some(settings) => {
                crate::debug!("Using descriptor {}", descriptor_path.display());
                (project_dir.to_path_buf(), settings)
            }
            None => (package_dir, manifest.addonkit.unwrap_or_default()),
        };

        let name = manifest.name.unwrap_or_else(|| {
            project_dir
                .file_name()
                .map_or_else(|| "addon".to_string(), |n| n.to_string_lossy().into_owned())
        });

        Ok(Self {
            name,
            version: manifest.version,
            directory,
            settings,
        })
    }

    /// Version constraints declared by the project
    #[must_use]
    pub fn requirement(&self) -> CompatibilityRequirement {
        CompatibilityRequirement {
            min_runtime: self.settings.node.as_ref().map(ToString::to_string),
            min_napi: self.settings.napi,
        }
    }

    #[must_use]
    pub fn api_dir(&self, ctx: &ExpandContext<'_>) -> Option<PathBuf> {
        self.settings
            .api
            .as_deref()
            .map(|api| expand_path(api, &self.directory, ctx))
    }

    #[must_use]
    pub fn output_dir(&self, ctx: &ExpandContext<'_>) -> Option<PathBuf> {
        self.settings
            .output
            .as_deref()
            .map(|output| expand_path(output, &self.directory, ctx))
    }

    #[must_use]
    pub fn require_path(&self, ctx: &ExpandContext<'_>) -> Option<PathBuf> {
        self.settings
            .require
            .as_deref()
            .map(|require| expand_path(require, &self.directory, ctx))
    }

    /// Expanded prebuild location. URLs are returned as-is after expansion;
    /// local paths are not yet resolved against the project.
    #[must_use]
    pub fn prebuild(&self, ctx: &ExpandContext<'_>) -> Option<String> {
        self.settings
            .prebuild
            .as_deref()
            .map(|prebuild| expand(prebuild, ctx))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ProjectError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ProjectError::ReadError {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| ProjectError::ParseError {
            path: path.to_path_buf(),
            source,
        })
}

/// Substitute `{{ version }}`, `{{ platform }}` and `{{ arch }}`.
///
/// Unknown placeholders are left untouched.
///
/// # Examples
///
/// ```
/// use addonkit::project::{expand, ExpandContext};
///
/// let ctx = ExpandContext { version: "20.11.0", platform: "linux", arch: "x64" };
/// assert_eq!(expand("dist/{{platform}}_{{ arch }}/{{ abi }}", &ctx), "dist/linux_x64/{{ abi }}");
/// ```
#[must_use]
pub fn expand(template: &str, ctx: &ExpandContext<'_>) -> String {
    let Some(pattern) = PLACEHOLDER.as_ref() else {
        return template.to_string();
    };

    pattern
        .replace_all(template, |caps: &Captures<'_>| {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            match caps.get(1).map(|m| m.as_str()) {
                Some("version") => ctx.version.to_string(),
                Some("platform") => ctx.platform.to_string(),
                Some("arch") => ctx.arch.to_string(),
                _ => whole.to_string(),
            }
        })
        .into_owned()
}

/// Whether `template` uses the `{{ name }}` placeholder
#[must_use]
pub fn mentions_placeholder(template: &str, name: &str) -> bool {
    PLACEHOLDER.as_ref().is_some_and(|pattern| {
        pattern
            .captures_iter(template)
            .any(|caps| caps.get(1).is_some_and(|m| m.as_str() == name))
    })
}

/// Expand a path template and resolve it against `root` when relative.
#[must_use]
pub fn expand_path(template: &str, root: &Path, ctx: &ExpandContext<'_>) -> PathBuf {
    let expanded = expand(template, ctx);
    if crate::archive::path_is_absolute(&expanded) || Path::new(&expanded).is_absolute() {
        PathBuf::from(expanded)
    } else {
        root.join(expanded)
    }
}
