//! Node runtime detection
//!
//! Finds the `node` executable the add-on is built for, asks it for its
//! version and uses it to check that a prebuilt module actually loads.

use crate::config::Config;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Could not find a Node runtime (set ADDONKIT_RUNTIME or pass a version with -v)")]
    NotFound,

    #[error("Failed to run {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} --version exited with {status}", program.display())]
    VersionQuery { program: PathBuf, status: String },

    #[error("Unexpected runtime version string: {0:?}")]
    InvalidVersion(String),
}

/// A located Node executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runtime {
    binary: PathBuf,
}

impl Runtime {
    /// Wrap an explicit executable path without checking it
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Locate the runtime: explicit path, then `ADDONKIT_RUNTIME`, then the
    /// config file, then `node` on `PATH`.
    pub fn locate(explicit: Option<&Path>, config: Option<&Config>) -> Result<Self, RuntimeError> {
        if let Some(path) = explicit {
            return Ok(Self::new(path));
        }

        if let Some(path) = crate::env_vars::runtime() {
            return Ok(Self::new(path));
        }

        if let Some(config) = config
            && let Some(ref path) = config.runtime
        {
            return Ok(Self::new(path));
        }

        which::which("node")
            .map(Self::new)
            .map_err(|_| RuntimeError::NotFound)
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Query `node --version`, without the leading `v`.
    pub async fn version(&self) -> Result<String, RuntimeError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                program: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RuntimeError::VersionQuery {
                program: self.binary.clone(),
                status: output.status.to_string(),
            });
        }

        parse_version_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// Check whether the runtime can `require()` the module at `module`.
    ///
    /// Any failure, including failing to start the runtime, counts as a
    /// module that does not load.
    pub async fn try_load(&self, module: &Path) -> bool {
        let status = Command::new(&self.binary)
            .args(["-e", "require(process.argv[1])"])
            .arg(module)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) => {
                crate::debug!("Load test of {} exited with {status}", module.display());
                status.success()
            }
            Err(e) => {
                crate::debug!("Load test of {} failed to start: {e}", module.display());
                false
            }
        }
    }
}

/// Turn `v20.11.1\n` into `20.11.1`.
fn parse_version_output(output: &str) -> Result<String, RuntimeError> {
    let trimmed = output.trim();
    let version = trimmed.strip_prefix('v').unwrap_or(trimmed);

    let valid = !version.is_empty()
        && version
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));

    if valid {
        Ok(version.to_string())
    } else {
        Err(RuntimeError::InvalidVersion(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_output() {
        assert_eq!(parse_version_output("v20.11.1\n").unwrap(), "20.11.1");
        assert_eq!(parse_version_output("18.0.0").unwrap(), "18.0.0");
    }

    #[test]
    fn rejects_garbage_version() {
        assert!(matches!(
            parse_version_output("Welcome to Node.js"),
            Err(RuntimeError::InvalidVersion(_))
        ));
        assert!(parse_version_output("").is_err());
        assert!(parse_version_output("v20..1").is_err());
    }

    #[test]
    fn explicit_path_wins() {
        let runtime = Runtime::locate(Some(Path::new("/opt/node/bin/node")), None).unwrap();
        assert_eq!(runtime.binary(), Path::new("/opt/node/bin/node"));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let runtime = Runtime::new("/nonexistent/addonkit/node");
        assert!(matches!(runtime.version().await, Err(RuntimeError::Spawn { .. })));
    }

    #[tokio::test]
    async fn missing_binary_never_loads() {
        let runtime = Runtime::new("/nonexistent/addonkit/node");
        assert!(!runtime.try_load(Path::new("/tmp/addon.node")).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn queries_version_from_script() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("node");
        std::fs::write(&script, "#!/bin/sh\necho v21.6.2\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(Runtime::new(&script).version().await.unwrap(), "21.6.2");
    }
}
