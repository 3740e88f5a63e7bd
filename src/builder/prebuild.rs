//! Prebuilt binaries
//!
//! A project may ship prebuilt archives for common targets. When one is
//! available and the runtime accepts the module inside it, compilation is
//! skipped entirely.

use super::BuildError;
use crate::download::Fetcher;
use crate::runtime::Runtime;
use std::path::{Path, PathBuf};

/// Where a prebuilt archive comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrebuildSource {
    /// Downloaded into the cache
    Url(String),
    /// Already on disk
    Local(PathBuf),
}

impl PrebuildSource {
    /// Classify an expanded `prebuild` value. Relative local paths are
    /// resolved against `root`.
    #[must_use]
    pub fn parse(value: &str, root: &Path) -> Self {
        let lower = value.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Self::Url(value.to_string());
        }

        let path = Path::new(value);
        if crate::archive::path_is_absolute(value) || path.is_absolute() {
            Self::Local(path.to_path_buf())
        } else {
            Self::Local(root.join(path))
        }
    }
}

/// Cache file name for a downloaded archive: `<project>_<last URL segment>`.
///
/// # Examples
///
/// ```
/// use addonkit::builder::prebuild::cache_file_name;
///
/// assert_eq!(
///     cache_file_name("koffi", "https://example.com/v2/koffi_linux_x64.tar.gz?x=1").as_deref(),
///     Some("koffi_koffi_linux_x64.tar.gz"),
/// );
/// assert_eq!(cache_file_name("koffi", "https://example.com/"), None);
/// ```
#[must_use]
pub fn cache_file_name(project: &str, url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let segment = path.rsplit('/').next().unwrap_or_default();

    if segment.is_empty() || segment.contains("://") || segment == ".." || segment == "." {
        return None;
    }

    Some(format!("{project}_{segment}"))
}

/// Inputs for one prebuild attempt
#[derive(Debug)]
pub struct PrebuildRequest<'a> {
    pub project: &'a str,
    pub source: PrebuildSource,
    pub cache_dir: &'a Path,
    pub build_dir: &'a Path,
    /// Module the runtime must load for the prebuild to count
    pub require: Option<PathBuf>,
    pub runtime: Option<&'a Runtime>,
}

/// Unpack a prebuilt archive into the build directory and check it.
///
/// Returns `Ok(true)` only when the runtime successfully loaded the required
/// module; the caller then skips compilation.
pub async fn try_prebuild(fetcher: &Fetcher, request: PrebuildRequest<'_>) -> Result<bool, BuildError> {
    let archive = match request.source {
        PrebuildSource::Url(url) => {
            let name = cache_file_name(request.project, &url)
                .ok_or_else(|| BuildError::InvalidPrebuildUrl(url.clone()))?;
            let dest = request.cache_dir.join(name);

            if dest.exists() {
                crate::debug!("Using cached prebuild {}", dest.display());
            } else {
                tokio::fs::create_dir_all(request.cache_dir)
                    .await
                    .map_err(BuildError::wrap_io(format!(
                        "create {}",
                        request.cache_dir.display()
                    )))?;
                fetcher.download(&url, &dest).await?;
            }
            dest
        }
        PrebuildSource::Local(path) => path,
    };

    println!(">> Extracting prebuilt binaries from {}", archive.display());
    tokio::fs::create_dir_all(request.build_dir)
        .await
        .map_err(BuildError::wrap_io(format!("create {}", request.build_dir.display())))?;
    crate::archive::extract_targz(&archive, request.build_dir, 1).await?;

    let Some(module) = request.require else {
        crate::debug!("No require path configured, building from source anyway");
        return Ok(false);
    };

    let Some(runtime) = request.runtime else {
        println!("No runtime available to test {}", module.display());
        return Ok(false);
    };

    if runtime.try_load(&module).await {
        println!(">> Using prebuilt binary {}", module.display());
        Ok(true)
    } else {
        println!("Prebuilt binary {} does not load, building from source", module.display());
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sources() {
        let root = Path::new("/proj");
        assert_eq!(
            PrebuildSource::parse("https://example.com/a.tar.gz", root),
            PrebuildSource::Url("https://example.com/a.tar.gz".to_string())
        );
        assert_eq!(
            PrebuildSource::parse("HTTP://example.com/a.tar.gz", root),
            PrebuildSource::Url("HTTP://example.com/a.tar.gz".to_string())
        );
        assert_eq!(
            PrebuildSource::parse("prebuilds/a.tar.gz", root),
            PrebuildSource::Local(PathBuf::from("/proj/prebuilds/a.tar.gz"))
        );
        assert_eq!(
            PrebuildSource::parse("/srv/a.tar.gz", root),
            PrebuildSource::Local(PathBuf::from("/srv/a.tar.gz"))
        );
    }

    #[test]
    fn cache_names() {
        assert_eq!(
            cache_file_name("addon", "https://h/x/addon-linux.tar.gz#frag").as_deref(),
            Some("addon_addon-linux.tar.gz")
        );
        assert_eq!(cache_file_name("addon", "https://h/x/.."), None);
        assert_eq!(cache_file_name("addon", ""), None);
    }

    #[tokio::test]
    async fn without_require_never_short_circuits() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("prebuilt.tar.gz");
        let file = std::fs::File::create(&archive).unwrap();
        let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o755);
        header.set_cksum();
        tar.append_data(&mut header, "pkg/addon.node", &b"\x7fELF"[..])
            .unwrap();
        tar.into_inner().unwrap().finish().unwrap();

        let build = temp.path().join("build");
        let used = try_prebuild(
            &Fetcher::new().unwrap(),
            PrebuildRequest {
                project: "addon",
                source: PrebuildSource::Local(archive),
                cache_dir: &temp.path().join("cache"),
                build_dir: &build,
                require: None,
                runtime: None,
            },
        )
        .await
        .unwrap();

        assert!(!used);
        assert_eq!(std::fs::read(build.join("addon.node")).unwrap(), b"\x7fELF");
    }

    #[tokio::test]
    async fn missing_local_archive_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let result = try_prebuild(
            &Fetcher::new().unwrap(),
            PrebuildRequest {
                project: "addon",
                source: PrebuildSource::Local(temp.path().join("missing.tar.gz")),
                cache_dir: temp.path(),
                build_dir: &temp.path().join("build"),
                require: Some(temp.path().join("build/addon.node")),
                runtime: None,
            },
        )
        .await;

        assert!(matches!(result, Err(BuildError::Archive(_))));
    }
}
