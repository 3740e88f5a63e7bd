//! Runtime headers, import libraries and bundled assets
//!
//! Downloads land in the shared cache and are reused across projects; the
//! unpacked copies live in each work directory.

use super::BuildError;
use super::cmake::WindowsLink;
use crate::download::Fetcher;
use std::fs;
use std::path::{Path, PathBuf};

/// Files written to `<work>/assets` and exposed through `CMAKE_MODULE_PATH`
const ASSETS: &[(&str, &str)] = &[
    ("win_delay_hook.c", include_str!("../../assets/win_delay_hook.c")),
    ("FindAddonKit.cmake", include_str!("../../assets/FindAddonKit.cmake")),
];

/// `node-v<ver>-headers.tar.gz`
#[must_use]
pub fn headers_archive_name(version: &str) -> String {
    format!("node-v{version}-headers.tar.gz")
}

#[must_use]
pub fn headers_url(dist_url: &str, version: &str) -> String {
    format!("{dist_url}/v{version}/{}", headers_archive_name(version))
}

/// Cache name for the import library of one version and architecture
#[must_use]
pub fn import_library_name(version: &str, arch: &str) -> String {
    format!("node_v{version}_{arch}.lib")
}

/// Download location of `node.lib`, which only exists for Windows builds of
/// ia32, x64 and arm64.
pub fn import_library_url(dist_url: &str, version: &str, arch: &str) -> Result<String, BuildError> {
    let dir = match arch {
        "ia32" => "win-x86",
        "x64" => "win-x64",
        "arm64" => "win-arm64",
        other => return Err(BuildError::UnsupportedArchitecture(other.to_string())),
    };

    Ok(format!("{dist_url}/v{version}/{dir}/node.lib"))
}

/// Make the runtime headers available and return the include directory.
///
/// An API directory from the descriptor is used as-is; otherwise the
/// official headers archive is fetched into the cache (once) and unpacked
/// into `<work>/headers`.
pub async fn provision_headers(
    fetcher: &Fetcher,
    api_dir: Option<&Path>,
    cache_dir: &Path,
    work_dir: &Path,
    dist_url: &str,
    version: &str,
) -> Result<PathBuf, BuildError> {
    if let Some(api) = api_dir {
        crate::debug!("Using API headers from {}", api.display());
        return Ok(api.join("include"));
    }

    let archive = cache_dir.join(headers_archive_name(version));
    fetch_if_missing(fetcher, &headers_url(dist_url, version), &archive).await?;

    let dest = work_dir.join("headers");
    crate::archive::extract_targz(&archive, &dest, 1).await?;

    Ok(dest.join("include").join("node"))
}

/// Work out how a Windows build links against the runtime.
///
/// With an API directory the bundled module definition file is used;
/// otherwise `node.lib` is fetched into the cache and copied to
/// `<work>/node.lib`.
pub async fn provision_import_library(
    fetcher: &Fetcher,
    api_dir: Option<&Path>,
    cache_dir: &Path,
    work_dir: &Path,
    dist_url: &str,
    version: &str,
    arch: &str,
) -> Result<WindowsLink, BuildError> {
    let dest = work_dir.join("node.lib");

    if let Some(api) = api_dir {
        return Ok(WindowsLink {
            def: Some(api.join("def").join("node_api.def")),
            lib: dest,
        });
    }

    let url = import_library_url(dist_url, version, arch)?;
    let cached = cache_dir.join(import_library_name(version, arch));
    fetch_if_missing(fetcher, &url, &cached).await?;

    tokio::fs::copy(&cached, &dest)
        .await
        .map_err(BuildError::wrap_io(format!("copy {}", cached.display())))?;

    Ok(WindowsLink {
        def: None,
        lib: dest,
    })
}

/// Write the bundled assets into `<work>/assets` and return that directory.
pub fn write_assets(work_dir: &Path) -> Result<PathBuf, BuildError> {
    let dir = work_dir.join("assets");
    fs::create_dir_all(&dir).map_err(BuildError::wrap_io(format!("create {}", dir.display())))?;

    for (name, contents) in ASSETS {
        let path = dir.join(name);
        fs::write(&path, contents).map_err(BuildError::wrap_io(format!("write {}", path.display())))?;
    }

    Ok(dir)
}

async fn fetch_if_missing(fetcher: &Fetcher, url: &str, dest: &Path) -> Result<(), BuildError> {
    if dest.exists() {
        crate::debug!("Using cached {}", dest.display());
        return Ok(());
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(BuildError::wrap_io(format!("create {}", parent.display())))?;
    }

    fetcher.download(url, dest).await?;
    Ok(())
}
