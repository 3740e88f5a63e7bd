//! HTTP downloads into the cache
//!
//! Streams a response body into a randomly-named temporary file next to the
//! destination, then renames it into place. Readers of the destination never
//! observe a partial file. Callers decide whether a download is needed at
//! all; the fetcher itself never skips a request.

use futures_util::StreamExt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Download failed: HTTP {status} from {url}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Network error downloading {url}: {source}")]
    Transfer {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove temporary file {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to initialize HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl DownloadError {
    /// Wrap an IO error with path context for use in `map_err`
    pub fn wrap_io(path: impl Into<PathBuf>) -> impl Fn(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io {
            path: path.clone(),
            source,
        }
    }

    /// Wrap a network error with URL context for use in `map_err`
    pub fn wrap_transfer(url: impl Into<String>) -> impl Fn(reqwest::Error) -> Self {
        let url = url.into();
        move |source| Self::Transfer {
            url: url.clone(),
            source,
        }
    }
}

/// Downloads files over HTTP(S)
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher").finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Create a fetcher with the default client settings
    ///
    /// Proxies come from the usual `HTTPS_PROXY`/`HTTP_PROXY` variables.
    pub fn new() -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("addonkit/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(DownloadError::Client)?;

        Ok(Self { client })
    }

    /// Download `url` to `dest`.
    ///
    /// The parent directory of `dest` must exist. On failure the temporary
    /// file is removed and `dest` is left untouched.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        println!("Downloading {url}");

        let temp = create_temp_beside(dest)?;
        let temp_path = temp.path().to_path_buf();

        if let Err(err) = self.fetch_into(url, &temp).await {
            discard_temp(temp)?;
            return Err(err);
        }

        match temp.persist(dest) {
            Ok(_) => Ok(()),
            // Another run may have renamed its own copy into place first
            Err(err) if dest.exists() => {
                crate::debug!("Lost rename race for {}: {}", dest.display(), err.error);
                discard_temp(err.file)
            }
            Err(err) => {
                let source = err.error;
                discard_temp(err.file)?;
                Err(DownloadError::Io {
                    path: temp_path,
                    source,
                })
            }
        }
    }

    async fn fetch_into(&self, url: &str, temp: &tempfile::NamedTempFile) -> Result<(), DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(DownloadError::wrap_transfer(url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let file_std = temp
            .as_file()
            .try_clone()
            .map_err(DownloadError::wrap_io(temp.path()))?;
        let mut file = tokio::fs::File::from_std(file_std);

        let mut stream = response.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(DownloadError::wrap_transfer(url))?;
            file.write_all(&chunk)
                .await
                .map_err(DownloadError::wrap_io(temp.path()))?;
        }

        file.flush()
            .await
            .map_err(DownloadError::wrap_io(temp.path()))?;
        file.sync_all()
            .await
            .map_err(DownloadError::wrap_io(temp.path()))?;

        Ok(())
    }
}

/// Create `<dest>.<random>` in the destination's directory.
///
/// A name collision picks a fresh suffix; any other error is fatal.
fn create_temp_beside(dest: &Path) -> Result<tempfile::NamedTempFile, DownloadError> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let prefix = dest
        .file_name()
        .map(|name| format!("{}.", name.to_string_lossy()))
        .unwrap_or_default();

    tempfile::Builder::new()
        .prefix(&prefix)
        .rand_bytes(8)
        .tempfile_in(dir)
        .map_err(DownloadError::wrap_io(dest))
}

/// Remove a temporary file, ignoring one that is already gone
fn discard_temp(temp: tempfile::NamedTempFile) -> Result<(), DownloadError> {
    let path = temp.path().to_path_buf();

    match temp.close() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DownloadError::Cleanup { path, source }),
    }
}
