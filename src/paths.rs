//! Path utilities for locating project files and removing build trees.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Attempts made by `remove_dir_recursive` on Windows, where virus scanners and
/// indexers briefly lock freshly written files
const WINDOWS_REMOVE_ATTEMPTS: u32 = 3;

/// Find the nearest directory at or above `start` containing `basename`.
#[must_use]
pub fn find_parent_directory(start: &Path, basename: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(basename).exists())
        .map(Path::to_path_buf)
}

/// Render a path with forward slashes, for values handed to `CMake`.
#[must_use]
pub fn to_forward_slashes(path: &Path) -> String {
    let text = path.to_string_lossy();
    if cfg!(windows) {
        text.replace('\\', "/")
    } else {
        text.into_owned()
    }
}

/// Remove a directory tree.
///
/// A missing directory is not an error. On Windows removal is retried a few
/// times with a short linear backoff.
pub async fn remove_dir_recursive(path: &Path) -> io::Result<()> {
    let attempts = if cfg!(windows) {
        WINDOWS_REMOVE_ATTEMPTS
    } else {
        1
    };

    let mut attempt = 1;
    loop {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                crate::debug!(
                    "Removing {} failed (attempt {attempt}): {e}",
                    path.display()
                );
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                attempt += 1;
            }
        }
    }
}
