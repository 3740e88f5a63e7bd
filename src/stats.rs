//! Directory statistics
//!
//! Counts files and bytes under a directory tree and formats sizes in
//! human-readable form. Used to report what `clean` frees.

use std::path::Path;
use walkdir::WalkDir;

/// Directory statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Number of regular files
    pub files: usize,
    /// Total size in bytes
    pub total_size: u64,
}

/// Collect statistics from a directory tree.
///
/// Symlinks are not followed or counted. A missing directory yields empty
/// stats rather than an error.
pub fn collect_stats<P: AsRef<Path>>(dir: P) -> walkdir::Result<Stats> {
    let dir = dir.as_ref();
    let mut stats = Stats::default();

    if !dir.exists() {
        return Ok(stats);
    }

    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_file() {
            stats.files += 1;
            stats.total_size = stats.total_size.saturating_add(entry.metadata()?.len());
        }
    }

    Ok(stats)
}

/// Convert bytes to human-readable form using binary units.
/// 512 -> "512 B", 1536 -> "1.5 KiB", 1048576 -> "1.0 MiB"
#[must_use]
pub fn human_bytes(size: u64) -> String {
    const UNIT: u64 = 1024;
    const UNITS: &[char] = &['K', 'M', 'G', 'T', 'P', 'E'];

    if size < UNIT {
        return format!("{size} B");
    }

    let mut div = UNIT;
    let mut exp = 0;
    while size / div >= UNIT && exp < UNITS.len() - 1 {
        div *= UNIT;
        exp += 1;
    }

    let unit = UNITS.get(exp).copied().unwrap_or('?');
    format!("{:.1} {unit}iB", size as f64 / div as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn empty_and_missing_directories() {
        let tmp_dir = TempDir::new().unwrap();
        assert_eq!(collect_stats(tmp_dir.path()).unwrap(), Stats::default());
        assert_eq!(
            collect_stats(tmp_dir.path().join("nope")).unwrap(),
            Stats::default()
        );
    }

    #[test]
    fn counts_nested_build_output() {
        let tmp_dir = TempDir::new().unwrap();
        let work = tmp_dir.path().join("v20.0.0_x64");
        let headers = work.join("headers").join("include").join("node");
        fs::create_dir_all(&headers).unwrap();

        fs::write(tmp_dir.path().join("addon.node"), vec![0u8; 1024 * 10]).unwrap();
        fs::write(work.join("CMakeCache.txt"), b"CMAKE_BUILD_TYPE=Release\n").unwrap();
        fs::write(headers.join("node_api.h"), vec![0u8; 2048]).unwrap();

        let stats = collect_stats(tmp_dir.path()).unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.total_size, 1024 * 10 + 25 + 2048);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_counted() {
        let tmp_dir = TempDir::new().unwrap();
        let target = tmp_dir.path().join("target.bin");
        fs::write(&target, b"data").unwrap();
        std::os::unix::fs::symlink(&target, tmp_dir.path().join("link.bin")).unwrap();

        let stats = collect_stats(tmp_dir.path()).unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.total_size, 4);
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1024), "1.0 KiB");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(1024 * 1024 * 150), "150.0 MiB");
        assert_eq!(human_bytes(6_120_335_360), "5.7 GiB");
        assert_eq!(human_bytes(1024_u64.pow(6)), "1.0 EiB");
        assert_eq!(human_bytes(u64::MAX), "16.0 EiB");
    }
}
