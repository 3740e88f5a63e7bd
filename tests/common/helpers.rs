//! Shared test helpers and utilities

use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the path to the addonkit binary built for this test run
#[allow(dead_code)]
pub(crate) fn get_addonkit_binary() -> String {
    env!("CARGO_BIN_EXE_addonkit").to_string()
}

/// Create an add-on project with a `CMakeLists.txt` and an optional
/// `package.json`.
///
/// # Returns
/// The project directory
#[allow(dead_code)]
pub(crate) fn create_project(root: &Path, package_json: Option<&str>) -> PathBuf {
    let project = root.join("addon");
    fs::create_dir_all(&project).expect("Failed to create project dir");
    fs::write(
        project.join("CMakeLists.txt"),
        "cmake_minimum_required(VERSION 3.6)\nproject(addon C CXX)\n",
    )
    .expect("Failed to write CMakeLists.txt");

    if let Some(manifest) = package_json {
        fs::write(project.join("package.json"), manifest).expect("Failed to write package.json");
    }

    project
}

/// Write a gzip-compressed tar archive holding `entries` as regular files
///
/// # Arguments
/// * `path` - Archive to create
/// * `entries` - Slice of (name, contents, mode) tuples
#[allow(dead_code)]
pub(crate) fn write_targz(path: &Path, entries: &[(&str, &[u8], u32)]) {
    let file = fs::File::create(path).expect("Failed to create archive");
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    for (name, contents, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *contents)
            .expect("Failed to append entry");
    }

    builder
        .into_inner()
        .expect("Failed to finish tar stream")
        .finish()
        .expect("Failed to finish gzip stream");
}

/// Write a shell script standing in for `cmake`.
///
/// Every invocation appends its arguments as one line to `log`. The
/// configure step exits with `configure_exit` and touches `CMakeCache.txt`
/// on success; `--build` exits with `build_exit`.
#[cfg(unix)]
#[allow(dead_code)]
pub(crate) fn fake_cmake(dir: &Path, log: &Path, configure_exit: i32, build_exit: i32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("fake-cmake");
    let body = format!(
        r#"#!/bin/sh
echo "$@" >> "{log}"
if [ "$1" = "--build" ]; then
    echo "MAKEFLAGS=$MAKEFLAGS" >> "{log}"
    exit {build_exit}
fi
if [ {configure_exit} -eq 0 ]; then
    touch CMakeCache.txt
fi
exit {configure_exit}
"#,
        log = log.display()
    );

    fs::write(&script, body).expect("Failed to write fake cmake");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
        .expect("Failed to make fake cmake executable");
    script
}

/// Lines logged by `fake_cmake`, empty if it never ran
#[allow(dead_code)]
pub(crate) fn read_log(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
