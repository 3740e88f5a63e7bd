//! Builder state machine tests against a scripted `cmake`
#![cfg(unix)]

mod common;

use addonkit::builder::{BuildError, BuildOptions, BuildState, Builder};
use addonkit::config::Config;
use common::helpers::{create_project, fake_cmake, read_log};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const MANIFEST: &str = r#"{ "name": "addon", "version": "1.0.0", "addonkit": { "api": "api" } }"#;

/// Project with local API headers so configuration never downloads
fn setup(configure_exit: i32, build_exit: i32) -> (TempDir, PathBuf, PathBuf, PathBuf) {
    let temp = TempDir::new().unwrap();
    let project = create_project(temp.path(), Some(MANIFEST));
    fs::create_dir_all(project.join("api/include")).unwrap();

    let log = temp.path().join("cmake.log");
    let cmake = fake_cmake(temp.path(), &log, configure_exit, build_exit);
    (temp, project, cmake, log)
}

async fn builder(project: &Path, cmake: &Path) -> Builder {
    let options = BuildOptions {
        project_dir: Some(project.to_path_buf()),
        runtime_version: Some("20.11.1".to_string()),
        arch: Some("x64".to_string()),
        cmake: Some(cmake.to_path_buf()),
        ..BuildOptions::default()
    };
    Builder::new(options, &Config::default()).await.unwrap()
}

fn configure_lines(log: &[String]) -> usize {
    log.iter()
        .filter(|line| !line.starts_with("--build") && !line.starts_with("MAKEFLAGS="))
        .count()
}

#[tokio::test]
async fn configure_runs_once_while_cache_is_fresh() {
    let (_temp, project, cmake, log) = setup(0, 0);
    let mut builder = builder(&project, &cmake).await;
    assert_eq!(builder.state(), BuildState::Uninitialized);

    builder.configure().await.unwrap();
    assert_eq!(builder.state(), BuildState::Configured);
    assert!(builder.config().work_dir().unwrap().join("CMakeCache.txt").exists());

    builder.configure().await.unwrap();
    assert_eq!(configure_lines(&read_log(&log)), 1);

    let first = read_log(&log);
    let args = first.first().unwrap();
    assert!(args.starts_with(&project.display().to_string()));
    assert!(args.contains("-DNODE_JS_INCLUDE_DIRS="));
    assert!(args.contains("-DCMAKE_BUILD_TYPE=RelWithDebInfo"));
    assert!(args.ends_with("--no-warn-unused-cli"));
}

#[tokio::test]
async fn forced_configure_runs_again() {
    let (_temp, project, cmake, log) = setup(0, 0);
    let mut builder = builder(&project, &cmake).await;

    builder.configure().await.unwrap();
    builder.configure_with(true, true).await.unwrap();

    assert_eq!(configure_lines(&read_log(&log)), 2);
    assert_eq!(builder.state(), BuildState::Configured);
}

#[tokio::test]
async fn failed_configure_retries_once_and_cleans_up() {
    let (_temp, project, cmake, log) = setup(3, 0);
    let mut builder = builder(&project, &cmake).await;

    let err = builder.configure().await.unwrap_err();
    assert!(matches!(err, BuildError::ConfigureFailed { code: 3 }));
    assert_eq!(configure_lines(&read_log(&log)), 2);
    assert_eq!(builder.state(), BuildState::Failed);
    assert!(!builder.config().work_dir().unwrap().exists());
}

#[tokio::test]
async fn configure_without_retry_runs_once() {
    let (_temp, project, cmake, log) = setup(1, 0);
    let mut builder = builder(&project, &cmake).await;

    let err = builder.configure_with(false, false).await.unwrap_err();
    assert!(matches!(err, BuildError::ConfigureFailed { code: 1 }));
    assert_eq!(configure_lines(&read_log(&log)), 1);
}

#[tokio::test]
async fn build_configures_then_compiles() {
    let (_temp, project, cmake, log) = setup(0, 0);
    let mut builder = builder(&project, &cmake).await;

    builder.build().await.unwrap();
    assert_eq!(builder.state(), BuildState::Built);

    let lines = read_log(&log);
    assert_eq!(configure_lines(&lines), 1);

    let build = lines.iter().find(|l| l.starts_with("--build")).unwrap();
    assert!(build.contains("--config RelWithDebInfo"));

    let makeflags = lines.iter().find(|l| l.starts_with("MAKEFLAGS=")).unwrap();
    if std::env::var_os("MAKEFLAGS").is_none() {
        assert!(makeflags.starts_with("MAKEFLAGS=-j"), "{makeflags}");
    }
}

#[tokio::test]
async fn second_build_reuses_configuration() {
    let (_temp, project, cmake, log) = setup(0, 0);
    let mut builder = builder(&project, &cmake).await;

    builder.build().await.unwrap();
    builder.build().await.unwrap();

    let lines = read_log(&log);
    assert_eq!(configure_lines(&lines), 1);
    assert_eq!(lines.iter().filter(|l| l.starts_with("--build")).count(), 2);
}

#[tokio::test]
async fn failed_build_reports_exit_code() {
    let (_temp, project, cmake, _log) = setup(0, 2);
    let mut builder = builder(&project, &cmake).await;

    let err = builder.build().await.unwrap_err();
    assert!(matches!(err, BuildError::BuildFailed { code: 2 }));
    assert_eq!(builder.state(), BuildState::Failed);
}

#[tokio::test]
async fn clean_removes_build_directory() {
    let (_temp, project, cmake, _log) = setup(0, 0);
    let mut builder = builder(&project, &cmake).await;

    builder.configure().await.unwrap();
    let build_dir = builder.config().build_dir.clone();
    assert!(build_dir.exists());

    let stats = builder.clean().await.unwrap();
    assert!(stats.files >= 1);
    assert!(!build_dir.exists());
    assert_eq!(builder.state(), BuildState::Uninitialized);
}

#[tokio::test]
async fn missing_cmake_override_is_a_missing_tool() {
    let (_temp, project, _cmake, log) = setup(0, 0);
    let mut builder = builder(&project, Path::new("/nonexistent/cmake")).await;

    let err = builder.configure().await.unwrap_err();
    assert!(matches!(err, BuildError::MissingBuildTool(_)));
    assert!(read_log(&log).is_empty());
    assert_eq!(builder.state(), BuildState::Failed);
}
