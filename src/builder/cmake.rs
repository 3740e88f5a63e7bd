//! `CMake` invocation
//!
//! Locates the `cmake` executable and assembles the configure and build
//! command lines. Argument assembly is pure so it can be checked without a
//! toolchain.
//!
//! ```bash
//! cd build/v20.11.1_x64
//! cmake <project> -DNODE_JS_INCLUDE_DIRS=... -DCMAKE_BUILD_TYPE=RelWithDebInfo ...
//! cmake --build . --config RelWithDebInfo
//! ```

use super::probe::{Probe, probe_tool};
use super::types::BuildMode;
use crate::arch::Triplet;
use crate::paths::to_forward_slashes;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

const OUTPUT_KINDS: [&str; 3] = ["ARCHIVE", "RUNTIME", "LIBRARY"];
const OUTPUT_SUFFIXES: [&str; 4] = ["", "_DEBUG", "_RELEASE", "_RELWITHDEBINFO"];

/// A usable `cmake` executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CMake {
    program: PathBuf,
}

impl CMake {
    /// Find `CMake`.
    ///
    /// Priority order:
    /// 1. explicit path
    /// 2. `CMAKE` environment variable
    /// 3. `cmake` answering `--version`
    /// 4. the Kitware registry key (Windows only)
    ///
    /// An explicit path or `CMAKE` value that does not resolve to an
    /// executable yields `None` rather than falling through.
    pub async fn locate(explicit: Option<&Path>) -> Option<Self> {
        if let Some(path) = explicit {
            return Self::resolve(path);
        }

        if let Some(path) = crate::env_vars::cmake() {
            return Self::resolve(&path);
        }

        match probe_tool("cmake", &["--version"]).await {
            Probe::Present => return Some(Self::at("cmake")),
            Probe::Failed(reason) => crate::debug!("cmake is not usable: {reason}"),
            Probe::Absent => {}
        }

        if cfg!(windows) {
            return registry_install_dir()
                .await
                .map(|dir| Self::at(dir.join("bin").join("cmake.exe")));
        }

        None
    }

    /// Accept a user-supplied program only if it names an executable
    fn resolve(program: &Path) -> Option<Self> {
        match which::which(program) {
            Ok(path) => Some(Self::at(path)),
            Err(e) => {
                crate::debug!("Ignoring cmake override {}: {e}", program.display());
                None
            }
        }
    }

    pub fn at(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run `cmake` in `cwd` with inherited stdio.
    pub async fn run(
        &self,
        args: &[String],
        cwd: &Path,
        env: &[(String, String)],
    ) -> io::Result<ExitStatus> {
        crate::debug!("Running {} {}", self.program.display(), args.join(" "));

        tokio::process::Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .status()
            .await
    }
}

async fn registry_install_dir() -> Option<PathBuf> {
    let output = tokio::process::Command::new("reg")
        .args(["query", r"HKEY_LOCAL_MACHINE\SOFTWARE\Kitware\CMake", "/v", "InstallDir"])
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    parse_registry_install_dir(&String::from_utf8_lossy(&output.stdout))
}

/// Extract the `InstallDir` value from `reg query` output.
fn parse_registry_install_dir(output: &str) -> Option<PathBuf> {
    let pattern = Regex::new(r"InstallDir\s+REG_[A-Z_]+\s+(.+)").ok()?;
    pattern
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| PathBuf::from(m.as_str().trim()))
        .filter(|path| !path.as_os_str().is_empty())
}

/// How the add-on links against the runtime on Windows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowsLink {
    /// Module definition file from a local API directory
    pub def: Option<PathBuf>,
    /// `<work>/node.lib`, passed to `CMake` even when a `.def` file is used
    pub lib: PathBuf,
}

/// Everything `configure_args` needs to know
#[derive(Debug, Clone, Copy)]
pub struct ConfigureContext<'a> {
    pub project_dir: &'a Path,
    pub build_dir: &'a Path,
    pub triplet: &'a Triplet,
    pub mode: BuildMode,
    pub toolset: Option<&'a str>,
    pub prefer_clang: bool,
    pub include_dir: &'a Path,
    pub windows_link: Option<&'a WindowsLink>,
    /// Directory the bundled assets were written to
    pub assets_dir: &'a Path,
    pub ninja: bool,
    pub ccache: bool,
}

/// Assemble the `cmake` configure command line.
pub fn configure_args(ctx: &ConfigureContext<'_>) -> Vec<String> {
    let mut args = vec![to_forward_slashes(ctx.project_dir)];

    args.push(format!(
        "-DNODE_JS_INCLUDE_DIRS={}",
        to_forward_slashes(ctx.include_dir)
    ));

    if ctx.triplet.is_windows() {
        if let Some(link) = ctx.windows_link {
            if let Some(def) = &link.def {
                args.push(format!("-DNODE_JS_LINK_DEF={}", to_forward_slashes(def)));
            }
            args.push(format!("-DNODE_JS_LINK_LIB={}", to_forward_slashes(&link.lib)));
        }

        // Resolve node.exe symbols against whatever executable loads the add-on
        args.push(format!(
            "-DNODE_JS_SOURCES={}",
            to_forward_slashes(&ctx.assets_dir.join("win_delay_hook.c"))
        ));
        args.push(format!("-DNODE_JS_LINK_FLAGS={}", msvc_link_flags(&ctx.triplet.arch)));

        if let Some(platform) = msvc_platform(&ctx.triplet.arch) {
            args.push("-A".to_string());
            args.push(platform.to_string());
        }
    } else if ctx.triplet.is_macos() {
        args.push("-DNODE_JS_LINK_FLAGS=-undefined;dynamic_lookup".to_string());
        if let Some(arch) = osx_architecture(&ctx.triplet.arch) {
            args.push(format!("-DCMAKE_OSX_ARCHITECTURES={arch}"));
        }
    }

    if !ctx.triplet.is_windows() {
        if ctx.ninja {
            args.push("-G".to_string());
            args.push("Ninja".to_string());
        }
        if ctx.ccache {
            args.push("-DCMAKE_C_COMPILER_LAUNCHER=ccache".to_string());
            args.push("-DCMAKE_CXX_COMPILER_LAUNCHER=ccache".to_string());
        }
    }

    if ctx.prefer_clang {
        if ctx.triplet.is_windows() {
            if ctx.toolset.is_none() {
                args.push("-T".to_string());
                args.push("ClangCL".to_string());
            }
        } else {
            args.push("-DCMAKE_C_COMPILER=clang".to_string());
            args.push("-DCMAKE_CXX_COMPILER=clang++".to_string());
        }
    }

    if let Some(toolset) = ctx.toolset {
        args.push("-T".to_string());
        args.push(toolset.to_string());
    }

    args.push(format!("-DCMAKE_BUILD_TYPE={}", ctx.mode));

    let build_dir = to_forward_slashes(ctx.build_dir);
    for kind in OUTPUT_KINDS {
        for suffix in OUTPUT_SUFFIXES {
            args.push(format!("-DCMAKE_{kind}_OUTPUT_DIRECTORY{suffix}={build_dir}"));
        }
    }

    args.push(format!(
        "-DCMAKE_MODULE_PATH={}",
        to_forward_slashes(ctx.assets_dir)
    ));
    args.push("--no-warn-unused-cli".to_string());

    args
}

/// Assemble the `cmake --build` command line.
pub fn build_args(work_dir: &Path, mode: BuildMode, verbose: bool, targets: &[String]) -> Vec<String> {
    let mut args = vec![
        "--build".to_string(),
        to_forward_slashes(work_dir),
        "--config".to_string(),
        mode.to_string(),
    ];

    if verbose {
        args.push("--verbose".to_string());
    }

    for target in targets {
        args.push("--target".to_string());
        args.push(target.clone());
    }

    args
}

/// The delay-loaded import library has no safe exception handler table,
/// which the 32-bit x86 and ARM64 linkers insist on by default
fn msvc_link_flags(arch: &str) -> &'static str {
    match arch {
        "ia32" | "arm64" => "/DELAYLOAD:node.exe;/SAFESEH:NO",
        _ => "/DELAYLOAD:node.exe",
    }
}

fn msvc_platform(arch: &str) -> Option<&'static str> {
    match arch {
        "ia32" => Some("Win32"),
        "x64" => Some("x64"),
        "arm64" => Some("ARM64"),
        _ => None,
    }
}

fn osx_architecture(arch: &str) -> Option<&'static str> {
    match arch {
        "x64" => Some("x86_64"),
        "arm64" => Some("arm64"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(triplet: &'a Triplet, link: Option<&'a WindowsLink>) -> ConfigureContext<'a> {
        ConfigureContext {
            project_dir: Path::new("/src/addon"),
            build_dir: Path::new("/src/addon/build"),
            triplet,
            mode: BuildMode::Release,
            toolset: None,
            prefer_clang: false,
            include_dir: Path::new("/src/addon/build/v20.0.0_x64/headers/include/node"),
            windows_link: link,
            assets_dir: Path::new("/src/addon/build/v20.0.0_x64/assets"),
            ninja: false,
            ccache: false,
        }
    }

    fn has(args: &[String], needle: &str) -> bool {
        args.iter().any(|a| a == needle)
    }

    #[test]
    fn linux_arguments() {
        let triplet = Triplet::new("linux", "x64");
        let args = configure_args(&context(&triplet, None));

        assert_eq!(args.first().map(String::as_str), Some("/src/addon"));
        assert!(has(
            &args,
            "-DNODE_JS_INCLUDE_DIRS=/src/addon/build/v20.0.0_x64/headers/include/node"
        ));
        assert!(has(&args, "-DCMAKE_BUILD_TYPE=Release"));
        assert!(has(&args, "-DCMAKE_MODULE_PATH=/src/addon/build/v20.0.0_x64/assets"));
        assert_eq!(args.last().map(String::as_str), Some("--no-warn-unused-cli"));
        assert!(!args.iter().any(|a| a.starts_with("-DNODE_JS_LINK")));
        assert!(!has(&args, "-A"));
        assert!(!has(&args, "-G"));
    }

    #[test]
    fn output_directories_cover_every_config() {
        let triplet = Triplet::new("linux", "x64");
        let args = configure_args(&context(&triplet, None));

        let outputs: Vec<_> = args
            .iter()
            .filter(|a| a.contains("_OUTPUT_DIRECTORY"))
            .collect();
        assert_eq!(outputs.len(), 12);
        assert!(outputs.iter().all(|a| a.ends_with("=/src/addon/build")));
        assert!(has(
            &args,
            "-DCMAKE_LIBRARY_OUTPUT_DIRECTORY_RELWITHDEBINFO=/src/addon/build"
        ));
    }

    fn downloaded_lib() -> WindowsLink {
        WindowsLink {
            def: None,
            lib: PathBuf::from("/w/node.lib"),
        }
    }

    #[test]
    fn windows_import_library() {
        let triplet = Triplet::new("win32", "ia32");
        let link = downloaded_lib();
        let args = configure_args(&context(&triplet, Some(&link)));

        assert!(has(&args, "-DNODE_JS_LINK_LIB=/w/node.lib"));
        assert!(!args.iter().any(|a| a.starts_with("-DNODE_JS_LINK_DEF")));
        assert!(has(&args, "-DNODE_JS_LINK_FLAGS=/DELAYLOAD:node.exe;/SAFESEH:NO"));
        assert!(has(
            &args,
            "-DNODE_JS_SOURCES=/src/addon/build/v20.0.0_x64/assets/win_delay_hook.c"
        ));
        let a = args.iter().position(|a| a == "-A").unwrap();
        assert_eq!(args.get(a + 1).map(String::as_str), Some("Win32"));
    }

    #[test]
    fn windows_link_flags_per_arch() {
        let link = downloaded_lib();
        for (arch, flags, platform) in [
            ("ia32", "/DELAYLOAD:node.exe;/SAFESEH:NO", "Win32"),
            ("x64", "/DELAYLOAD:node.exe", "x64"),
            ("arm64", "/DELAYLOAD:node.exe;/SAFESEH:NO", "ARM64"),
        ] {
            let triplet = Triplet::new("win32", arch);
            let args = configure_args(&context(&triplet, Some(&link)));

            let link_flags: Vec<_> = args
                .iter()
                .filter(|a| a.starts_with("-DNODE_JS_LINK_FLAGS="))
                .collect();
            assert_eq!(link_flags, [&format!("-DNODE_JS_LINK_FLAGS={flags}")], "{arch}");
            let a = args.iter().position(|a| a == "-A").unwrap();
            assert_eq!(args.get(a + 1).map(String::as_str), Some(platform), "{arch}");
        }
    }

    #[test]
    fn windows_def_file_and_clang() {
        let triplet = Triplet::new("win32", "arm64");
        let link = WindowsLink {
            def: Some(PathBuf::from("/api/def/node_api.def")),
            lib: PathBuf::from("/w/node.lib"),
        };
        let mut ctx = context(&triplet, Some(&link));
        ctx.prefer_clang = true;
        ctx.ninja = true;
        let args = configure_args(&ctx);

        assert!(has(&args, "-DNODE_JS_LINK_DEF=/api/def/node_api.def"));
        assert!(has(&args, "-DNODE_JS_LINK_LIB=/w/node.lib"));
        assert!(has(&args, "ARM64"));
        assert!(has(&args, "ClangCL"));
        assert!(!has(&args, "Ninja"));
    }

    #[test]
    fn macos_arguments() {
        let triplet = Triplet::new("darwin", "arm64");
        let args = configure_args(&context(&triplet, None));

        assert!(has(&args, "-DNODE_JS_LINK_FLAGS=-undefined;dynamic_lookup"));
        assert!(has(&args, "-DCMAKE_OSX_ARCHITECTURES=arm64"));
    }

    #[test]
    fn optional_tools_and_compilers() {
        let triplet = Triplet::new("linux", "arm64");
        let mut ctx = context(&triplet, None);
        ctx.ninja = true;
        ctx.ccache = true;
        ctx.prefer_clang = true;
        ctx.toolset = Some("custom");
        let args = configure_args(&ctx);

        let g = args.iter().position(|a| a == "-G").unwrap();
        assert_eq!(args.get(g + 1).map(String::as_str), Some("Ninja"));
        assert!(has(&args, "-DCMAKE_C_COMPILER_LAUNCHER=ccache"));
        assert!(has(&args, "-DCMAKE_CXX_COMPILER=clang++"));
        let t = args.iter().position(|a| a == "-T").unwrap();
        assert_eq!(args.get(t + 1).map(String::as_str), Some("custom"));
    }

    #[test]
    fn build_arguments() {
        let args = build_args(
            Path::new("/b/v20.0.0_x64"),
            BuildMode::Debug,
            true,
            &["addon".to_string(), "helper".to_string()],
        );
        assert_eq!(
            args,
            [
                "--build",
                "/b/v20.0.0_x64",
                "--config",
                "Debug",
                "--verbose",
                "--target",
                "addon",
                "--target",
                "helper"
            ]
        );
    }

    #[test]
    fn registry_output() {
        let output = "\r\nHKEY_LOCAL_MACHINE\\SOFTWARE\\Kitware\\CMake\r\n    InstallDir    REG_SZ    C:\\Program Files\\CMake\\\r\n\r\n";
        assert_eq!(
            parse_registry_install_dir(output),
            Some(PathBuf::from("C:\\Program Files\\CMake\\"))
        );
        assert_eq!(parse_registry_install_dir("ERROR: not found"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn explicit_cmake_wins() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("cmake");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cmake = CMake::locate(Some(&script)).await.unwrap();
        assert_eq!(cmake.program(), script);
    }

    #[tokio::test]
    async fn missing_explicit_cmake_is_not_found() {
        assert_eq!(CMake::locate(Some(Path::new("/nonexistent/addonkit/cmake"))).await, None);
    }
}
