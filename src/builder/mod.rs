//! Build orchestration
//!
//! A `Builder` owns one resolved `BuildConfig` and drives the add-on through
//! configure and build:
//! - check the project against the runtime version
//! - provision headers (and the Windows import library)
//! - run `CMake` to configure, retrying once from scratch on failure
//! - run `cmake --build`, or use a prebuilt binary when allowed
//!
//! The only persisted state is the `CMakeCache.txt` marker in the work
//! directory; it lets a second `configure()` skip re-running `CMake`.

pub mod cmake;
pub mod headers;
pub mod prebuild;
pub mod probe;
pub mod types;

pub use cmake::{CMake, ConfigureContext, WindowsLink};
pub use prebuild::PrebuildSource;
pub use probe::{Probe, probe_tool};
pub use types::{BuildConfig, BuildMode, BuildOptions, BuildState, ParseModeError};

use crate::arch::{self, Triplet};
use crate::archive::ArchiveError;
use crate::compat::{self, CompatError};
use crate::config::Config;
use crate::download::{DownloadError, Fetcher};
use crate::elf::HeaderError;
use crate::project::{ExpandContext, ProjectError, ProjectOptions};
use crate::runtime::{Runtime, RuntimeError};
use crate::stats::{self, Stats};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;

/// Marker left by a successful configure step
pub const CMAKE_CACHE_MARKER: &str = "CMakeCache.txt";

const CMAKE_LISTS: &str = "CMakeLists.txt";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Cannot find {0}, make sure it is installed and in your PATH")]
    MissingBuildTool(String),

    #[error("This directory does not appear to have a {}", path.display())]
    MissingProjectDescriptor { path: PathBuf },

    #[error("Failed to run configuration step (exit code {code})")]
    ConfigureFailed { code: i32 },

    #[error("Failed to run build step (exit code {code})")]
    BuildFailed { code: i32 },

    #[error("Unsupported architecture '{0}' for Windows import libraries")]
    UnsupportedArchitecture(String),

    #[error("Cannot derive a cache file name from prebuild URL {0}")]
    InvalidPrebuildUrl(String),

    #[error(transparent)]
    Compat(#[from] CompatError),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    InvalidMode(#[from] ParseModeError),

    #[error("Failed to {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] anyhow::Error),
}

impl BuildError {
    /// Wrap an IO error with context for use in `map_err`
    pub fn wrap_io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }
}

/// Drives one add-on through configure and build
#[derive(Debug)]
pub struct Builder {
    config: BuildConfig,
    project: ProjectOptions,
    state: BuildState,
    /// Located on first use
    cmake: Option<CMake>,
    fetcher: Option<Fetcher>,
}

impl Builder {
    /// Resolve options against the config file, the environment and the
    /// project descriptor.
    ///
    /// The runtime is only consulted for what the options leave open: its
    /// version when none is given and its executable header when the
    /// architecture needs refining. Without a runtime or an explicit version
    /// the builder can still clean, as long as the output directory does not
    /// depend on the version.
    pub async fn new(options: BuildOptions, config: &Config) -> Result<Self, BuildError> {
        let project_dir = match options.project_dir {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(BuildError::wrap_io("read current directory"))?,
        };

        let project = ProjectOptions::load(&project_dir, options.package_dir.as_deref())?;

        let runtime = match Runtime::locate(options.runtime.as_deref(), Some(config)) {
            Ok(runtime) => Some(runtime),
            Err(e) => {
                crate::debug!("{e}");
                None
            }
        };

        let runtime_version = match (options.runtime_version, &runtime) {
            (Some(version), _) => Some(version),
            (None, Some(runtime)) => match runtime.version().await {
                Ok(version) => Some(version),
                Err(e) => {
                    crate::debug!("{e}");
                    None
                }
            },
            (None, None) => None,
        };

        let arch = match options.arch {
            Some(arch) => arch,
            None => {
                let executable = match &runtime {
                    Some(runtime) => runtime.binary().to_path_buf(),
                    None => std::env::current_exe()
                        .map_err(BuildError::wrap_io("locate the current executable"))?,
                };
                arch::determine_arch(&executable)?
            }
        };

        let triplet = Triplet::new(arch::host_platform(), arch);

        let build_dir = match options.build_dir {
            Some(dir) => dir,
            None => {
                let needs_version = project
                    .settings
                    .output
                    .as_deref()
                    .is_some_and(|output| crate::project::mentions_placeholder(output, "version"));
                let version = if needs_version {
                    runtime_version.as_deref().ok_or(RuntimeError::NotFound)?
                } else {
                    ""
                };
                project
                    .output_dir(&ExpandContext {
                        version,
                        platform: &triplet.platform,
                        arch: &triplet.arch,
                    })
                    .unwrap_or_else(|| project_dir.join("build"))
            }
        };
        let work_dir = runtime_version
            .as_deref()
            .map(|version| build_dir.join(BuildConfig::work_dir_name(version, &triplet.arch)));

        let mode = match (options.mode, config.mode.as_deref()) {
            (Some(mode), _) => mode,
            (None, Some(mode)) => mode.parse::<BuildMode>()?,
            (None, None) => BuildMode::default(),
        };

        let resolved = BuildConfig {
            cache_dir: crate::config::cache_dir(Some(config))?,
            dist_url: crate::config::dist_url(Some(config)),
            toolset: options.toolset.or_else(|| config.toolset.clone()),
            prefer_clang: options
                .prefer_clang
                .or(config.prefer_clang)
                .unwrap_or(false),
            project_dir,
            package_dir: options.package_dir,
            build_dir,
            work_dir,
            runtime_version,
            triplet,
            mode,
            targets: options.targets,
            verbose: options.verbose,
            prebuild: options.prebuild,
            runtime,
            cmake: options.cmake,
        };

        crate::debug!(
            "Target {} for Node {} in {}",
            resolved.triplet,
            resolved.runtime_version.as_deref().unwrap_or("(unknown)"),
            resolved.build_dir.display()
        );

        Ok(Self {
            config: resolved,
            project,
            state: BuildState::Uninitialized,
            cmake: None,
            fetcher: None,
        })
    }

    #[must_use]
    pub fn state(&self) -> BuildState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    #[must_use]
    pub fn project(&self) -> &ProjectOptions {
        &self.project
    }

    /// Configure with one retry, skipping the step when already configured.
    pub async fn configure(&mut self) -> Result<(), BuildError> {
        self.configure_with(true, false).await
    }

    /// Configure the project.
    ///
    /// Unless `force` is set, an up-to-date `CMakeCache.txt` makes this a
    /// no-op. When `retry` is set a failed `CMake` run is repeated once from
    /// an empty work directory.
    pub async fn configure_with(&mut self, retry: bool, force: bool) -> Result<(), BuildError> {
        let force = force || self.state == BuildState::Failed;
        self.state = BuildState::Configuring;
        let result = self.run_configure(retry, force).await;
        self.settle(result, BuildState::Configured)
    }

    /// Build the project, configuring first when needed.
    pub async fn build(&mut self) -> Result<(), BuildError> {
        let force = self.state == BuildState::Failed;
        self.state = BuildState::Building;
        let result = self.run_build(force).await;
        self.settle(result, BuildState::Built)
    }

    /// Remove the build directory and report what it held.
    pub async fn clean(&mut self) -> Result<Stats, BuildError> {
        let build_dir = self.config.build_dir.clone();

        let result = async {
            let stats = stats::collect_stats(&build_dir).map_err(|e| BuildError::Io {
                context: format!("scan {}", build_dir.display()),
                source: e.into(),
            })?;
            crate::paths::remove_dir_recursive(&build_dir)
                .await
                .map_err(BuildError::wrap_io(format!("remove {}", build_dir.display())))?;
            Ok(stats)
        }
        .await;

        match result {
            Ok(stats) => {
                self.state = BuildState::Uninitialized;
                Ok(stats)
            }
            Err(e) => {
                self.state = BuildState::Failed;
                Err(e)
            }
        }
    }

    fn settle(&mut self, result: Result<(), BuildError>, success: BuildState) -> Result<(), BuildError> {
        self.state = if result.is_ok() {
            success
        } else {
            BuildState::Failed
        };
        result
    }

    fn check_compatibility(&self) -> Result<(), BuildError> {
        compat::check_compatibility(
            &self.project.requirement(),
            self.config.runtime_version()?,
            &self.project.name,
        )?;
        Ok(())
    }

    async fn cmake(&mut self) -> Result<CMake, BuildError> {
        if let Some(cmake) = &self.cmake {
            return Ok(cmake.clone());
        }

        let cmake = CMake::locate(self.config.cmake.as_deref())
            .await
            .ok_or_else(|| BuildError::MissingBuildTool("CMake".to_string()))?;
        crate::debug!("Using {}", cmake.program().display());
        self.cmake = Some(cmake.clone());
        Ok(cmake)
    }

    fn fetcher(&mut self) -> Result<Fetcher, BuildError> {
        if let Some(fetcher) = &self.fetcher {
            return Ok(fetcher.clone());
        }

        let fetcher = Fetcher::new()?;
        self.fetcher = Some(fetcher.clone());
        Ok(fetcher)
    }

    /// Whether `CMakeCache.txt` exists and is not older than `CMakeLists.txt`
    fn is_configured(&self, work_dir: &Path) -> bool {
        let marker = work_dir.join(CMAKE_CACHE_MARKER);
        let lists = self.config.project_dir.join(CMAKE_LISTS);

        let Ok(marker_time) = marker.metadata().and_then(|m| m.modified()) else {
            return false;
        };

        match lists.metadata().and_then(|m| m.modified()) {
            Ok(lists_time) => marker_time >= lists_time,
            Err(_) => true,
        }
    }

    fn expand_context(&self) -> Result<ExpandContext<'_>, BuildError> {
        Ok(ExpandContext {
            version: self.config.runtime_version()?,
            platform: &self.config.triplet.platform,
            arch: &self.config.triplet.arch,
        })
    }

    async fn run_configure(&mut self, retry: bool, force: bool) -> Result<(), BuildError> {
        let lists = self.config.project_dir.join(CMAKE_LISTS);
        if !lists.exists() {
            return Err(BuildError::MissingProjectDescriptor { path: lists });
        }

        self.check_compatibility()?;
        let cmake = self.cmake().await?;

        let work_dir = self.config.work_dir()?.to_path_buf();
        if !force && self.is_configured(&work_dir) {
            crate::debug!("{} is up to date, skipping configuration", CMAKE_CACHE_MARKER);
            return Ok(());
        }

        let attempts = if retry { 2 } else { 1 };
        let mut code = 0;
        for attempt in 1..=attempts {
            if attempt > 1 {
                println!(">> Configuration failed, retrying from a clean directory");
            }

            let status = self.configure_once(&cmake, &work_dir).await?;
            if status.success() {
                return Ok(());
            }

            code = status.code().unwrap_or(-1);
            crate::paths::remove_dir_recursive(&work_dir)
                .await
                .map_err(BuildError::wrap_io(format!("remove {}", work_dir.display())))?;
        }

        Err(BuildError::ConfigureFailed { code })
    }

    async fn configure_once(&mut self, cmake: &CMake, work_dir: &Path) -> Result<ExitStatus, BuildError> {
        println!(">> Running configuration");

        let fetcher = self.fetcher()?;
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(BuildError::wrap_io(format!("create {}", work_dir.display())))?;

        let api_dir = self.project.api_dir(&self.expand_context()?);
        let config = &self.config;
        let version = config.runtime_version()?;

        let include_dir = headers::provision_headers(
            &fetcher,
            api_dir.as_deref(),
            &config.cache_dir,
            work_dir,
            &config.dist_url,
            version,
        )
        .await?;

        let windows_link = if config.triplet.is_windows() {
            Some(
                headers::provision_import_library(
                    &fetcher,
                    api_dir.as_deref(),
                    &config.cache_dir,
                    work_dir,
                    &config.dist_url,
                    version,
                    &config.triplet.arch,
                )
                .await?,
            )
        } else {
            None
        };

        let assets_dir = headers::write_assets(work_dir)?;

        let native_tools = !config.triplet.is_windows();
        let ninja = native_tools && probe_tool("ninja", &["--version"]).await.is_present();
        let ccache = native_tools && probe_tool("ccache", &["--version"]).await.is_present();

        let args = cmake::configure_args(&ConfigureContext {
            project_dir: &config.project_dir,
            build_dir: &config.build_dir,
            triplet: &config.triplet,
            mode: config.mode,
            toolset: config.toolset.as_deref(),
            prefer_clang: config.prefer_clang,
            include_dir: &include_dir,
            windows_link: windows_link.as_ref(),
            assets_dir: &assets_dir,
            ninja,
            ccache,
        });

        run_cmake(cmake, &args, work_dir, &[]).await
    }

    async fn run_build(&mut self, force_configure: bool) -> Result<(), BuildError> {
        self.check_compatibility()?;

        if self.config.prebuild {
            match self.use_prebuild().await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => eprintln!("Failed to use prebuilt binary: {e}"),
            }
        }

        self.state = BuildState::Configuring;
        self.run_configure(true, force_configure).await?;
        self.state = BuildState::Building;

        let cmake = self.cmake().await?;
        let work_dir = self.config.work_dir()?;
        println!(">> Running build");

        let args = cmake::build_args(
            work_dir,
            self.config.mode,
            self.config.verbose,
            &self.config.targets,
        );

        let mut env = Vec::new();
        if crate::env_vars::makeflags().is_none() {
            let jobs = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
            env.push(("MAKEFLAGS".to_string(), format!("-j{jobs}")));
        }

        let status = run_cmake(&cmake, &args, work_dir, &env).await?;
        if status.success() {
            Ok(())
        } else {
            Err(BuildError::BuildFailed {
                code: status.code().unwrap_or(-1),
            })
        }
    }

    async fn use_prebuild(&mut self) -> Result<bool, BuildError> {
        let fetcher = self.fetcher()?;
        let ctx = self.expand_context()?;
        let Some(value) = self.project.prebuild(&ctx) else {
            crate::debug!("No prebuilt binary configured for {}", self.project.name);
            return Ok(false);
        };
        let require = self.project.require_path(&ctx);
        let source = PrebuildSource::parse(&value, &self.project.directory);

        prebuild::try_prebuild(
            &fetcher,
            prebuild::PrebuildRequest {
                project: &self.project.name,
                source,
                cache_dir: &self.config.cache_dir,
                build_dir: &self.config.build_dir,
                require,
                runtime: self.config.runtime.as_ref(),
            },
        )
        .await
    }
}

async fn run_cmake(
    cmake: &CMake,
    args: &[String],
    cwd: &Path,
    env: &[(String, String)],
) -> Result<ExitStatus, BuildError> {
    cmake
        .run(args, cwd, env)
        .await
        .map_err(BuildError::wrap_io(format!("run {}", cmake.program().display())))
}
