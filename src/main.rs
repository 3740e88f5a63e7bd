//! addonkit command-line interface
//!
//! Configure and build Node-API add-ons with `CMake`

use addonkit::Config;
use addonkit::builder::{BuildMode, BuildOptions};
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use std::path::PathBuf;
use std::process;

/// Display an error and every error in its source chain
fn display_error(err: &anyhow::Error) {
    eprintln!("error: {err}");

    let mut source = err.source();
    while let Some(err) = source {
        eprintln!("caused by: {err}");
        source = err.source();
    }
}

#[derive(Debug, Parser)]
#[command(name = "addonkit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build Node-API native add-ons with CMake", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub(crate) struct Cli {
    /// Print debug output to stderr
    #[arg(long, global = true)]
    log_debug: bool,

    /// Config file path (overrides default)
    #[arg(long = "config-file", global = true)]
    config_file: Option<PathBuf>,

    /// Avoid loading any .addonkit.toml file
    #[arg(long, global = true)]
    norc: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Options for the default `build` command
    #[command(flatten)]
    build: BuildArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Configure the project with CMake
    Configure {
        #[command(flatten)]
        project: ProjectArgs,

        /// Reconfigure even if the CMake cache is up to date
        #[arg(long)]
        force: bool,
    },

    /// Configure if needed, then build (default)
    Build(BuildArgs),

    /// Remove the build directory
    Clean {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

/// Options shared by every command
#[derive(Args, Debug, Clone, Default)]
struct ProjectArgs {
    /// Directory containing CMakeLists.txt
    #[arg(short = 'd', long = "directory")]
    directory: Option<PathBuf>,

    /// Directory containing package.json (defaults to the nearest parent)
    #[arg(short = 'p', long = "package")]
    package: Option<PathBuf>,

    /// Output directory
    #[arg(short = 'O', long = "out")]
    out: Option<PathBuf>,

    /// Build type: RelWithDebInfo, Debug or Release
    #[arg(short = 'B', long = "config", value_parser = parse_mode)]
    mode: Option<BuildMode>,

    /// Shortcut for --config Debug
    #[arg(short = 'D', long = "debug", conflicts_with = "mode")]
    debug: bool,

    /// Target architecture (ia32, x64, arm64, armhf, riscv64d, ...)
    #[arg(short = 'a', long)]
    arch: Option<String>,

    /// Node version to build against (e.g. 20.11.1)
    #[arg(short = 'v', long = "runtime-version", value_parser = parse_runtime_version)]
    runtime_version: Option<String>,

    /// CMake toolset
    #[arg(short = 't', long)]
    toolset: Option<String>,

    /// Use Clang instead of the default compiler
    #[arg(short = 'C', long)]
    prefer_clang: bool,
}

#[derive(Args, Debug, Clone, Default)]
struct BuildArgs {
    #[command(flatten)]
    project: ProjectArgs,

    /// Build only this target (repeatable)
    #[arg(short = 'T', long = "target")]
    targets: Vec<String>,

    /// Show the full compiler command lines
    #[arg(long)]
    verbose: bool,

    /// Use the project's prebuilt binary when it loads
    #[arg(long)]
    prebuild: bool,
}

impl ProjectArgs {
    fn into_options(self) -> BuildOptions {
        let mode = if self.debug {
            Some(BuildMode::Debug)
        } else {
            self.mode
        };

        BuildOptions {
            project_dir: self.directory,
            package_dir: self.package,
            build_dir: self.out,
            runtime_version: self.runtime_version,
            arch: self.arch,
            toolset: self.toolset,
            prefer_clang: self.prefer_clang.then_some(true),
            mode,
            ..BuildOptions::default()
        }
    }
}

impl BuildArgs {
    fn into_options(self) -> BuildOptions {
        BuildOptions {
            targets: self.targets,
            verbose: self.verbose,
            prebuild: self.prebuild,
            ..self.project.into_options()
        }
    }
}

fn parse_mode(value: &str) -> Result<BuildMode, String> {
    value.parse::<BuildMode>().map_err(|e| e.to_string())
}

fn parse_runtime_version(value: &str) -> Result<String, String> {
    let pattern = Regex::new(r"^\d+\.\d+\.\d+$").map_err(|e| e.to_string())?;
    if pattern.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(format!("'{value}' is not a valid runtime version (expected X.Y.Z)"))
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_with_options(cli.config_file.as_deref(), cli.norc)?;

    match cli.command {
        Some(Commands::Configure { project, force }) => {
            commands::configure::run(project.into_options(), &config, force).await
        }
        Some(Commands::Build(args)) => commands::build::run(args.into_options(), &config).await,
        Some(Commands::Clean { project }) => {
            commands::clean::run(project.into_options(), &config).await
        }
        None => commands::build::run(cli.build.into_options(), &config).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    addonkit::init_debug(cli.log_debug);

    if let Err(e) = run(cli).await {
        display_error(&e);
        process::exit(1);
    }
}

mod commands;
