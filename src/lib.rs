//! addonkit internal library code
//!
//! Builds Node-API add-ons with `CMake`: works out the target architecture,
//! provisions runtime headers and import libraries, and drives the
//! configure and build steps.

pub mod arch;
pub mod archive;
pub mod builder;
pub mod compat;
pub mod config;
pub mod debug;
pub mod download;
pub mod elf;
pub mod env_vars;
pub mod paths;
pub mod project;
pub mod runtime;
pub mod stats;

// Re-export common types for convenience
pub use arch::{Triplet, determine_arch, host_platform};
pub use archive::{ArchiveError, extract, extract_targz};
pub use builder::{BuildError, BuildMode, BuildOptions, BuildState, Builder};
pub use compat::{CompatError, CompatibilityRequirement, check_compatibility, compare_versions};
pub use config::Config;
pub use debug::{debug_log, init_debug, is_debug_enabled};
pub use download::{DownloadError, Fetcher};
pub use elf::{ExecutableHeader, HeaderError, decode_header};
pub use project::{ProjectError, ProjectOptions};
pub use runtime::Runtime;
pub use stats::{Stats, collect_stats, human_bytes};
