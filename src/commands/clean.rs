//! Clean command
//!
//! Remove the build directory and everything in it

use addonkit::{BuildOptions, Builder, Config, human_bytes};
use anyhow::{Context, Result};

/// Remove the build directory, reporting how much space was freed
pub(crate) async fn run(options: BuildOptions, config: &Config) -> Result<()> {
    let mut builder = Builder::new(options, config)
        .await
        .context("Failed to prepare build")?;
    let build_dir = builder.config().build_dir.clone();

    let stats = builder.clean().await?;

    if stats.files == 0 {
        println!("Nothing to clean in {}", build_dir.display());
    } else {
        println!(
            "Removed {} ({} files, {})",
            build_dir.display(),
            stats.files,
            human_bytes(stats.total_size)
        );
    }
    Ok(())
}
