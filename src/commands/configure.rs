//! Configure command
//!
//! Run the `CMake` configuration step without building

use addonkit::{BuildOptions, Builder, Config};
use anyhow::{Context, Result};

/// Configure the project; `force` ignores an up-to-date `CMake` cache
pub(crate) async fn run(options: BuildOptions, config: &Config, force: bool) -> Result<()> {
    let mut builder = Builder::new(options, config)
        .await
        .context("Failed to prepare build")?;

    builder.configure_with(true, force).await?;

    println!(">> Configured in {}", builder.config().work_dir()?.display());
    Ok(())
}
