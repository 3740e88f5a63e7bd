//! Build command
//!
//! Configure when needed, then compile the add-on

use addonkit::{BuildOptions, Builder, Config};
use anyhow::{Context, Result};

/// Build the project, using a prebuilt binary when allowed and loadable
pub(crate) async fn run(options: BuildOptions, config: &Config) -> Result<()> {
    let mut builder = Builder::new(options, config)
        .await
        .context("Failed to prepare build")?;

    builder.build().await?;

    println!(
        ">> Build complete, output in {}",
        builder.config().build_dir.display()
    );
    Ok(())
}
