//! Init command - write an example policy file

use super::EXIT_PASS;
use crate::config::{CONFIG_FILE_NAME, EXAMPLE_CONFIG};
use anyhow::{Context, Result};
use console::style;
use std::path::Path;

/// Run the init command
pub fn run(path: &Path, force: bool) -> Result<i32> {
    let package_path = path
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))?;

    if !package_path.is_dir() {
        anyhow::bail!("Path is not a directory: {}", package_path.display());
    }

    let config_path = package_path.join(CONFIG_FILE_NAME);
    if config_path.exists() && !force {
        println!(
            "{} Config already exists at {} (use --force to overwrite)",
            style("○").yellow(),
            style(config_path.display()).cyan()
        );
        return Ok(EXIT_PASS);
    }

    std::fs::write(&config_path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!(
        "{} Created {}",
        style("✓").green(),
        style(config_path.display()).cyan()
    );
    println!(
        "\nNext: {} to validate this package",
        style("armvet validate .").bold()
    );
    Ok(EXIT_PASS)
}
