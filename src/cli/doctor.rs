//! Doctor command - check environment

use super::{EXIT_PASS, EXIT_TOOL_UNAVAILABLE};
use crate::config::{PolicyConfig, UserConfig};
use crate::validators::{default_validators, deployment, tool_registry};
use anyhow::Result;
use console::style;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

pub fn run(policy: &PolicyConfig) -> Result<i32> {
    println!("\n{} armvet doctor\n", style("🩺").bold());

    let validators = default_validators();
    let registry = tool_registry(&validators, policy);
    let mut missing_enabled = Vec::new();

    for name in registry.names() {
        let Some(spec) = registry.get(name) else {
            continue;
        };
        let enabled = policy.is_tool_enabled(name);
        let marker = if enabled { "enabled" } else { "disabled" };
        match find_program(&spec.program) {
            Some(found) => println!(
                "{} {:<22} {} {}",
                style("✓").green(),
                name,
                style(found.display()).cyan(),
                style(format!("({})", marker)).dim()
            ),
            None => {
                println!(
                    "{} {:<22} {} not found {}",
                    style("○").yellow(),
                    name,
                    spec.program.to_string_lossy(),
                    style(format!("({})", marker)).dim()
                );
                if enabled {
                    missing_enabled.push(name.to_string());
                }
            }
        }
    }

    for unknown in policy
        .tools
        .enabled
        .iter()
        .filter(|t| registry.get(t).is_none())
    {
        println!("{} {:<22} unknown validator", style("✗").red(), unknown);
        missing_enabled.push(unknown.clone());
    }

    if policy.is_tool_enabled(deployment::NAME) {
        if UserConfig::load().client_secret().is_some() {
            println!("{} Deployment credentials: configured", style("✓").green());
        } else {
            println!("{} Deployment credentials: none", style("○").yellow());
            println!("  Set ARMVET_CLIENT_SECRET or [deployment] client_secret in the user config");
        }
    }

    if missing_enabled.is_empty() {
        println!("\n{} All enabled validators are available", style("✓").green());
        Ok(EXIT_PASS)
    } else {
        println!(
            "\n{} Enabled but unavailable: {}",
            style("✗").red(),
            missing_enabled.join(", ")
        );
        Ok(EXIT_TOOL_UNAVAILABLE)
    }
}

/// Resolve a program the way the invoker's child would: an explicit path
/// as-is, a bare name through `PATH`
fn find_program(program: &OsStr) -> Option<PathBuf> {
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return as_path.is_file().then(|| as_path.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
