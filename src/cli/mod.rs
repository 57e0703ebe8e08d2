//! CLI command definitions and handlers

mod doctor;
mod init;
mod optimize;
mod validate;

use crate::config::{load_policy_config, ConfigError, PolicyConfig};
use crate::models::ArtifactKind;
use crate::pipeline::PipelineError;
use crate::reporters::OutputFormat;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressStyle;
use std::path::{Path, PathBuf};

pub const EXIT_PASS: i32 = 0;
pub const EXIT_FAIL: i32 = 1;
pub const EXIT_INPUT_REJECTED: i32 = 2;
pub const EXIT_TOOL_UNAVAILABLE: i32 = 3;
pub const EXIT_CONFIG: i32 = 4;
pub const EXIT_CANCELLED: i32 = 130;

/// Parse a score threshold (0-100)
fn parse_threshold(s: &str) -> Result<u32, String> {
    let n: u32 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if n > 100 {
        Err("threshold cannot exceed 100".to_string())
    } else {
        Ok(n)
    }
}

/// armvet - Azure Marketplace package validation
#[derive(Parser, Debug)]
#[command(name = "armvet")]
#[command(
    version,
    about = "Validate, score and fix Azure Marketplace ARM template packages",
    after_help = "\
Examples:
  armvet validate ./package                    Validate a whole offer package
  armvet validate mainTemplate.json --format json
  armvet validate . --tool arm-ttk --tool template-analyzer
  armvet optimize ./package                    Show the fixes that would apply
  armvet optimize ./package --apply            Apply them and re-validate
  armvet doctor                                Check which validators are installed"
)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    /// Policy file (default: armvet.toml in the package root)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate templates, UI definitions or whole packages
    Validate {
        /// Files or package directories to validate
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Artifact kind (inferred from the path when omitted)
        #[arg(long)]
        kind: Option<ArtifactKind>,

        /// Output format: text, json
        #[arg(long, short = 'f', default_value = "text")]
        format: OutputFormat,

        /// Passing score (overrides the policy threshold)
        #[arg(long, value_parser = parse_threshold)]
        threshold: Option<u32>,

        /// External validators to run (overrides tools.enabled; repeatable)
        #[arg(long = "tool")]
        tools: Vec<String>,

        /// Write the report to a file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Propose or apply automatic fixes, then re-validate
    Optimize {
        /// File or package directory to optimize
        path: PathBuf,

        /// Artifact kind (inferred from the path when omitted)
        #[arg(long)]
        kind: Option<ArtifactKind>,

        /// Write the fixes (default: only list them)
        #[arg(long)]
        apply: bool,

        /// Output format: text, json
        #[arg(long, short = 'f', default_value = "text")]
        format: OutputFormat,

        /// Passing score (overrides the policy threshold)
        #[arg(long, value_parser = parse_threshold)]
        threshold: Option<u32>,

        /// External validators to run (overrides tools.enabled; repeatable)
        #[arg(long = "tool")]
        tools: Vec<String>,
    },

    /// Check which external validators are installed
    Doctor,

    /// Write an example armvet.toml
    Init {
        /// Package directory (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing armvet.toml
        #[arg(long)]
        force: bool,
    },
}

/// Run the CLI and return the process exit code
pub fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Validate {
            paths,
            kind,
            format,
            threshold,
            tools,
            output,
        } => {
            let policy = load_policy(cli.config.as_deref(), &paths[0], threshold, &tools)?;
            validate::run(&policy, &paths, kind, format, output.as_deref())
        }
        Commands::Optimize {
            path,
            kind,
            apply,
            format,
            threshold,
            tools,
        } => {
            let policy = load_policy(cli.config.as_deref(), &path, threshold, &tools)?;
            optimize::run(&policy, &path, kind, apply, format)
        }
        Commands::Doctor => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            let policy = load_policy(cli.config.as_deref(), &cwd, None, &[])?;
            doctor::run(&policy)
        }
        Commands::Init { path, force } => init::run(&path, force),
    }
}

/// Load the policy for `target` and apply command-line overrides.
///
/// With no `allowed_roots` configured, validation is confined to the
/// current directory.
fn load_policy(
    explicit: Option<&Path>,
    target: &Path,
    threshold: Option<u32>,
    tools: &[String],
) -> Result<PolicyConfig> {
    let package_root = if target.is_dir() {
        target
    } else {
        target.parent().unwrap_or_else(|| Path::new("."))
    };
    let mut policy = load_policy_config(explicit, package_root)?;

    if let Some(threshold) = threshold {
        policy.threshold = threshold;
    }
    if !tools.is_empty() {
        policy.tools.enabled = tools.to_vec();
    }
    if policy.allowed_roots.is_empty() {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        policy.allowed_roots.push(cwd);
    }
    Ok(policy)
}

/// Map a failed run to its exit code
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<PipelineError>() {
        return match e {
            PipelineError::InputRejected(_) => EXIT_INPUT_REJECTED,
            PipelineError::ToolUnavailable(_) => EXIT_TOOL_UNAVAILABLE,
            PipelineError::Config(_) => EXIT_CONFIG,
            PipelineError::Cancelled => EXIT_CANCELLED,
            _ => EXIT_FAIL,
        };
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return EXIT_CONFIG;
    }
    EXIT_FAIL
}

/// Create spinner progress style
fn create_spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
