//! External validator adapters
//!
//! Each adapter knows three things about one tool:
//! - how to describe it to the invoker (`spec`, `arguments`)
//! - which artifacts and dimensions it covers
//! - how to turn its output into [`Finding`]s (`parse`)
//!
//! Adapters never spawn anything themselves; the pipeline hands their
//! arguments to the [`ProcessInvoker`](crate::process::ProcessInvoker).

pub mod arm_ttk;
pub mod bicep;
pub mod deployment;
pub mod template_analyzer;

pub use arm_ttk::ArmTtkValidator;
pub use bicep::BicepLintValidator;
pub use deployment::DeploymentValidator;
pub use template_analyzer::TemplateAnalyzerValidator;

use crate::config::{PolicyConfig, UserConfig};
use crate::input::{sanitize_for_display, CanonicalPath, Rejection};
use crate::models::{Dimension, Finding, Severity, ValidationTarget};
use crate::process::{ProcessResult, Secret, ToolArg, ToolRegistry, ToolSpec};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Output that could not be normalized at all
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("tool produced no output")]
    Empty,

    #[error("output is not valid {format}: {reason}")]
    Malformed { format: &'static str, reason: String },
}

impl ParseError {
    pub(crate) fn malformed(format: &'static str, reason: impl std::fmt::Display) -> Self {
        ParseError::Malformed {
            format,
            reason: sanitize_for_display(&reason.to_string()),
        }
    }
}

/// Normalized findings plus the count of records that were dropped for
/// missing a required field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub findings: Vec<Finding>,
    pub dropped: usize,
}

/// Arguments and optional secret for one run of a tool
#[derive(Debug, Default)]
pub struct Invocation {
    pub argv: Vec<ToolArg>,
    pub secret: Option<Secret>,
}

impl Invocation {
    pub fn new(argv: Vec<ToolArg>) -> Self {
        Self { argv, secret: None }
    }
}

/// Everything an adapter may read while building arguments or parsing
pub struct ValidatorContext<'a> {
    pub target: &'a ValidationTarget,
    /// The validated path of the target
    pub path: &'a CanonicalPath,
    pub policy: &'a PolicyConfig,
    pub user: &'a UserConfig,
}

impl ValidatorContext<'_> {
    /// Directory locations are reported relative to
    pub fn base_dir(&self) -> PathBuf {
        self.path.working_dir().into_path_buf()
    }
}

/// One external validator
pub trait Validator: Send + Sync {
    /// Name used in configuration, the registry and `Finding::source`
    fn name(&self) -> &str;

    /// How the invoker should run this tool
    fn spec(&self) -> ToolSpec;

    /// Whether this tool can check the target
    fn applies_to(&self, target: &ValidationTarget) -> bool;

    /// Dimensions this tool checks when it completes
    fn dimensions(&self) -> &'static [Dimension];

    /// Build the argv for one run
    fn arguments(&self, ctx: &ValidatorContext<'_>) -> Result<Invocation, Rejection>;

    /// Normalize a completed run's output
    fn parse(&self, result: &ProcessResult, ctx: &ValidatorContext<'_>)
        -> Result<ParsedOutput, ParseError>;
}

/// All validators armvet knows how to drive
pub fn default_validators() -> Vec<Box<dyn Validator>> {
    vec![
        Box::new(ArmTtkValidator),
        Box::new(TemplateAnalyzerValidator),
        Box::new(BicepLintValidator),
        Box::new(DeploymentValidator),
    ]
}

/// Build the invoker's allow-list from a validator set, applying program
/// overrides from the policy
pub fn tool_registry(validators: &[Box<dyn Validator>], policy: &PolicyConfig) -> ToolRegistry {
    let mut registry = validators
        .iter()
        .fold(ToolRegistry::new(), |registry, v| registry.register(v.spec()));
    for (tool, program) in &policy.tools.programs {
        if !registry.override_program(tool, program) {
            tracing::warn!(
                "Ignoring program override for unknown tool '{}'",
                sanitize_for_display(tool)
            );
        }
    }
    registry
}

/// Make a tool-reported file path presentable: strip a `file://` scheme and
/// the target's directory, then sanitize.
pub(crate) fn report_path(raw: &str, base: &Path) -> PathBuf {
    let raw = raw.strip_prefix("file://").unwrap_or(raw);
    let path = Path::new(raw);
    let relative = path.strip_prefix(base).unwrap_or(path);
    PathBuf::from(sanitize_for_display(&relative.to_string_lossy()))
}

/// Stable rule id from a free-form tool test name
pub(crate) fn rule_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Look `key` up in a case-insensitive table, falling back to `default`
pub(crate) fn lookup<T: Copy>(table: &[(&str, T)], key: &str, default: T) -> T {
    table
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| *v)
        .unwrap_or(default)
}

pub(crate) fn tool_finding(
    tool: &str,
    rule: &str,
    severity: Severity,
    dimension: Dimension,
    message: &str,
) -> Finding {
    Finding::new(
        sanitize_for_display(rule),
        tool,
        severity,
        dimension,
        sanitize_for_display(message),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::ArtifactKind;
    use tempfile::TempDir;

    pub struct Fixture {
        pub dir: TempDir,
        pub path: CanonicalPath,
        pub target: ValidationTarget,
        pub policy: PolicyConfig,
        pub user: UserConfig,
    }

    impl Fixture {
        pub fn new(file_name: &str, content: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let file = dir.path().join(file_name);
            std::fs::write(&file, content).unwrap();
            let guard = crate::input::PathGuard::new([dir.path()]);
            let path = guard.validate_path(&file).unwrap();
            let target = ValidationTarget {
                path: path.as_path().to_path_buf(),
                kind: ArtifactKind::infer(path.as_path()),
                size: content.len() as u64,
                content_hash: String::new(),
            };
            Self {
                dir,
                path,
                target,
                policy: PolicyConfig::default(),
                user: UserConfig::default(),
            }
        }

        pub fn ctx(&self) -> ValidatorContext<'_> {
            ValidatorContext {
                target: &self.target,
                path: &self.path,
                policy: &self.policy,
                user: &self.user,
            }
        }
    }

    pub fn result(tool: &str, exit_code: i32, stdout: &str, stderr: &str) -> ProcessResult {
        ProcessResult {
            tool: tool.to_string(),
            exit_code: Some(exit_code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms: 10,
            timed_out: false,
            truncated: false,
        }
    }
}
