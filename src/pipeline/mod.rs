//! Validation pipeline
//!
//! Orchestrates one validation run, strictly in this order:
//! 1. Validate the input path and fingerprint the target
//! 2. Run the built-in checks
//! 3. Run each enabled external validator that applies
//! 4. Normalize tool output into findings
//! 5. Score and assemble the report
//!
//! A cancellation token is checked at every stage boundary and handed to
//! the invoker, which kills a running tool's process group.

mod target;

pub use target::{build_target, TargetError};

use crate::checks::{run_builtin_checks, CheckError};
use crate::config::{ConfigError, PolicyConfig, UserConfig};
use crate::input::{sanitize_for_display, CanonicalPath, PathGuard, Rejection};
use crate::models::{
    ArtifactKind, Dimension, Finding, FindingsSummary, Severity, ToolRun, ToolRunStatus,
    ValidationReport, ValidationTarget,
};
use crate::process::{InvocationRequest, InvokeError, ProcessInvoker, ProcessResult};
use crate::scoring::Scorer;
use crate::validators::{
    default_validators, tool_finding, tool_registry, ParsedOutput, Validator, ValidatorContext,
};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors from a validation or optimization run.
///
/// `InputRejected`, `ToolUnavailable`, `Cancelled`, `Io` and `Config` abort
/// the run. The tool failures are recovered inside the run as error or
/// warning findings and only surface here through their messages.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input rejected: {0}")]
    InputRejected(#[from] Rejection),

    #[error("validator unavailable: {0}")]
    ToolUnavailable(String),

    #[error("{tool} timed out after {attempts} attempts ({timeout_ms} ms each)")]
    ToolTimedOut {
        tool: String,
        attempts: u32,
        timeout_ms: u64,
    },

    #[error("{tool} failed: {reason}")]
    ToolExecutionFailed { tool: String, reason: String },

    #[error("{tool} output could not be parsed: {reason}")]
    UnparsableOutput { tool: String, reason: String },

    #[error("failed to write {path}: {reason}")]
    OptimizationWriteFailed { path: PathBuf, reason: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<CheckError> for PipelineError {
    fn from(e: CheckError) -> Self {
        match e {
            CheckError::Rejected(r) => PipelineError::InputRejected(r),
            CheckError::Io { path, source } => PipelineError::Io { path, source },
        }
    }
}

impl From<TargetError> for PipelineError {
    fn from(e: TargetError) -> Self {
        match e {
            TargetError::Rejected(r) => PipelineError::InputRejected(r),
            TargetError::Io { path, source } => PipelineError::Io { path, source },
        }
    }
}

/// What one validator contributed to a run
struct ToolOutcome {
    run: ToolRun,
    findings: Vec<Finding>,
    completed: bool,
}

/// Runs validations against a borrowed policy
pub struct ValidationPipeline<'a> {
    policy: &'a PolicyConfig,
    user: &'a UserConfig,
    guard: PathGuard,
    invoker: ProcessInvoker,
    validators: Vec<Box<dyn Validator>>,
}

impl<'a> ValidationPipeline<'a> {
    /// Pipeline over every known validator, confined to the policy's
    /// allowed roots
    pub fn new(policy: &'a PolicyConfig, user: &'a UserConfig) -> Result<Self, PipelineError> {
        Self::with_validators(policy, user, default_validators())
    }

    /// Pipeline over a custom validator set
    pub fn with_validators(
        policy: &'a PolicyConfig,
        user: &'a UserConfig,
        validators: Vec<Box<dyn Validator>>,
    ) -> Result<Self, PipelineError> {
        policy.validate()?;
        let invoker = ProcessInvoker::new(tool_registry(&validators, policy))
            .with_max_output_bytes(policy.tools.max_output_bytes);
        Ok(Self {
            policy,
            user,
            guard: PathGuard::new(&policy.allowed_roots),
            invoker,
            validators,
        })
    }

    pub fn policy(&self) -> &PolicyConfig {
        self.policy
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    pub fn validators(&self) -> &[Box<dyn Validator>] {
        &self.validators
    }

    /// Validate an untrusted path
    pub fn validate(
        &self,
        raw: &Path,
        kind: Option<ArtifactKind>,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, PipelineError> {
        let path = self.guard.validate_path(raw)?;
        self.validate_canonical(&path, kind, cancel)
    }

    /// Validate independent targets in parallel. Results keep input order.
    pub fn validate_many(
        &self,
        targets: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Vec<Result<ValidationReport, PipelineError>> {
        targets
            .par_iter()
            .map(|raw| self.validate(raw, None, cancel))
            .collect()
    }

    /// Validate a path that already passed the guard
    pub fn validate_canonical(
        &self,
        path: &CanonicalPath,
        kind: Option<ArtifactKind>,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, PipelineError> {
        let started = Instant::now();
        let target = build_target(path, kind)?;
        info!(
            "Validating {} ({}, {} bytes)",
            sanitize_for_display(&target.path.to_string_lossy()),
            target.kind,
            target.size
        );
        checkpoint(cancel)?;

        let builtin = run_builtin_checks(&target, path)?;
        let mut findings = builtin.findings;
        let mut covered = builtin.covered;
        checkpoint(cancel)?;

        let ctx = ValidatorContext {
            target: &target,
            path,
            policy: self.policy,
            user: self.user,
        };
        let mut tool_runs = Vec::new();
        for validator in self.enabled_validators()? {
            if !validator.applies_to(&target) {
                debug!("{} does not apply to {}", validator.name(), target.kind);
                continue;
            }
            checkpoint(cancel)?;
            let outcome = self.run_validator(validator, &ctx, cancel)?;
            if outcome.completed {
                covered.extend(validator.dimensions().iter().copied());
            }
            findings.extend(outcome.findings);
            tool_runs.push(outcome.run);
        }
        checkpoint(cancel)?;

        let report = self.assemble(target, findings, &covered, tool_runs);
        info!(
            "Validation finished in {:?}: score {}, {}",
            started.elapsed(),
            report.overall_score,
            if report.passed { "pass" } else { "fail" }
        );
        Ok(report)
    }

    /// The enabled validators, in registration order. An enabled name
    /// nobody registered is fatal.
    fn enabled_validators(&self) -> Result<Vec<&dyn Validator>, PipelineError> {
        for name in &self.policy.tools.enabled {
            if !self.validators.iter().any(|v| v.name() == name) {
                return Err(PipelineError::ToolUnavailable(format!(
                    "'{}' is not a known validator",
                    sanitize_for_display(name)
                )));
            }
        }
        Ok(self
            .validators
            .iter()
            .filter(|v| self.policy.is_tool_enabled(v.name()))
            .map(|v| v.as_ref())
            .collect())
    }

    fn run_validator(
        &self,
        validator: &dyn Validator,
        ctx: &ValidatorContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome, PipelineError> {
        let name = validator.name().to_string();
        let spec = self
            .invoker
            .registry()
            .get(&name)
            .cloned()
            .ok_or_else(|| PipelineError::ToolUnavailable(name.clone()))?;

        let invocation = validator.arguments(ctx)?;
        let timeout = Duration::from_millis(self.policy.tools.timeout_ms);
        let mut request = InvocationRequest::new(&name, ctx.path.working_dir(), timeout)
            .args(invocation.argv);
        if let Some(secret) = invocation.secret {
            request = request.secret(secret);
        }

        let mut attempts = 0u32;
        let result = loop {
            attempts += 1;
            match self.invoker.run(&request, cancel) {
                Ok(result) if result.timed_out && attempts < 2 => {
                    warn!(
                        "{} timed out, retrying in {} ms",
                        name, self.policy.tools.retry_backoff_ms
                    );
                    backoff(Duration::from_millis(self.policy.tools.retry_backoff_ms), cancel)?;
                }
                Ok(result) => break Ok(result),
                Err(InvokeError::Cancelled(_)) => return Err(PipelineError::Cancelled),
                Err(e) if e.is_unavailable() => {
                    return Err(PipelineError::ToolUnavailable(e.to_string()))
                }
                Err(e) => break Err(e),
            }
        };

        let mut run = ToolRun {
            tool: name.clone(),
            status: ToolRunStatus::Failed,
            exit_code: None,
            duration_ms: 0,
            truncated: false,
            attempts,
        };
        let primary = spec.primary_dimension;

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                let failure = PipelineError::ToolExecutionFailed {
                    tool: name.clone(),
                    reason: e.to_string(),
                };
                return Ok(failed(run, &failure, "tool-execution-failed", primary, None));
            }
        };
        run.exit_code = result.exit_code;
        run.duration_ms = result.duration_ms;
        run.truncated = result.truncated;

        if result.timed_out {
            run.status = ToolRunStatus::TimedOut;
            let failure = PipelineError::ToolTimedOut {
                tool: name.clone(),
                attempts,
                timeout_ms: self.policy.tools.timeout_ms,
            };
            return Ok(failed(run, &failure, "tool-timed-out", primary, None));
        }

        let ran = result.exit_code.is_some_and(|code| spec.exit_code_ran(code));
        if !ran {
            let reason = match result.exit_code {
                Some(code) => format!("exit code {}", code),
                None => "terminated by a signal".to_string(),
            };
            let failure = PipelineError::ToolExecutionFailed {
                tool: name.clone(),
                reason,
            };
            return Ok(failed(run, &failure, "tool-execution-failed", primary, Some(&result)));
        }

        match validator.parse(&result, ctx) {
            Ok(parsed) => {
                run.status = ToolRunStatus::Completed;
                debug!("{}: {} findings", name, parsed.findings.len());
                Ok(ToolOutcome {
                    run,
                    findings: with_anomalies(&name, parsed, primary),
                    completed: true,
                })
            }
            Err(e) => {
                run.status = ToolRunStatus::Unparsable;
                let failure = PipelineError::UnparsableOutput {
                    tool: name.clone(),
                    reason: e.to_string(),
                };
                warn!("{}", sanitize_for_display(&failure.to_string()));
                let finding = tool_finding(
                    &name,
                    "unparsable-output",
                    Severity::Warning,
                    primary,
                    &failure.to_string(),
                )
                .with_remediation("Check the validator version; its findings are missing from this report");
                Ok(ToolOutcome {
                    run,
                    findings: vec![finding],
                    completed: false,
                })
            }
        }
    }

    fn assemble(
        &self,
        target: ValidationTarget,
        findings: Vec<Finding>,
        covered: &BTreeSet<Dimension>,
        tool_runs: Vec<ToolRun>,
    ) -> ValidationReport {
        let score = Scorer::new(self.policy).score(&findings, covered);
        ValidationReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            generated_at: chrono::Utc::now(),
            target,
            findings_summary: FindingsSummary::from_findings(&findings),
            findings,
            dimensions: score.dimensions,
            overall_score: score.overall,
            threshold: score.threshold,
            passed: score.passed,
            tool_runs,
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

/// Sleep for the retry backoff, waking early on cancellation
fn backoff(delay: Duration, cancel: &CancellationToken) -> Result<(), PipelineError> {
    let deadline = Instant::now() + delay;
    let step = Duration::from_millis(20);
    while Instant::now() < deadline {
        checkpoint(cancel)?;
        std::thread::sleep(step.min(deadline.saturating_duration_since(Instant::now())));
    }
    checkpoint(cancel)
}

/// A tool that could not produce a result: one error finding, no coverage
fn failed(
    run: ToolRun,
    failure: &PipelineError,
    rule: &str,
    dimension: Dimension,
    result: Option<&ProcessResult>,
) -> ToolOutcome {
    let message = failure.to_string();
    warn!("{}", sanitize_for_display(&message));
    let mut finding = tool_finding(&run.tool, rule, Severity::Error, dimension, &message)
        .with_remediation("Its checks did not run; fix the validator installation or raise tools.timeout_ms");
    if let Some(result) = result {
        let captured = if result.stderr.trim().is_empty() {
            &result.stdout
        } else {
            &result.stderr
        };
        if !captured.trim().is_empty() {
            finding = finding.with_context(sanitize_for_display(captured.trim()));
        }
    }
    ToolOutcome {
        run,
        findings: vec![finding],
        completed: false,
    }
}

/// Parsed findings plus one `parse-anomaly` note if records were dropped
fn with_anomalies(tool: &str, parsed: ParsedOutput, dimension: Dimension) -> Vec<Finding> {
    let mut findings = parsed.findings;
    if parsed.dropped > 0 {
        findings.push(tool_finding(
            tool,
            "parse-anomaly",
            Severity::Info,
            dimension,
            &format!(
                "{} records were dropped for missing required fields",
                parsed.dropped
            ),
        ));
    }
    findings
}
