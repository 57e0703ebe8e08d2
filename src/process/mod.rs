//! Secure invocation of external validators
//!
//! This module replaces "build a command line and hand it to a shell" with
//! a narrow contract:
//! 1. Only tools registered in a [`ToolRegistry`] can be started
//! 2. Arguments are [`ToolArg`] values, each built from an already
//!    validated input, and each passed as one argv element
//! 3. The child gets a cleared environment plus an explicit allow-list
//! 4. Output capture is bounded, runs are bounded by a hard timeout, and a
//!    cancellation token kills the whole process group
//! 5. Secrets travel through the channel the tool declares, never argv

mod capture;
mod invoker;
mod script;
mod secrets;

pub use invoker::ProcessInvoker;
pub use script::{EmbeddedScript, ScriptBuilder};
pub use secrets::{RunScratch, Secret};

use crate::input::{CanonicalPath, Identifier};
use crate::models::Dimension;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::time::Duration;
use thiserror::Error;

/// Default cap for each captured stream
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

/// Environment variables every tool receives when set in the parent
pub const BASE_ENV_ALLOWLIST: &[&str] = &["PATH", "LANG", "LC_ALL", "TMPDIR", "SYSTEMROOT"];

/// Errors from the invoker. Timeouts are not errors: they come back as a
/// [`ProcessResult`] with `timed_out` set.
#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("tool '{0}' is not on the validator allow-list")]
    NotAllowListed(String),

    #[error("tool '{tool}' is not installed ({program} not found)")]
    NotInstalled { tool: String, program: String },

    #[error("tool '{0}' was cancelled")]
    Cancelled(String),

    #[error("failed to pass secret to '{tool}': {reason}")]
    SecretDelivery { tool: String, reason: String },

    #[error("failed to run '{tool}': {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

impl InvokeError {
    /// Whether this means the validator is unavailable (fatal to a run)
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            InvokeError::NotAllowListed(_) | InvokeError::NotInstalled { .. }
        )
    }
}

/// How a tool expects to receive a secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretChannel {
    /// The tool takes no secrets
    None,
    /// Value placed in this environment variable of the child only
    Env(&'static str),
    /// Value written to an owner-only file in the run's scratch directory;
    /// the file's path is placed in this environment variable
    TempFile(&'static str),
    /// Value written to the child's stdin, which is then closed
    Stdin,
}

/// One allow-listed external validator
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Name callers use to request the tool
    pub name: String,
    /// Executable resolved through the child's `PATH`, or an absolute path
    pub program: OsString,
    /// Extra environment variables copied from the parent when set
    pub env_allowlist: Vec<&'static str>,
    pub secret_channel: SecretChannel,
    /// Non-zero exit codes that mean "ran and reported findings"
    pub findings_exit_codes: Vec<i32>,
    /// Dimension charged when the tool itself fails
    pub primary_dimension: Dimension,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, program: impl Into<OsString>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            env_allowlist: Vec::new(),
            secret_channel: SecretChannel::None,
            findings_exit_codes: Vec::new(),
            primary_dimension: Dimension::Compliance,
        }
    }

    pub fn with_env(mut self, vars: &[&'static str]) -> Self {
        self.env_allowlist.extend_from_slice(vars);
        self
    }

    pub fn with_secret_channel(mut self, channel: SecretChannel) -> Self {
        self.secret_channel = channel;
        self
    }

    pub fn with_findings_exit_codes(mut self, codes: &[i32]) -> Self {
        self.findings_exit_codes.extend_from_slice(codes);
        self
    }

    pub fn with_primary_dimension(mut self, dimension: Dimension) -> Self {
        self.primary_dimension = dimension;
        self
    }

    /// Whether `code` means the tool ran to completion
    pub fn exit_code_ran(&self, code: i32) -> bool {
        code == 0 || self.findings_exit_codes.contains(&code)
    }
}

/// The explicit allow-list of validators the invoker may start
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, spec: ToolSpec) -> Self {
        self.tools.insert(spec.name.clone(), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    /// Point an already registered tool at a different executable
    pub fn override_program(&mut self, name: &str, program: impl Into<OsString>) -> bool {
        match self.tools.get_mut(name) {
            Some(spec) => {
                spec.program = program.into();
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }
}

/// One argv element built from a validated value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolArg(OsString);

impl ToolArg {
    /// A literal flag or sub-command fixed at compile time
    pub fn flag(flag: &'static str) -> Self {
        ToolArg(OsString::from(flag))
    }

    pub fn path(path: &CanonicalPath) -> Self {
        ToolArg(path.as_os_str().to_os_string())
    }

    pub fn ident(ident: &Identifier) -> Self {
        ToolArg(OsString::from(ident.as_str()))
    }

    pub fn number(n: u64) -> Self {
        ToolArg(OsString::from(n.to_string()))
    }

    /// A script whose interpolations all went through the escaping path
    pub fn script(script: EmbeddedScript) -> Self {
        ToolArg(OsString::from(script.into_string()))
    }

    pub fn as_os_str(&self) -> &OsStr {
        &self.0
    }
}

/// Everything needed to start one validator
#[derive(Debug)]
pub struct InvocationRequest {
    pub tool: String,
    pub argv: Vec<ToolArg>,
    pub timeout: Duration,
    pub working_dir: CanonicalPath,
    pub secret: Option<Secret>,
}

impl InvocationRequest {
    pub fn new(tool: impl Into<String>, working_dir: CanonicalPath, timeout: Duration) -> Self {
        Self {
            tool: tool.into(),
            argv: Vec::new(),
            timeout,
            working_dir,
            secret: None,
        }
    }

    pub fn arg(mut self, arg: ToolArg) -> Self {
        self.argv.push(arg);
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = ToolArg>) -> Self {
        self.argv.extend(args);
        self
    }

    pub fn secret(mut self, secret: Secret) -> Self {
        self.secret = Some(secret);
        self
    }
}

/// What came back from a validator process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub tool: String,
    /// `None` when the process was killed (timeout) or died from a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
    /// Either stream hit the capture limit
    pub truncated: bool,
}

impl ProcessResult {
    /// Parse stdout as JSON
    pub fn json_output(&self) -> Option<serde_json::Value> {
        let trimmed = self.stdout.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }
}
