//! Running allow-listed validators
//!
//! Follows the poll-and-kill shape used for external tools elsewhere in the
//! codebase: spawn without a shell, drain output on background threads,
//! and poll `try_wait` against a deadline and a cancellation token.

use super::capture::StreamCapture;
use super::secrets::RunScratch;
use super::{
    InvocationRequest, InvokeError, ProcessResult, SecretChannel, ToolArg, ToolRegistry,
    BASE_ENV_ALLOWLIST, DEFAULT_MAX_OUTPUT_BYTES,
};
use crate::input::sanitize_for_display;
use std::io::{ErrorKind, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long to wait for output pipes to close after the child is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
    Failed(std::io::Error),
}

/// Starts validators from a fixed registry
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    registry: ToolRegistry,
    max_output_bytes: usize,
    poll_interval: Duration,
}

impl ProcessInvoker {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            poll_interval: Duration::from_millis(20),
        }
    }

    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one validator to completion, timeout or cancellation.
    ///
    /// A timeout is reported through [`ProcessResult::timed_out`]; the
    /// process group has already been killed when this returns.
    pub fn run(
        &self,
        request: &InvocationRequest,
        cancel: &CancellationToken,
    ) -> Result<ProcessResult, InvokeError> {
        let spec = self
            .registry
            .get(&request.tool)
            .ok_or_else(|| InvokeError::NotAllowListed(sanitize_for_display(&request.tool)))?;
        let tool = spec.name.clone();

        if cancel.is_cancelled() {
            return Err(InvokeError::Cancelled(tool));
        }

        let mut command = Command::new(&spec.program);
        command
            .args(request.argv.iter().map(ToolArg::as_os_str))
            .current_dir(request.working_dir.as_path())
            .env_clear()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for var in BASE_ENV_ALLOWLIST.iter().chain(spec.env_allowlist.iter()) {
            if let Some(value) = std::env::var_os(var) {
                command.env(var, value);
            }
        }

        // Lives until the child is reaped; dropping it removes any secret file.
        let mut scratch: Option<RunScratch> = None;
        let mut stdin_secret: Option<String> = None;

        match (&spec.secret_channel, &request.secret) {
            (_, None) => {}
            (SecretChannel::None, Some(_)) => {
                return Err(InvokeError::SecretDelivery {
                    tool,
                    reason: "tool declares no secret channel".to_string(),
                });
            }
            (SecretChannel::Env(var), Some(secret)) => {
                command.env(var, secret.expose());
            }
            (SecretChannel::TempFile(var), Some(secret)) => {
                let dir = RunScratch::new().map_err(|e| InvokeError::SecretDelivery {
                    tool: tool.clone(),
                    reason: e.to_string(),
                })?;
                let path = dir
                    .write_secret(secret)
                    .map_err(|e| InvokeError::SecretDelivery {
                        tool: tool.clone(),
                        reason: e.to_string(),
                    })?;
                command.env(var, path);
                scratch = Some(dir);
            }
            (SecretChannel::Stdin, Some(secret)) => {
                stdin_secret = Some(secret.expose().to_string());
            }
        }

        command.stdin(if stdin_secret.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        debug!(
            "Starting {} ({} args, timeout {}ms)",
            tool,
            request.argv.len(),
            request.timeout.as_millis()
        );

        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(InvokeError::NotInstalled {
                    tool,
                    program: sanitize_for_display(&spec.program.to_string_lossy()),
                });
            }
            Err(e) => return Err(InvokeError::Io { tool, source: e }),
        };

        let stdout = StreamCapture::spawn(child.stdout.take(), self.max_output_bytes);
        let stderr = StreamCapture::spawn(child.stderr.take(), self.max_output_bytes);

        if let (Some(secret), Some(mut pipe)) = (stdin_secret, child.stdin.take()) {
            // A tool that never reads stdin must not block us.
            thread::spawn(move || {
                let _ = pipe.write_all(secret.as_bytes());
            });
        }

        let deadline = start + request.timeout;
        let outcome = loop {
            match child.try_wait() {
                Ok(Some(status)) => break WaitOutcome::Exited(status),
                Ok(None) => {}
                Err(e) => {
                    kill_process_group(&mut child);
                    break WaitOutcome::Failed(e);
                }
            }
            if cancel.is_cancelled() {
                kill_process_group(&mut child);
                break WaitOutcome::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                kill_process_group(&mut child);
                break WaitOutcome::TimedOut;
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        };

        let drain_deadline = Instant::now() + DRAIN_GRACE;
        let stdout = stdout.finish(drain_deadline);
        let stderr = stderr.finish(drain_deadline);
        let duration_ms = start.elapsed().as_millis() as u64;
        drop(scratch);

        let (exit_code, timed_out) = match outcome {
            WaitOutcome::Exited(status) => (status.code(), false),
            WaitOutcome::TimedOut => {
                warn!("{} timed out after {}ms", tool, duration_ms);
                (None, true)
            }
            WaitOutcome::Cancelled => {
                debug!("{} cancelled after {}ms", tool, duration_ms);
                return Err(InvokeError::Cancelled(tool));
            }
            WaitOutcome::Failed(e) => return Err(InvokeError::Io { tool, source: e }),
        };

        let truncated = stdout.truncated || stderr.truncated;
        if truncated {
            warn!("{} output exceeded {} bytes, truncated", tool, self.max_output_bytes);
        }
        debug!("{} finished in {}ms with {:?}", tool, duration_ms, exit_code);

        Ok(ProcessResult {
            tool,
            exit_code,
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            duration_ms,
            timed_out,
            truncated,
        })
    }
}

/// Kill the child and everything it started, then reap it
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::input::{validate_identifier, CanonicalPath, IdentifierKind, PathGuard};
    use crate::process::{Secret, ToolSpec};
    use std::fs;
    use tempfile::TempDir;

    fn registry() -> ToolRegistry {
        ToolRegistry::new()
            .register(ToolSpec::new("echo", "echo"))
            .register(ToolSpec::new("sleep", "sleep"))
            .register(ToolSpec::new("seq", "seq"))
            .register(ToolSpec::new("printenv", "printenv"))
            .register(
                ToolSpec::new("printenv-secret", "printenv")
                    .with_secret_channel(SecretChannel::Env("ARMVET_TEST_SECRET")),
            )
            .register(
                ToolSpec::new("printenv-secret-file", "printenv")
                    .with_secret_channel(SecretChannel::TempFile("ARMVET_SECRET_FILE")),
            )
            .register(ToolSpec::new("cat", "cat").with_secret_channel(SecretChannel::Stdin))
            .register(ToolSpec::new("missing", "armvet-no-such-program-xyz"))
    }

    fn workdir() -> (TempDir, CanonicalPath) {
        let dir = tempfile::tempdir().unwrap();
        let guard = PathGuard::new([dir.path()]);
        let canonical = guard.validate_path(dir.path()).unwrap();
        (dir, canonical)
    }

    fn request(tool: &str, dir: &CanonicalPath, timeout_ms: u64) -> InvocationRequest {
        InvocationRequest::new(tool, dir.clone(), Duration::from_millis(timeout_ms))
    }

    #[test]
    fn test_unregistered_tool_is_refused() {
        let (_dir, cwd) = workdir();
        let invoker = ProcessInvoker::new(registry());
        let err = invoker
            .run(&request("sh", &cwd, 1000), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, InvokeError::NotAllowListed(_)));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let (_dir, cwd) = workdir();
        let invoker = ProcessInvoker::new(registry());
        let err = invoker
            .run(&request("missing", &cwd, 1000), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, InvokeError::NotInstalled { .. }));
    }

    #[test]
    fn test_hostile_path_is_one_argument() {
        let (dir, _) = workdir();
        let sentinel = dir.path().join("x");
        fs::write(&sentinel, "keep me").unwrap();
        let hostile = dir.path().join("'; rm -rf x; '");
        fs::create_dir(&hostile).unwrap();

        let guard = PathGuard::new([dir.path()]);
        let target = guard.validate_path(&hostile).unwrap();
        let cwd = guard.validate_path(dir.path()).unwrap();

        let invoker = ProcessInvoker::new(registry());
        let result = invoker
            .run(
                &request("echo", &cwd, 5000).arg(ToolArg::path(&target)),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout.trim_end(), target.to_string());
        assert!(sentinel.exists());
    }

    #[test]
    fn test_identifier_argument_passed_verbatim() {
        let (_dir, cwd) = workdir();
        let rg = validate_identifier("rg-prod.01", IdentifierKind::ResourceGroup).unwrap();
        let invoker = ProcessInvoker::new(registry());
        let result = invoker
            .run(
                &request("echo", &cwd, 5000).arg(ToolArg::ident(&rg)),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(result.stdout, "rg-prod.01\n");
    }

    #[test]
    fn test_timeout_kills_process() {
        let (_dir, cwd) = workdir();
        let invoker = ProcessInvoker::new(registry());
        let result = invoker
            .run(
                &request("sleep", &cwd, 200).arg(ToolArg::number(5)),
                &CancellationToken::new(),
            )
            .unwrap();
        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
        assert!(result.duration_ms < 4000);
    }

    #[test]
    fn test_cancellation_kills_process() {
        let (_dir, cwd) = workdir();
        let invoker = ProcessInvoker::new(registry());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let started = Instant::now();
        let err = invoker
            .run(&request("sleep", &cwd, 10_000).arg(ToolArg::number(5)), &cancel)
            .unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, InvokeError::Cancelled(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_output_is_bounded() {
        let (_dir, cwd) = workdir();
        let invoker = ProcessInvoker::new(registry()).with_max_output_bytes(1024);
        let result = invoker
            .run(
                &request("seq", &cwd, 10_000).args([ToolArg::number(1), ToolArg::number(200_000)]),
                &CancellationToken::new(),
            )
            .unwrap();
        assert!(result.truncated);
        assert!(result.stdout.len() <= 1024);
        assert_eq!(result.exit_code, Some(0));
    }

    #[test]
    fn test_environment_is_not_inherited() {
        let (_dir, cwd) = workdir();
        let invoker = ProcessInvoker::new(registry());
        let result = invoker
            .run(
                &request("printenv", &cwd, 5000).arg(ToolArg::flag("HOME")),
                &CancellationToken::new(),
            )
            .unwrap();
        assert!(result.stdout.is_empty());
    }

    #[test]
    fn test_secret_through_env() {
        let (_dir, cwd) = workdir();
        let invoker = ProcessInvoker::new(registry());
        let result = invoker
            .run(
                &request("printenv-secret", &cwd, 5000)
                    .arg(ToolArg::flag("ARMVET_TEST_SECRET"))
                    .secret(Secret::new("s3cr3t-value")),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(result.stdout.trim_end(), "s3cr3t-value");
    }

    #[test]
    fn test_secret_file_removed_after_run() {
        let (_dir, cwd) = workdir();
        let invoker = ProcessInvoker::new(registry());
        let result = invoker
            .run(
                &request("printenv-secret-file", &cwd, 5000)
                    .arg(ToolArg::flag("ARMVET_SECRET_FILE"))
                    .secret(Secret::new("file-secret")),
                &CancellationToken::new(),
            )
            .unwrap();
        let path = result.stdout.trim_end();
        assert!(!path.is_empty());
        assert!(!path.contains("file-secret"));
        assert!(!std::path::Path::new(path).exists());
    }

    #[test]
    fn test_secret_through_stdin() {
        let (_dir, cwd) = workdir();
        let invoker = ProcessInvoker::new(registry());
        let result = invoker
            .run(
                &request("cat", &cwd, 5000).secret(Secret::new("piped-secret")),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(result.stdout, "piped-secret");
    }

    #[test]
    fn test_secret_refused_without_channel() {
        let (_dir, cwd) = workdir();
        let invoker = ProcessInvoker::new(registry());
        let err = invoker
            .run(
                &request("echo", &cwd, 5000).secret(Secret::new("nope")),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, InvokeError::SecretDelivery { .. }));
    }
}
