//! Bounded external command execution

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::PromoterError;

/// Default wall-clock bound for a single command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// A command to run, with its upper bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Render for logs
    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Structured result of a finished (or killed) command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,

    /// `None` when the process was killed
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Best available description of why the command failed
    pub fn error_text(&self) -> String {
        if self.timed_out {
            return format!("command timed out after {}ms", self.duration_ms);
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_code {
            Some(code) => format!("command exited with status {}", code),
            None => "command terminated by signal".to_string(),
        }
    }
}

/// Runs control-plane commands.
///
/// Ordinary non-zero exits and timeouts are reported through
/// [`CommandOutput`]; only failures to run the command at all are errors.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PromoterError>;
}

/// Runs commands as child processes of this one
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PromoterError> {
        debug!("Running command: {}", spec.display());
        let started = Instant::now();

        // kill_on_drop sends SIGKILL once the wait future is dropped on timeout
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PromoterError::CommandError(format!("Failed to spawn {}: {}", spec.program, e))
            })?;

        match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let result = CommandOutput {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code: output.status.code(),
                    timed_out: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                if !result.success {
                    debug!(
                        "Command failed ({:?}): {}: {}",
                        result.exit_code,
                        spec.display(),
                        result.stderr.trim()
                    );
                }
                Ok(result)
            }
            Ok(Err(e)) => Err(PromoterError::CommandError(format!(
                "Failed to wait for {}: {}",
                spec.program, e
            ))),
            Err(_) => {
                warn!(
                    "Command exceeded {:?} and was killed: {}",
                    spec.timeout,
                    spec.display()
                );
                Ok(CommandOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: format!("killed after {:?}", spec.timeout),
                    exit_code: None,
                    timed_out: true,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }
}
