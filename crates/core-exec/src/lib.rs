//! Shell command execution primitive.
//!
//! Commands are opaque strings handed to the platform shell (`sh -c` on Unix,
//! `cmd /C` on Windows). The runner captures stdout and stderr and reports a
//! non-zero exit as an error. Stderr content alone is never an error here;
//! callers decide what it means.
//!
//! No timeout is applied. A hanging command only blocks the task awaiting it.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, trace};

/// Captured output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn has_stderr(&self) -> bool {
        !self.stderr.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

pub type ExecFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, ExecError>> + Send + 'a>>;

/// Executes shell command strings.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, command: &'a str) -> ExecFuture<'a>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<T> {
    fn run<'a>(&'a self, command: &'a str) -> ExecFuture<'a> {
        (**self).run(command)
    }
}

/// Runs commands through the platform shell via `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

impl CommandRunner for ShellRunner {
    fn run<'a>(&'a self, command: &'a str) -> ExecFuture<'a> {
        Box::pin(async move {
            if command.trim().is_empty() {
                return Err(ExecError::EmptyCommand);
            }
            trace!(target: "exec", command, "spawn");
            let output = shell_command(command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|source| ExecError::Spawn {
                    command: command.to_string(),
                    source,
                })?;

            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            debug!(
                target: "exec",
                command,
                code = output.status.code(),
                stdout_len = stdout.len(),
                stderr_len = stderr.len(),
                "exited"
            );
            if !output.status.success() {
                return Err(ExecError::NonZeroExit {
                    command: command.to_string(),
                    code: output.status.code(),
                    stderr,
                });
            }
            Ok(CommandOutput { stdout, stderr })
        })
    }
}
