//! Command execution for scheduler tools.
//!
//! The transport that actually runs a command (local process, SSH, ...) sits
//! behind [`CommandRunner`]. [`LocalCommandRunner`] runs programs on this host.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Error type for command execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Failed to execute {command}: {error}")]
    Execution { command: String, error: String },
    #[error("Command {command} failed with exit code {exit_code:?}: stdout {stdout:?}, stderr {stderr:?}")]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

/// Result of running a command to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Render a program and its arguments for messages and logs.
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Executes scheduler commands against some host.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, feeding `stdin` if given.
    async fn run(
        &self,
        stdin: Option<&str>,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutput, CommandError>;

    /// Like [`CommandRunner::run`], but any non-zero exit code or output on
    /// stderr is an error carrying both streams.
    async fn run_checked(
        &self,
        stdin: Option<&str>,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutput, CommandError> {
        let output = self.run(stdin, program, args).await?;
        if !output.success() || !output.stderr.trim().is_empty() {
            return Err(CommandError::Failed {
                command: command_line(program, args),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Release the underlying transport.
    async fn close(&self) -> Result<(), CommandError> {
        Ok(())
    }
}

/// Runs commands as child processes of this host.
#[derive(Debug, Clone, Default)]
pub struct LocalCommandRunner {
    working_dir: Option<PathBuf>,
}

impl LocalCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command from `dir` instead of the process working directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }
}

#[async_trait]
impl CommandRunner for LocalCommandRunner {
    async fn run(
        &self,
        stdin: Option<&str>,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutput, CommandError> {
        let execution_error = |e: std::io::Error| CommandError::Execution {
            command: command_line(program, args),
            error: e.to_string(),
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!("Running {}", command_line(program, args));
        let mut child = cmd.spawn().map_err(execution_error)?;

        // Feed stdin concurrently so a chatty child cannot block on a full pipe.
        let feeder = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.to_string();
                Some(tokio::spawn(async move {
                    let result = pipe.write_all(input.as_bytes()).await;
                    drop(pipe);
                    result
                }))
            }
            _ => None,
        };

        let output = child.wait_with_output().await.map_err(execution_error)?;
        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(execution_error(e));
                }
                Err(e) => tracing::warn!("stdin writer for {} panicked: {}", program, e),
                _ => {}
            }
        }

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
