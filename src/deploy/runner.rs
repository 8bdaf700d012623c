//! Subprocess execution for the deploy toolchain.
//!
//! Commands are rendered from a shell template and run through `/bin/sh -c`.
//! Placeholder values never touch the shell text: each one is exported as an
//! env var and the template references it quoted.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::error::DeploymentError;

/// One `{placeholder}` in the command template and the env var backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandVar {
    pub placeholder: &'static str,
    pub env_key: &'static str,
    pub value: String,
}

/// Fully described subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Short name for logs (`deploy`, `transfer`).
    pub label: &'static str,
    pub template: String,
    pub workdir: PathBuf,
    pub vars: Vec<CommandVar>,
    pub timeout: Duration,
}

/// Output of a subprocess that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Both streams interleaved in arrival order.
    pub combined: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. Non-zero exit and timeout are errors carrying output.
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, DeploymentError>;
}

/// Runs commands with `tokio::process`, streaming lines into tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellCommandRunner;

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, DeploymentError> {
        let mut command = build_command(&spec);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| DeploymentError::Spawn(e.to_string()))?;

        tracing::info!(label = spec.label, workdir = %spec.workdir.display(), "Started toolchain command");

        let mut output = CommandOutput::default();
        let finished =
            tokio::time::timeout(spec.timeout, stream_until_exit(&mut child, spec.label, &mut output))
                .await;

        let status = match finished {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(DeploymentError::Spawn(format!(
                    "failed waiting for command: {e}"
                )));
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(label = spec.label, "Failed to kill timed out command: {}", e);
                }
                tracing::warn!(label = spec.label, timeout = ?spec.timeout, "Toolchain command timed out");
                return Err(DeploymentError::Timeout {
                    timeout: spec.timeout,
                    output: output.combined,
                });
            }
        };

        if !status.success() {
            tracing::warn!(label = spec.label, %status, "Toolchain command failed");
            return Err(DeploymentError::NonZeroExit {
                status: status.to_string(),
                output: output.combined,
            });
        }

        tracing::info!(label = spec.label, "Toolchain command finished");
        Ok(output)
    }
}

/// Substitute placeholders with quoted env references and export the values.
pub fn build_command(spec: &CommandSpec) -> Command {
    let mut shell = spec.template.clone();
    for var in &spec.vars {
        let quoted_ref = format!("\"${{{}}}\"", var.env_key);
        shell = shell
            .replace(&format!("'{}'", var.placeholder), &quoted_ref)
            .replace(&format!("\"{}\"", var.placeholder), &quoted_ref)
            .replace(var.placeholder, &quoted_ref);
    }

    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(shell).current_dir(&spec.workdir);
    for var in &spec.vars {
        command.env(var.env_key, &var.value);
    }
    command
}

async fn stream_until_exit(
    child: &mut Child,
    label: &'static str,
    output: &mut CommandOutput,
) -> std::io::Result<ExitStatus> {
    let mut stdout_lines = child
        .stdout
        .take()
        .map(|stream| BufReader::new(stream).lines());
    let mut stderr_lines = child
        .stderr
        .take()
        .map(|stream| BufReader::new(stream).lines());
    let mut stdout_done = stdout_lines.is_none();
    let mut stderr_done = stderr_lines.is_none();

    while !(stdout_done && stderr_done) {
        tokio::select! {
            line = async {
                match stdout_lines.as_mut() {
                    Some(lines) => lines.next_line().await,
                    None => Ok(None),
                }
            }, if !stdout_done => match line {
                Ok(Some(line)) => {
                    tracing::debug!(label, stream = "stdout", "{}", line);
                    push_line(&mut output.stdout, &line);
                    push_line(&mut output.combined, &line);
                }
                Ok(None) => stdout_done = true,
                Err(e) => {
                    push_line(&mut output.combined, &format!("stdout stream error: {e}"));
                    stdout_done = true;
                }
            },
            line = async {
                match stderr_lines.as_mut() {
                    Some(lines) => lines.next_line().await,
                    None => Ok(None),
                }
            }, if !stderr_done => match line {
                Ok(Some(line)) => {
                    tracing::debug!(label, stream = "stderr", "{}", line);
                    push_line(&mut output.stderr, &line);
                    push_line(&mut output.combined, &line);
                }
                Ok(None) => stderr_done = true,
                Err(e) => {
                    push_line(&mut output.combined, &format!("stderr stream error: {e}"));
                    stderr_done = true;
                }
            },
        }
    }

    child.wait().await
}

fn push_line(buffer: &mut String, line: &str) {
    buffer.push_str(line);
    buffer.push('\n');
}
