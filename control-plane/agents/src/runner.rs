//! Host command execution. One seam for everything the agents shell out to,
//! so orchestration logic runs against a recording double in tests.

use async_trait::async_trait;
use snafu::Snafu;
use std::process::Output;
use tracing::trace;

/// Errors from running host commands.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum RunnerError {
    #[snafu(display("Failed to spawn {program}: {source}"))]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[snafu(display("{program} {args} failed ({code:?}): {stderr}"))]
    Failed {
        program: String,
        args: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Outcome of a host command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    fn from_output(output: Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Executes commands on the storage node.
#[async_trait]
pub trait SystemRunner: Send + Sync {
    /// Run a command and return its outcome; a non-zero exit is not an error
    /// at this level.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, RunnerError>;

    /// Run a command and fail on non-zero exit, carrying stderr.
    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput, RunnerError> {
        let output = self.run(program, args).await?;
        if !output.success {
            return Err(RunnerError::Failed {
                program: program.to_string(),
                args: args.join(" "),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Runs commands on the host through `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct HostRunner {}

#[async_trait]
impl SystemRunner for HostRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, RunnerError> {
        trace!(%program, ?args, "exec");
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| RunnerError::Spawn {
                program: program.to_string(),
                source,
            })?;
        Ok(CommandOutput::from_output(output))
    }
}

/// Test double which records every invocation and replays canned outcomes.
/// Unknown commands succeed with empty output.
#[derive(Debug, Default)]
pub struct FakeRunner {
    calls: parking_lot::Mutex<Vec<String>>,
    responses: parking_lot::Mutex<std::collections::HashMap<String, CommandOutput>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the outcome replayed when a command line starting with
    /// `prefix` runs.
    pub fn respond(&self, prefix: &str, success: bool, stdout: &str, stderr: &str) {
        self.responses.lock().insert(
            prefix.to_string(),
            CommandOutput {
                success,
                code: if success { Some(0) } else { Some(1) },
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// True when some recorded command line contains `needle`.
    pub fn ran(&self, needle: &str) -> bool {
        self.calls.lock().iter().any(|call| call.contains(needle))
    }
}

#[async_trait]
impl SystemRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, RunnerError> {
        let line = format!("{} {}", program, args.join(" "));
        self.calls.lock().push(line.clone());
        let responses = self.responses.lock();
        let response = responses
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, output)| output.clone());
        Ok(response.unwrap_or(CommandOutput {
            success: true,
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }))
    }
}
