//! Process execution behind a trait seam so the runner can be tested
//! without spawning real processes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{MatrixError, MatrixResult};

/// A single command to execute.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Argv; the first element is the executable.
    pub argv: Vec<String>,

    /// Working directory for the process.
    pub cwd: PathBuf,

    /// Extra environment variables set on top of the inherited environment.
    pub env_vars: BTreeMap<String, String>,

    /// Timeout in seconds. 0 disables the timeout.
    pub timeout_secs: u64,
}

/// Captured result of one command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (0 = success; -1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes commands on behalf of the runner.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run one command to completion, capturing its output.
    async fn run(&self, request: &CommandRequest) -> MatrixResult<CommandOutput>;

    /// Whether `program` can be resolved and launched at all. Used to probe
    /// interpreter availability before an environment starts.
    async fn probe(&self, program: &str) -> bool;
}

/// Production executor backed by [`tokio::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, request: &CommandRequest) -> MatrixResult<CommandOutput> {
        let start = Instant::now();

        let exe = &request.argv[0];
        let args = &request.argv[1..];

        let child = Command::new(exe)
            .args(args)
            .current_dir(&request.cwd)
            .envs(&request.env_vars)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = if request.timeout_secs > 0 {
            tokio::time::timeout(
                std::time::Duration::from_secs(request.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                MatrixError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "command '{exe}' timed out after {} seconds",
                        request.timeout_secs
                    ),
                ))
            })??
        } else {
            child.wait_with_output().await?
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn probe(&self, program: &str) -> bool {
        // Spawning with a benign flag resolves the program through PATH the
        // same way the real command launch will.
        match Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(mut child) => {
                let _ = child.wait().await;
                true
            }
            Err(e) => e.kind() != std::io::ErrorKind::NotFound,
        }
    }
}
