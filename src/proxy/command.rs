//! Bounded external command execution.
//!
//! Reload signals and stats queries shell out to `systemctl` and `xray`.
//! Every invocation is bounded by a timeout so one stuck command cannot
//! stall the engine; the child is killed when the timeout fires.

use crate::WardenError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited with status 0.
    pub success: bool,

    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Trimmed stdout, or stderr when stdout is empty.
    pub fn message(&self) -> &str {
        let stdout = self.stdout.trim();
        if stdout.is_empty() {
            self.stderr.trim()
        } else {
            stdout
        }
    }
}

/// Runs external commands on behalf of the proxy adapters.
///
/// Implementations must be thread-safe; the manager shares one runner
/// between the config adapter and the stats provider.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its output.
    ///
    /// # Returns
    /// * `Ok(CommandOutput)` - The command finished (successfully or not)
    /// * `Err(Command)` - It could not be spawned or exceeded its time bound
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, WardenError>;
}

/// Runs commands as child processes of this process.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    /// Create a runner that bounds each command by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The per-command time bound.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, WardenError> {
        debug!(program, ?args, "running command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                WardenError::Command(format!(
                    "{} timed out after {}s",
                    program,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| WardenError::Command(format!("Failed to spawn {}: {}", program, e)))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_prefers_stdout() {
        let output = CommandOutput {
            success: true,
            stdout: "  active\n".to_string(),
            stderr: "ignored".to_string(),
        };
        assert_eq!(output.message(), "active");
    }

    #[test]
    fn test_message_falls_back_to_stderr() {
        let output = CommandOutput {
            success: false,
            stdout: "\n".to_string(),
            stderr: "Unit xray.service not found.\n".to_string(),
        };
        assert_eq!(output.message(), "Unit xray.service not found.");
    }

    #[tokio::test]
    async fn test_missing_binary_is_command_error() {
        let runner = SystemCommandRunner::new(Duration::from_secs(5));
        let result = runner
            .run("/nonexistent/proxywarden-test-binary", &[])
            .await;
        assert!(matches!(result, Err(WardenError::Command(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_exit_status() {
        let runner = SystemCommandRunner::new(Duration::from_secs(5));
        let ok = runner.run("sh", &["-c".into(), "echo hi".into()]).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.message(), "hi");

        let failed = runner.run("sh", &["-c".into(), "exit 3".into()]).await.unwrap();
        assert!(!failed.success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let runner = SystemCommandRunner::new(Duration::from_millis(200));
        let result = runner.run("sleep", &["5".into()]).await;
        assert!(matches!(result, Err(WardenError::Command(msg)) if msg.contains("timed out")));
    }
}
