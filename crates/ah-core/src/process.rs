use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command ran but exited non-zero; the full output is attached.
    #[error("command exited with status {:?}", .output.exit_code)]
    ExitStatus { output: CommandOutput },
    /// The command could not be spawned at all (binary missing, bad cwd).
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ProcessError {
    /// The captured output, when the process actually ran.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            ProcessError::ExitStatus { output } => Some(output),
            ProcessError::Spawn(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;

// ---------------------------------------------------------------------------
// CommandOutput
// ---------------------------------------------------------------------------

/// Captured result of one external command invocation.
///
/// Both streams are captured in full (lossy UTF-8), not line-bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Stdout and stderr concatenated, for pattern scans over everything
    /// the process said.
    pub fn combined(&self) -> String {
        let mut combined = self.stdout.clone();
        combined.push_str(&self.stderr);
        combined
    }
}

// ---------------------------------------------------------------------------
// ProcessRunner
// ---------------------------------------------------------------------------

/// Executes an external command string in a working directory with an
/// environment overlay merged over the ambient environment.
///
/// Implementations resolve `Ok` only on exit code 0; any non-zero exit is an
/// [`ProcessError::ExitStatus`] carrying the same captured output. No retry
/// and no timeout — callers that need bounded execution must wrap calls.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &str, cwd: &Path, env: &[(String, String)])
        -> Result<CommandOutput>;

    /// Like [`run`](ProcessRunner::run) but with `input` piped to stdin.
    async fn run_with_input(
        &self,
        command: &str,
        cwd: &Path,
        env: &[(String, String)],
        input: &str,
    ) -> Result<CommandOutput>;
}

// ---------------------------------------------------------------------------
// ShellRunner
// ---------------------------------------------------------------------------

/// Production runner: invokes `sh -c <command>`.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    async fn exec(
        &self,
        command: &str,
        cwd: &Path,
        env: &[(String, String)],
        input: Option<&str>,
    ) -> Result<CommandOutput> {
        debug!(command, cwd = %cwd.display(), "spawning shell command");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn()?;

        if let Some(input) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                // Dropping stdin closes the pipe so the child sees EOF.
            }
        }

        let raw = child.wait_with_output().await?;
        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&raw.stdout).to_string(),
            stderr: String::from_utf8_lossy(&raw.stderr).to_string(),
            exit_code: raw.status.code(),
        };

        if raw.status.success() {
            Ok(output)
        } else {
            Err(ProcessError::ExitStatus { output })
        }
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        env: &[(String, String)],
    ) -> Result<CommandOutput> {
        self.exec(command, cwd, env, None).await
    }

    async fn run_with_input(
        &self,
        command: &str,
        cwd: &Path,
        env: &[(String, String)],
        input: &str,
    ) -> Result<CommandOutput> {
        self.exec(command, cwd, env, Some(input)).await
    }
}

/// Quote an arbitrary string for safe interpolation into an `sh -c` command.
pub fn sh_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cwd() -> PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn captures_stdout() {
        let runner = ShellRunner::new();
        let out = runner.run("printf hello", &cwd(), &[]).await.unwrap();
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn env_overlay_wins() {
        let runner = ShellRunner::new();
        let env = vec![("HELM_TEST_VALUE".to_string(), "overlay".to_string())];
        let out = runner
            .run("printf \"$HELM_TEST_VALUE\"", &cwd(), &env)
            .await
            .unwrap();
        assert_eq!(out.stdout, "overlay");
    }

    #[tokio::test]
    async fn ambient_environment_is_inherited() {
        let runner = ShellRunner::new();
        // PATH is always present in the ambient environment.
        let out = runner.run("printf \"$PATH\"", &cwd(), &[]).await.unwrap();
        assert!(!out.stdout.is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_carries_output() {
        let runner = ShellRunner::new();
        let err = runner
            .run("printf oops >&2; exit 3", &cwd(), &[])
            .await
            .unwrap_err();
        match err {
            ProcessError::ExitStatus { output } => {
                assert_eq!(output.exit_code, Some(3));
                assert_eq!(output.stderr, "oops");
            }
            other => panic!("expected ExitStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_cwd_is_spawn_error() {
        let runner = ShellRunner::new();
        let err = runner
            .run("true", Path::new("/nonexistent/helm/dir"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn(_)));
        assert!(err.output().is_none());
    }

    #[tokio::test]
    async fn stdin_is_piped() {
        let runner = ShellRunner::new();
        let out = runner
            .run_with_input("cat", &cwd(), &[], "task description\n")
            .await
            .unwrap();
        assert_eq!(out.stdout, "task description\n");
    }

    #[test]
    fn combined_concatenates_streams() {
        let out = CommandOutput {
            stdout: "a".into(),
            stderr: "b".into(),
            exit_code: Some(0),
        };
        assert_eq!(out.combined(), "ab");
    }

    #[test]
    fn sh_quote_handles_quotes() {
        assert_eq!(sh_quote("plain"), "'plain'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }
}
