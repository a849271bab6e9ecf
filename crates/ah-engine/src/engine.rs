//! WorkflowEngine -- the state machine that drives one task from `queued`
//! to a terminal outcome through external process invocations.
//!
//! Every externally observable action goes through the [`ProcessRunner`];
//! progress is published to the [`TaskStore`] and mirrored to a per-task
//! log file before each invocation, so a crash mid-task leaves a forensic
//! trail even though in-memory state is lost.

use std::path::Path;
use std::sync::Arc;

use ah_core::config::Config;
use ah_core::process::{sh_quote, CommandOutput, ProcessError, ProcessRunner, ShellRunner};
use ah_core::types::{TaskConfig, TaskResult, TaskStatus};
use ah_core::workspace::{porcelain_paths, repo_dir_name, RepoLocks};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::quota;
use crate::store::TaskStore;
use crate::tasklog::TaskLogWriter;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task {0} not found")]
    UnknownTask(Uuid),
    #[error("{context} failed with exit status {:?}", .output.exit_code)]
    Command {
        context: String,
        output: CommandOutput,
    },
    #[error("{context} could not be spawned: {message}")]
    Spawn { context: String, message: String },
    #[error("agent quota exhausted (output matched {0:?})")]
    QuotaExhausted(&'static str),
    #[error("tests failed with exit status {:?}", .output.exit_code)]
    TestsFailed { output: CommandOutput },
    #[error("push failed; commit {commit} exists locally but was not pushed")]
    PushFailed {
        commit: String,
        output: CommandOutput,
    },
    #[error("task log error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Process exit code for the CLI surface. Quota exhaustion gets its own
    /// code so operators can alert on billing separately from code defects.
    /// (Exit code 2 is reserved for usage errors by the argument parser.)
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::QuotaExhausted(_) => 3,
            _ => 1,
        }
    }

    /// Captured streams of the failing invocation, when the process ran.
    fn captured(&self) -> (Option<String>, Option<String>) {
        let output = match self {
            EngineError::Command { output, .. }
            | EngineError::TestsFailed { output }
            | EngineError::PushFailed { output, .. } => Some(output),
            _ => None,
        };
        match output {
            Some(o) => (
                (!o.stdout.is_empty()).then(|| o.stdout.clone()),
                (!o.stderr.is_empty()).then(|| o.stderr.clone()),
            ),
            None => (None, None),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Drives tasks through clone -> checkout -> agent -> test -> commit -> push.
///
/// The engine owns no task state of its own: the [`TaskStore`] is the only
/// synchronization surface, and each `run` call mutates exactly one record.
pub struct WorkflowEngine {
    store: TaskStore,
    config: Arc<Config>,
    runner: Arc<dyn ProcessRunner>,
    locks: RepoLocks,
}

impl WorkflowEngine {
    /// Create an engine backed by the real shell runner.
    pub fn new(store: TaskStore, config: Arc<Config>) -> Self {
        Self::with_runner(store, config, Arc::new(ShellRunner::new()))
    }

    /// Create an engine with a custom process runner (useful for testing).
    pub fn with_runner(
        store: TaskStore,
        config: Arc<Config>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            store,
            config,
            runner,
            locks: RepoLocks::new(),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn runner(&self) -> &Arc<dyn ProcessRunner> {
        &self.runner
    }

    /// Run the workflow for `task_id` on a detached tokio task.
    ///
    /// Submission paths use this so the request returns before the first
    /// step runs; the terminal outcome lands in the store either way.
    pub fn spawn(engine: Arc<WorkflowEngine>, task_id: Uuid) {
        tokio::spawn(async move {
            if let Err(e) = engine.run(task_id).await {
                warn!(task_id = %task_id, error = %e, "task workflow ended in failure");
            }
        });
    }

    /// Run the workflow for `task_id` to a terminal state.
    ///
    /// The terminal bookkeeping (status, `result`, `error`, final log line)
    /// is always written to the store before this returns.
    pub async fn run(&self, task_id: Uuid) -> Result<TaskResult> {
        let task = self
            .store
            .get(task_id)
            .await
            .ok_or(EngineError::UnknownTask(task_id))?;

        let log = match TaskLogWriter::new(&self.config.log_dir(), task_id).await {
            Ok(log) => log,
            Err(e) => {
                let err = EngineError::Io(e);
                let message = err.to_string();
                self.store
                    .update(task_id, |t| {
                        t.advance(TaskStatus::Failed, format!("Task failed: {message}"));
                        t.error = Some(message.clone());
                        t.result = Some(TaskResult::failure(message.clone()));
                    })
                    .await;
                return Err(err);
            }
        };

        info!(task_id = %task_id, repo = %task.config.repo, "starting task workflow");

        match self.execute(task_id, &task.config, &log).await {
            Ok(result) => {
                info!(task_id = %task_id, commit = ?result.commit, "task workflow completed");
                self.finish_success(task_id, &result, &log).await;
                Ok(result)
            }
            Err(err) => {
                error!(task_id = %task_id, error = %err, "task workflow failed");
                self.finish_failure(task_id, &err, &log).await;
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Step sequence
    // -----------------------------------------------------------------------

    async fn execute(
        &self,
        task_id: Uuid,
        cfg: &TaskConfig,
        log: &TaskLogWriter,
    ) -> Result<TaskResult> {
        let remote = self.config.git_remote.clone();
        let repo_name = repo_dir_name(&cfg.repo);
        let repo_dir = self.config.workspace_root.join(&repo_name);
        let branch = cfg.branch.clone();
        let quoted_branch = sh_quote(&branch);

        // -- Step 1: clone or update ---------------------------------------
        self.transition(
            task_id,
            TaskStatus::Cloning,
            format!("Cloning {}", cfg.repo),
            log,
        )
        .await;
        {
            // The reset below is destructive; serialize against other tasks
            // that derived the same working-copy name.
            let _guard = self.locks.acquire(&repo_name).await;
            tokio::fs::create_dir_all(&self.config.workspace_root).await?;

            if repo_dir.join(".git").exists() {
                self.note(task_id, "Existing working copy found, fetching and resetting", log)
                    .await;
                self.run_step("git fetch", "git fetch --all --prune", &repo_dir)
                    .await?;
                let reset = format!(
                    "git reset --hard {}",
                    sh_quote(&format!("{remote}/{branch}"))
                );
                match self.run_step("git reset", &reset, &repo_dir).await {
                    Ok(_) => {}
                    Err(_) if cfg.create_branch => {
                        // The branch to create may not exist on the remote
                        // yet; land on the remote default tip instead.
                        self.note(
                            task_id,
                            &format!("{remote}/{branch} not found, resetting to {remote}/HEAD"),
                            log,
                        )
                        .await;
                        let fallback = format!(
                            "git reset --hard {}",
                            sh_quote(&format!("{remote}/HEAD"))
                        );
                        self.run_step("git reset", &fallback, &repo_dir).await?;
                    }
                    Err(err) => return Err(err),
                }
            } else {
                let clone = format!(
                    "git clone {} {}",
                    sh_quote(&cfg.repo),
                    sh_quote(&repo_name)
                );
                self.run_step("git clone", &clone, &self.config.workspace_root)
                    .await?;
            }
        }

        // -- Step 2: branch resolution -------------------------------------
        self.transition(
            task_id,
            TaskStatus::Checkout,
            format!("Checking out branch {branch}"),
            log,
        )
        .await;
        if cfg.create_branch {
            let create = format!("git checkout -b {quoted_branch}");
            if self.run_step("git checkout -b", &create, &repo_dir).await.is_err() {
                self.note(
                    task_id,
                    &format!("Branch {branch} already exists, switching to it"),
                    log,
                )
                .await;
                self.run_step(
                    "git checkout",
                    &format!("git checkout {quoted_branch}"),
                    &repo_dir,
                )
                .await?;
            }
        } else {
            let switch = format!("git checkout {quoted_branch}");
            if self.run_step("git checkout", &switch, &repo_dir).await.is_err() {
                self.note(
                    task_id,
                    &format!("Branch {branch} not found locally, creating from {remote}/{branch}"),
                    log,
                )
                .await;
                let track = format!(
                    "git checkout -b {quoted_branch} {}",
                    sh_quote(&format!("{remote}/{branch}"))
                );
                self.run_step("git checkout -b", &track, &repo_dir).await?;
            }
        }

        // -- Step 3: run the agent -----------------------------------------
        self.transition(
            task_id,
            TaskStatus::Developing,
            "Running Claude agent".to_string(),
            log,
        )
        .await;
        let agent_dir = match &cfg.subdir {
            Some(sub) => repo_dir.join(sub),
            None => repo_dir.clone(),
        };
        let (agent_output, agent_failed) = match self
            .runner
            .run_with_input(&self.config.claude_command, &agent_dir, &[], &cfg.task)
            .await
        {
            Ok(output) => (output, false),
            Err(ProcessError::ExitStatus { output }) => (output, true),
            Err(ProcessError::Spawn(e)) => {
                return Err(EngineError::Spawn {
                    context: "claude agent".to_string(),
                    message: e.to_string(),
                })
            }
        };
        let combined = agent_output.combined();
        self.store
            .update(task_id, |t| t.claude_output = Some(combined.clone()))
            .await;
        self.note(
            task_id,
            &format!("Agent finished ({} bytes of output)", combined.len()),
            log,
        )
        .await;

        // Billing vocabulary wins over the exit code in both directions: a
        // clean exit with a quota message is still quota exhaustion, and a
        // non-zero exit with one is not a generic failure.
        if let Some(marker) = quota::quota_marker(&combined) {
            return Err(EngineError::QuotaExhausted(marker));
        }
        if agent_failed {
            return Err(EngineError::Command {
                context: "claude agent".to_string(),
                output: agent_output,
            });
        }

        // -- Commit decision -----------------------------------------------
        let status = self
            .run_step("git status", "git status --porcelain", &repo_dir)
            .await?;
        let pending = porcelain_paths(&status.stdout);
        if pending.is_empty() {
            self.note(task_id, "No changes in working tree, nothing to commit", log)
                .await;
            let mut result = TaskResult::success("Task completed with no changes");
            result.branch = Some(branch);
            result.repo = Some(repo_name);
            return Ok(result);
        }
        self.note(
            task_id,
            &format!("{} pending change(s) detected", pending.len()),
            log,
        )
        .await;

        // -- Step 4: tests (optional) --------------------------------------
        if let Some(test_command) = &cfg.test_command {
            self.transition(
                task_id,
                TaskStatus::Testing,
                format!("Running tests: {test_command}"),
                log,
            )
            .await;
            match self.runner.run(test_command, &repo_dir, &[]).await {
                Ok(output) => {
                    self.store
                        .update(task_id, |t| t.test_output = Some(output.combined()))
                        .await;
                    self.note(task_id, "Tests passed", log).await;
                }
                Err(ProcessError::ExitStatus { output }) => {
                    self.store
                        .update(task_id, |t| t.test_output = Some(output.combined()))
                        .await;
                    if cfg.commit_on_test_failure {
                        self.note(
                            task_id,
                            "Tests failed, committing anyway (commitOnTestFailure set)",
                            log,
                        )
                        .await;
                    } else {
                        return Err(EngineError::TestsFailed { output });
                    }
                }
                Err(ProcessError::Spawn(e)) => {
                    return Err(EngineError::Spawn {
                        context: "test command".to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }

        // -- Step 5: commit --------------------------------------------------
        self.transition(
            task_id,
            TaskStatus::Committing,
            "Committing changes".to_string(),
            log,
        )
        .await;
        self.run_step("git add", "git add -A", &repo_dir).await?;
        let message = cfg
            .commit_message
            .clone()
            .unwrap_or_else(|| default_commit_message(&cfg.task));
        self.run_step(
            "git commit",
            &format!("git commit -m {}", sh_quote(&message)),
            &repo_dir,
        )
        .await?;
        let commit = self
            .run_step("git rev-parse", "git rev-parse --short HEAD", &repo_dir)
            .await?
            .stdout
            .trim()
            .to_string();
        self.note(task_id, &format!("Committed {commit}"), log).await;

        // -- Step 6: push ----------------------------------------------------
        self.transition(
            task_id,
            TaskStatus::Pushing,
            format!("Pushing {branch} to {remote}"),
            log,
        )
        .await;
        let push = format!("git push -u {} {quoted_branch}", sh_quote(&remote));
        match self.run_step("git push", &push, &repo_dir).await {
            Ok(_) => {}
            Err(EngineError::Command { output, .. }) => {
                return Err(EngineError::PushFailed { commit, output });
            }
            Err(err) => return Err(err),
        }

        let mut result = TaskResult::success(format!(
            "Task completed, pushed commit {commit} to {branch}"
        ));
        result.commit = Some(commit);
        result.branch = Some(branch);
        result.repo = Some(repo_name);
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn run_step(
        &self,
        context: &str,
        command: &str,
        cwd: &Path,
    ) -> Result<CommandOutput> {
        self.runner
            .run(command, cwd, &[])
            .await
            .map_err(|err| match err {
                ProcessError::ExitStatus { output } => EngineError::Command {
                    context: context.to_string(),
                    output,
                },
                ProcessError::Spawn(e) => EngineError::Spawn {
                    context: context.to_string(),
                    message: e.to_string(),
                },
            })
    }

    /// Publish a status transition to the store and the log file.
    async fn transition(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        step: String,
        log: &TaskLogWriter,
    ) {
        info!(task_id = %task_id, status = %status, step = %step, "task transition");
        let mut line = None;
        self.store
            .update(task_id, |t| {
                if t.advance(status, step.clone()) {
                    line = t.logs.last().cloned();
                }
            })
            .await;
        if let Some(line) = line {
            self.append_file(log, &line).await;
        }
    }

    /// Append a log line without a status change.
    async fn note(&self, task_id: Uuid, message: &str, log: &TaskLogWriter) {
        let mut line = None;
        self.store
            .update(task_id, |t| {
                t.note(message);
                line = t.logs.last().cloned();
            })
            .await;
        if let Some(line) = line {
            self.append_file(log, &line).await;
        }
    }

    async fn append_file(&self, log: &TaskLogWriter, line: &str) {
        if let Err(e) = log.append(line).await {
            warn!(path = %log.path().display(), error = %e, "failed to append task log file");
        }
    }

    async fn finish_success(&self, task_id: Uuid, result: &TaskResult, log: &TaskLogWriter) {
        let mut line = None;
        self.store
            .update(task_id, |t| {
                t.advance(TaskStatus::Completed, result.message.clone());
                t.result = Some(result.clone());
                line = t.logs.last().cloned();
            })
            .await;
        if let Some(line) = line {
            self.append_file(log, &line).await;
        }
    }

    async fn finish_failure(&self, task_id: Uuid, err: &EngineError, log: &TaskLogWriter) {
        let message = err.to_string();
        let (stdout, stderr) = err.captured();
        let mut line = None;
        self.store
            .update(task_id, |t| {
                t.advance(TaskStatus::Failed, format!("Task failed: {message}"));
                t.error = Some(message.clone());
                let mut result = TaskResult::failure(message.clone());
                result.stdout = stdout.clone();
                result.stderr = stderr.clone();
                t.result = Some(result);
                line = t.logs.last().cloned();
            })
            .await;
        if let Some(line) = line {
            self.append_file(log, &line).await;
        }
    }
}

/// Default commit message: the task description plus an attribution trailer.
fn default_commit_message(task: &str) -> String {
    format!("{task}\n\nAutomated commit by auto-helm")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
