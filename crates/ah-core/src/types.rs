use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Coarse workflow state of a task.
///
/// States advance strictly forward; `failed` is reachable from every
/// non-terminal state and `completed` can be reached directly from
/// `developing` when the agent leaves the working tree unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Cloning,
    Checkout,
    Developing,
    Testing,
    Committing,
    Pushing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Returns `true` for the two terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Returns `true` when a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &TaskStatus) -> bool {
        if *target == TaskStatus::Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (TaskStatus::Queued, TaskStatus::Cloning)
                | (TaskStatus::Cloning, TaskStatus::Checkout)
                | (TaskStatus::Checkout, TaskStatus::Developing)
                | (TaskStatus::Developing, TaskStatus::Testing)
                | (TaskStatus::Developing, TaskStatus::Committing)
                | (TaskStatus::Developing, TaskStatus::Completed)
                | (TaskStatus::Testing, TaskStatus::Committing)
                | (TaskStatus::Committing, TaskStatus::Pushing)
                | (TaskStatus::Pushing, TaskStatus::Completed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Cloning => "cloning",
            TaskStatus::Checkout => "checkout",
            TaskStatus::Developing => "developing",
            TaskStatus::Testing => "testing",
            TaskStatus::Committing => "committing",
            TaskStatus::Pushing => "pushing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// TaskConfig
// ---------------------------------------------------------------------------

/// Immutable snapshot of a task submission, validated once at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Repository URL to clone or update.
    pub repo: String,
    /// Natural-language task description handed to the agent.
    pub task: String,
    /// Branch to work on.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Create the branch instead of switching to an existing one.
    #[serde(default)]
    pub create_branch: bool,
    /// Optional test command run after the agent.
    #[serde(default)]
    pub test_command: Option<String>,
    /// Optional commit message override.
    #[serde(default)]
    pub commit_message: Option<String>,
    /// Commit and push even when the test command fails.
    #[serde(default)]
    pub commit_on_test_failure: bool,
    /// Optional subdirectory of the working copy to run the agent in.
    #[serde(default)]
    pub subdir: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

impl TaskConfig {
    pub fn new(repo: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            task: task.into(),
            branch: default_branch(),
            create_branch: false,
            test_command: None,
            commit_message: None,
            commit_on_test_failure: false,
            subdir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

/// Terminal payload of a task, set exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub success: bool,
    pub message: String,
    /// Short commit hash, `None` when the working tree had no changes.
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl TaskResult {
    /// Successful terminal payload.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            commit: None,
            branch: None,
            repo: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Failed terminal payload.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            commit: None,
            branch: None,
            repo: None,
            stdout: None,
            stderr: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The unit of work: one request to apply an agent-driven change to a
/// repository and carry it through to a pushed commit or a reported failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub config: TaskConfig,
    pub status: TaskStatus,
    /// Human-readable description of the current/last action.
    pub step: String,
    /// Append-only timestamped log lines; frozen once the task is terminal.
    pub logs: Vec<String>,
    /// Last captured agent output; overwritten at most once per task.
    pub claude_output: Option<String>,
    /// Last captured test-command output; overwritten at most once per task.
    pub test_output: Option<String>,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(config: TaskConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            status: TaskStatus::Queued,
            step: "Task queued".to_string(),
            logs: Vec::new(),
            claude_output: None,
            test_output: None,
            result: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Advance to `status`, updating the step label and appending a log line.
    ///
    /// Invalid transitions (including any write after a terminal state) are
    /// ignored, which keeps the record monotonic no matter what a caller does.
    pub fn advance(&mut self, status: TaskStatus, step: impl Into<String>) -> bool {
        if !self.status.can_transition_to(&status) {
            return false;
        }
        let step = step.into();
        self.logs.push(timestamped(&step));
        self.status = status;
        self.step = step;
        true
    }

    /// Append a timestamped log line without changing status.
    pub fn note(&mut self, message: &str) {
        if !self.status.is_terminal() {
            self.logs.push(timestamped(message));
        }
    }

    /// Summary projection for list endpoints (no logs, no output blobs).
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            repo: self.config.repo.clone(),
            task: self.config.task.clone(),
            status: self.status,
            step: self.step.clone(),
            created_at: self.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: Uuid,
    pub repo: String,
    pub task: String,
    pub status: TaskStatus,
    pub step: String,
    pub created_at: DateTime<Utc>,
}

/// Format a log line as `[RFC3339-UTC] message`.
pub fn timestamped(message: &str) -> String {
    format!(
        "[{}] {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        message
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
