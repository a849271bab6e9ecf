use std::collections::HashMap;
use std::sync::Arc;

use ah_core::types::{Task, TaskConfig, TaskSummary};
use tokio::sync::RwLock;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskStore
// ---------------------------------------------------------------------------

/// In-memory mapping from task identifier to task state; the single source
/// of truth consulted by status queries.
///
/// The store is a clonable handle; the workflow engine is the only writer
/// (through [`update`](TaskStore::update)) and readers receive snapshot
/// clones. Records are never evicted for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, Task>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new task record in the `queued` state and return a snapshot.
    pub async fn create(&self, config: TaskConfig) -> Task {
        let task = Task::new(config);
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id, task.clone());
        task
    }

    /// Snapshot of a task, or `None` if the id is unknown.
    pub async fn get(&self, id: Uuid) -> Option<Task> {
        let tasks = self.tasks.read().await;
        tasks.get(&id).cloned()
    }

    /// Apply a mutation to a task in place. Returns `false` for unknown ids.
    pub async fn update<F>(&self, id: Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&id) {
            Some(task) => {
                mutate(task);
                true
            }
            None => false,
        }
    }

    /// Summary projections for every known task.
    pub async fn list(&self) -> Vec<TaskSummary> {
        let tasks = self.tasks.read().await;
        let mut summaries: Vec<TaskSummary> = tasks.values().map(Task::summary).collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// Number of tasks that have not yet reached a terminal state.
    pub async fn active_count(&self) -> usize {
        let tasks = self.tasks.read().await;
        tasks.values().filter(|t| !t.status.is_terminal()).count()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
