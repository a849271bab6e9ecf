use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

// ---------------------------------------------------------------------------
// Repository naming
// ---------------------------------------------------------------------------

/// Derive the working-copy directory name for a repository URL.
///
/// The name is the URL basename with any `.git` suffix stripped, case-folded.
/// Two tasks naming the same derived name operate on the same working copy.
pub fn repo_dir_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let base = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    let base = base.strip_suffix(".git").unwrap_or(base);
    base.to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Working-tree status
// ---------------------------------------------------------------------------

/// Parse `git status --porcelain` output into the list of pending paths
/// (staged, unstaged, and untracked alike).
pub fn porcelain_paths(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            if line.len() < 4 {
                return None;
            }
            Some(line[3..].to_string())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// RepoLocks — per-repository mutual exclusion
// ---------------------------------------------------------------------------

/// Registry of per-repository-name async locks.
///
/// The workflow engine holds a repository's lock across the destructive
/// clone/update step so two tasks sharing a derived directory name cannot
/// reset the working copy out from under each other. Locks are keyed by the
/// derived name, created on first use, and never evicted.
#[derive(Debug, Clone, Default)]
pub struct RepoLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `name`, waiting if another task holds it.
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn repo_dir_name_strips_git_suffix() {
        assert_eq!(repo_dir_name("https://example.com/u/r.git"), "r");
        assert_eq!(repo_dir_name("https://example.com/u/Widgets"), "widgets");
    }

    #[test]
    fn repo_dir_name_handles_scp_style() {
        assert_eq!(repo_dir_name("git@example.com:user/Repo.git"), "repo");
    }

    #[test]
    fn repo_dir_name_ignores_trailing_slash() {
        assert_eq!(repo_dir_name("https://example.com/u/r/"), "r");
    }

    #[test]
    fn repo_dir_name_case_folds() {
        assert_eq!(
            repo_dir_name("https://example.com/u/MyProject.git"),
            "myproject"
        );
    }

    #[test]
    fn porcelain_paths_covers_all_change_kinds() {
        let output = " M src/main.rs\nA  src/new.rs\n?? untracked.txt\n";
        let paths = porcelain_paths(output);
        assert_eq!(paths, ["src/main.rs", "src/new.rs", "untracked.txt"]);
    }

    #[test]
    fn porcelain_paths_empty_output() {
        assert!(porcelain_paths("").is_empty());
        assert!(porcelain_paths("\n").is_empty());
    }

    #[tokio::test]
    async fn same_name_is_mutually_exclusive() {
        let locks = RepoLocks::new();
        let guard = locks.acquire("repo").await;

        let locks2 = locks.clone();
        let contended = tokio::time::timeout(Duration::from_millis(50), async move {
            locks2.acquire("repo").await
        })
        .await;
        assert!(contended.is_err(), "second acquire should block");

        drop(guard);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire("repo")).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn different_names_do_not_contend() {
        let locks = RepoLocks::new();
        let _a = locks.acquire("alpha").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("beta")).await;
        assert!(b.is_ok());
    }
}
