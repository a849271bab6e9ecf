use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskLogWriter
// ---------------------------------------------------------------------------

/// Append-only per-task log file under `<log_dir>/<task-id>.log`.
///
/// Mirrors the in-memory log so a crash mid-task still leaves a forensic
/// trail on disk. Lines are plain text, one per append, already timestamped
/// by the caller.
#[derive(Debug, Clone)]
pub struct TaskLogWriter {
    path: PathBuf,
}

impl TaskLogWriter {
    /// Create a writer for `task_id`, creating `log_dir` if needed.
    pub async fn new(log_dir: &Path, task_id: Uuid) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(log_dir).await?;
        Ok(Self {
            path: log_dir.join(format!("{task_id}.log")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Each call opens in append mode so concurrent
    /// writers interleave whole lines rather than torn fragments.
    pub async fn append(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TaskLogWriter::new(dir.path(), Uuid::new_v4()).await.unwrap();

        writer.append("[t0] first").await.unwrap();
        writer.append("[t1] second").await.unwrap();

        let content = tokio::fs::read_to_string(writer.path()).await.unwrap();
        assert_eq!(content, "[t0] first\n[t1] second\n");
    }

    #[tokio::test]
    async fn creates_missing_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("workspace").join("logs");
        let writer = TaskLogWriter::new(&nested, Uuid::new_v4()).await.unwrap();
        writer.append("hello").await.unwrap();
        assert!(writer.path().exists());
    }

    #[tokio::test]
    async fn file_name_is_task_id() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let writer = TaskLogWriter::new(dir.path(), id).await.unwrap();
        assert_eq!(
            writer.path().file_name().unwrap().to_str().unwrap(),
            format!("{id}.log")
        );
    }
}
