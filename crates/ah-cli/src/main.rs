//! auto-helm CLI -- run a single agent-driven code-change task to
//! completion in-process and surface the outcome as an exit code:
//! 0 success, 1 failure, 3 agent quota exhaustion (2 is claimed by the
//! argument parser for usage errors).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use ah_core::config::Config;
use ah_core::types::TaskConfig;
use ah_engine::{EngineError, TaskStore, WorkflowEngine};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// auto-helm CLI -- drive one repository change through clone, branch,
/// agent, tests, commit, and push.
#[derive(Parser)]
#[command(name = "ah", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task to a terminal state and exit.
    Run {
        /// Repository URL to clone or update.
        #[arg(long)]
        repo: String,
        /// Natural-language task description for the agent.
        #[arg(long)]
        task: String,
        /// Branch to work on.
        #[arg(long, default_value = "main")]
        branch: String,
        /// Create the branch instead of switching to an existing one.
        #[arg(long)]
        create_branch: bool,
        /// Test command to run after the agent.
        #[arg(long)]
        test_command: Option<String>,
        /// Commit message override.
        #[arg(long)]
        commit_message: Option<String>,
        /// Commit and push even when the test command fails.
        #[arg(long)]
        commit_on_test_failure: bool,
        /// Subdirectory of the working copy to run the agent in.
        #[arg(long)]
        subdir: Option<String>,
        /// Print the terminal task record as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    ah_core::logging::init_logging("ah", "warn");

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run {
            repo,
            task,
            branch,
            create_branch,
            test_command,
            commit_message,
            commit_on_test_failure,
            subdir,
            json,
        } => {
            let mut config = TaskConfig::new(repo, task);
            config.branch = branch;
            config.create_branch = create_branch;
            config.test_command = test_command;
            config.commit_message = commit_message;
            config.commit_on_test_failure = commit_on_test_failure;
            config.subdir = subdir;
            run_task(config, json).await?
        }
    };
    std::process::exit(code);
}

async fn run_task(task_config: TaskConfig, json: bool) -> Result<i32> {
    let config = Arc::new(Config::from_env());
    let store = TaskStore::new();
    let engine = WorkflowEngine::new(store.clone(), config);

    let record = store.create(task_config).await;
    info!(task_id = %record.id, "running task");

    let outcome = engine.run(record.id).await;
    let record = store
        .get(record.id)
        .await
        .context("task record vanished from the store")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    }

    match outcome {
        Ok(result) => {
            if !json {
                println!("{}", result.message);
                if let Some(commit) = &result.commit {
                    println!("commit: {commit}");
                }
            }
            Ok(0)
        }
        Err(err) => {
            if !json {
                eprintln!("task failed at step: {}", record.step);
                eprintln!("{err}");
                if matches!(err, EngineError::QuotaExhausted(_)) {
                    eprintln!("agent quota exhausted -- add billing credit and retry");
                }
            }
            Ok(err.exit_code())
        }
    }
}
