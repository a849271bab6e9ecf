//! auto-helm server — HTTP control surface for agent-driven code-change
//! tasks. Accepts submissions, runs workflows in the background, and serves
//! status reads from the in-memory task record store.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use ah_core::config::Config;
use ah_engine::{TaskStore, WorkflowEngine};
use ah_server::auth::AuthGate;
use ah_server::http_api::{api_router, ApiState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    ah_core::logging::init_logging("ah-server", "info");

    let config = Arc::new(Config::from_env());
    tokio::fs::create_dir_all(config.log_dir())
        .await
        .context("failed to create workspace log directory")?;

    let store = TaskStore::new();
    let engine = Arc::new(WorkflowEngine::new(store, config.clone()));
    let gate = AuthGate::from_config(&config);
    let state = Arc::new(ApiState::new(config.clone(), engine, gate));
    let router = api_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(workspace = %config.workspace_root.display(), "workspace root ready");
    info!("API server listening on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                return;
            }
            info!("ctrl-c received, shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}
