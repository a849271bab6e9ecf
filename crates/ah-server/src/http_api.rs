use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware as axum_middleware,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use ah_core::config::Config;
use ah_core::types::TaskConfig;
use ah_engine::{TaskStore, WorkflowEngine};

use crate::auth::{AuthGate, LoginError};
use crate::json_response::PrettyJson;

// ---------------------------------------------------------------------------
// ApiState
// ---------------------------------------------------------------------------

/// Shared state for all HTTP handlers.
pub struct ApiState {
    pub config: Arc<Config>,
    pub store: TaskStore,
    pub engine: Arc<WorkflowEngine>,
    pub gate: AuthGate,
}

impl ApiState {
    pub fn new(config: Arc<Config>, engine: Arc<WorkflowEngine>, gate: AuthGate) -> Self {
        Self {
            config,
            store: engine.store().clone(),
            engine,
            gate,
        }
    }
}

/// Build the full API router.
///
/// Health and the login/check/logout routes are open; everything that
/// mutates or lists tasks sits behind the admin middleware.
pub fn api_router(state: Arc<ApiState>) -> Router {
    let protected = Router::new()
        .route("/repos", get(list_repos))
        .route("/task", post(submit_task))
        .route("/task/{id}", get(get_task))
        .route("/tasks", get(list_tasks))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/auth/check", get(auth_check))
        .route("/auth/logout", post(logout))
        .merge(protected)
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth middleware
// ---------------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

async fn require_admin(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Response {
    let token = bearer_token(req.headers());
    let outcome = state.gate.verify(token.as_deref()).await;

    if !outcome.valid {
        return (
            StatusCode::UNAUTHORIZED,
            PrettyJson(json!({"error": "unauthorized"})),
        )
            .into_response();
    }
    if !outcome.is_admin {
        return (
            StatusCode::FORBIDDEN,
            PrettyJson(json!({"error": "admin privileges required"})),
        )
            .into_response();
    }
    next.run(req).await
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskRequest {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub create_branch: Option<bool>,
    #[serde(default)]
    pub test_command: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub commit_on_test_failure: Option<bool>,
    #[serde(default)]
    pub subdir: Option<String>,
}

// ---------------------------------------------------------------------------
// Open handlers
// ---------------------------------------------------------------------------

async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    PrettyJson(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now(),
        "activeTasks": state.store.active_count().await,
        "authEnabled": state.gate.enabled(),
    }))
}

async fn login(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<LoginRequest>,
) -> Response {
    match state.gate.login(&req.email, &req.password).await {
        Ok(tokens) => PrettyJson(tokens).into_response(),
        Err(LoginError::InvalidCredentials) => (
            StatusCode::UNAUTHORIZED,
            PrettyJson(json!({"error": "invalid credentials"})),
        )
            .into_response(),
        Err(LoginError::NotAdmin) => (
            StatusCode::FORBIDDEN,
            PrettyJson(json!({"error": "admin privileges required"})),
        )
            .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            PrettyJson(json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}

async fn auth_check(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = bearer_token(&headers);
    let outcome = state.gate.verify(token.as_deref()).await;
    PrettyJson(json!({
        "authenticated": outcome.valid,
        "isAdmin": outcome.is_admin,
        "user": outcome.user,
    }))
}

async fn logout() -> impl IntoResponse {
    // Sessions live with the provider; the gate holds no state to clear.
    PrettyJson(json!({"success": true}))
}

// ---------------------------------------------------------------------------
// Admin handlers
// ---------------------------------------------------------------------------

async fn list_repos(State(state): State<Arc<ApiState>>) -> Response {
    let cwd = if state.config.workspace_root.exists() {
        state.config.workspace_root.clone()
    } else {
        std::env::temp_dir()
    };
    match state
        .engine
        .runner()
        .run(&state.config.repos_command, &cwd, &[])
        .await
    {
        Ok(output) => {
            let repos: Vec<String> = output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect();
            PrettyJson(json!({"repos": repos})).into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            PrettyJson(json!({"error": format!("repository listing failed: {err}")})),
        )
            .into_response(),
    }
}

async fn submit_task(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SubmitTaskRequest>,
) -> Response {
    let repo = req.repo.filter(|v| !v.trim().is_empty());
    let task = req.task.filter(|v| !v.trim().is_empty());
    let (Some(repo), Some(task)) = (repo, task) else {
        return (
            StatusCode::BAD_REQUEST,
            PrettyJson(json!({"error": "missing required fields: repo, task"})),
        )
            .into_response();
    };

    let mut config = TaskConfig::new(repo, task);
    if let Some(branch) = req.branch.filter(|v| !v.trim().is_empty()) {
        config.branch = branch;
    }
    config.create_branch = req.create_branch.unwrap_or(false);
    config.test_command = req.test_command.filter(|v| !v.trim().is_empty());
    config.commit_message = req.commit_message;
    config.commit_on_test_failure = req.commit_on_test_failure.unwrap_or(false);
    config.subdir = req.subdir.filter(|v| !v.trim().is_empty());

    let record = state.store.create(config).await;
    // Detach the workflow; the submission response never waits on it.
    WorkflowEngine::spawn(state.engine.clone(), record.id);
    info!(task_id = %record.id, repo = %record.config.repo, "task accepted");

    (
        StatusCode::ACCEPTED,
        PrettyJson(json!({
            "taskId": record.id,
            "status": "queued",
            "message": "Task accepted, poll the status URL for progress",
            "statusUrl": format!("/task/{}", record.id),
        })),
    )
        .into_response()
}

async fn get_task(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return task_not_found();
    };
    match state.store.get(id).await {
        Some(task) => PrettyJson(task).into_response(),
        None => task_not_found(),
    }
}

async fn list_tasks(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    PrettyJson(json!({"tasks": state.store.list().await}))
}

fn task_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        PrettyJson(json!({"error": "task not found"})),
    )
        .into_response()
}
