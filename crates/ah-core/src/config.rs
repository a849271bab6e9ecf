use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Runtime configuration for auto-helm, derived from environment variables.
///
/// Every knob has a default so a bare `ah-server` invocation comes up in a
/// usable (auth-bypassed) state. The identity provider trio is optional:
/// when any of `HELM_IDENTITY_URL` / `HELM_SERVICE_KEY` / `HELM_ANON_KEY` is
/// missing, the auth gate runs in its documented allow-all mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory holding repository working copies and task logs.
    pub workspace_root: PathBuf,
    /// Port the HTTP control surface listens on.
    pub port: u16,
    /// Command the agent step pipes the task description into.
    pub claude_command: String,
    /// Command whose stdout lines populate the `/repos` listing.
    pub repos_command: String,
    /// Remote name used for fetch/reset/push.
    pub git_remote: String,
    /// Identity provider base URL (e.g. a GoTrue deployment).
    pub identity_url: Option<String>,
    /// Privileged key for the admin-membership predicate.
    pub service_key: Option<String>,
    /// Public key used for the login exchange and user lookups.
    pub anon_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let workspace_root = dirs::home_dir()
            .map(|home| home.join(".auto-helm").join("workspace"))
            .unwrap_or_else(|| PathBuf::from("/tmp/auto-helm/workspace"));
        Self {
            workspace_root,
            port: 8787,
            claude_command: "claude -p --dangerously-skip-permissions".to_string(),
            repos_command: "gh repo list --json nameWithOwner --jq '.[].nameWithOwner'"
                .to_string(),
            git_remote: "origin".to_string(),
            identity_url: None,
            service_key: None,
            anon_key: None,
        }
    }
}

impl Config {
    /// Build a config from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup (testable seam).
    ///
    /// Unparseable values fall back to the default with a warning rather
    /// than refusing to start.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(root) = lookup("HELM_WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(root);
        }
        if let Some(port) = lookup("HELM_PORT") {
            match port.parse::<u16>() {
                Ok(p) => config.port = p,
                Err(_) => warn!(value = %port, "invalid HELM_PORT, using default"),
            }
        }
        if let Some(cmd) = lookup("HELM_CLAUDE_CMD") {
            config.claude_command = cmd;
        }
        if let Some(cmd) = lookup("HELM_REPOS_CMD") {
            config.repos_command = cmd;
        }
        if let Some(remote) = lookup("HELM_GIT_REMOTE") {
            config.git_remote = remote;
        }
        config.identity_url = lookup("HELM_IDENTITY_URL").filter(|v| !v.is_empty());
        config.service_key = lookup("HELM_SERVICE_KEY").filter(|v| !v.is_empty());
        config.anon_key = lookup("HELM_ANON_KEY").filter(|v| !v.is_empty());

        config
    }

    /// Directory holding the per-task durable log files.
    pub fn log_dir(&self) -> PathBuf {
        self.workspace_root.join("logs")
    }

    /// Whether the identity provider is fully configured.
    ///
    /// When false, the auth gate degrades to allow-all — an explicit
    /// operational bypass for trusted single-tenant deployments.
    pub fn auth_enabled(&self) -> bool {
        self.identity_url.is_some() && self.service_key.is_some() && self.anon_key.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
