//! Auth gate for the control surface.
//!
//! Callers are validated against an external identity provider (a
//! GoTrue/PostgREST-style deployment): the bearer token resolves to a user,
//! and an administrator-membership predicate decides privilege. When the
//! provider is not configured the gate degrades to allow-all — an explicit
//! operational bypass for trusted single-tenant deployments, flagged loudly
//! at startup and surfaced through `/health` as `authEnabled: false`.

use std::sync::Arc;

use ah_core::config::Config;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity provider not configured")]
    NotConfigured,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("identity provider request failed: {0}")]
    Provider(String),
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("identity provider not configured")]
    Unavailable,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("admin privileges required")]
    NotAdmin,
    #[error("identity provider error: {0}")]
    Provider(String),
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

/// Session credential bundle returned by a successful login, passed through
/// from the provider in its native snake_case form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub user: AuthUser,
}

/// Gate decision for one request.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub valid: bool,
    pub is_admin: bool,
    pub user: Option<AuthUser>,
    pub error: Option<String>,
}

impl VerifyOutcome {
    fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            is_admin: false,
            user: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// IdentityProvider
// ---------------------------------------------------------------------------

/// Narrow interface to the external identity provider; implementations can
/// be swapped (HTTP-backed, mock in tests).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionTokens, AuthError>;
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError>;
    async fn is_admin(&self, user_id: &str) -> Result<bool, AuthError>;
}

// ---------------------------------------------------------------------------
// HttpIdentityProvider
// ---------------------------------------------------------------------------

/// Production provider client backed by `reqwest`.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    service_key: String,
}

impl HttpIdentityProvider {
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        service_key: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            service_key: service_key.into(),
        }
    }

    /// Build a provider from config; `None` unless fully configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        match (
            config.identity_url.as_ref(),
            config.anon_key.as_ref(),
            config.service_key.as_ref(),
        ) {
            (Some(url), Some(anon), Some(service)) => Some(Self::new(url, anon, service)),
            _ => None,
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionTokens, AuthError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({"email": email, "password": password}))
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        if resp.status().is_client_error() {
            return Err(AuthError::InvalidCredentials);
        }
        if !resp.status().is_success() {
            return Err(AuthError::Provider(format!(
                "sign-in returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        if resp.status().is_client_error() {
            return Err(AuthError::InvalidCredentials);
        }
        if !resp.status().is_success() {
            return Err(AuthError::Provider(format!(
                "user lookup returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))
    }

    async fn is_admin(&self, user_id: &str) -> Result<bool, AuthError> {
        let url = format!("{}/rest/v1/rpc/is_admin", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({"uid": user_id}))
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AuthError::Provider(format!(
                "admin predicate returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// AuthGate
// ---------------------------------------------------------------------------

/// Allow/deny decision point consumed by the control surface before any
/// task-mutating or listing operation.
pub struct AuthGate {
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl AuthGate {
    /// Build the gate from config, logging which mode it runs in.
    pub fn from_config(config: &Config) -> Self {
        match HttpIdentityProvider::from_config(config) {
            Some(provider) => {
                info!("identity provider configured, admin auth enforced");
                Self {
                    provider: Some(Arc::new(provider)),
                }
            }
            None => {
                warn!("identity provider not configured -- auth gate in allow-all mode");
                Self { provider: None }
            }
        }
    }

    /// Gate with a custom provider (useful for testing).
    pub fn with_provider(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    /// Gate in allow-all mode.
    pub fn disabled() -> Self {
        Self { provider: None }
    }

    pub fn enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Validate a bearer token.
    ///
    /// Token validity fails open only through the configuration bypass; the
    /// privilege check fails closed — a predicate error yields a valid but
    /// non-admin outcome.
    pub async fn verify(&self, token: Option<&str>) -> VerifyOutcome {
        let Some(provider) = &self.provider else {
            return VerifyOutcome {
                valid: true,
                is_admin: true,
                user: None,
                error: None,
            };
        };

        let Some(token) = token else {
            return VerifyOutcome::invalid("missing bearer token");
        };

        let user = match provider.get_user(token).await {
            Ok(user) => user,
            Err(e) => return VerifyOutcome::invalid(e.to_string()),
        };

        let is_admin = match provider.is_admin(&user.id).await {
            Ok(is_admin) => is_admin,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "admin predicate failed, treating as non-admin");
                false
            }
        };

        VerifyOutcome {
            valid: true,
            is_admin,
            user: Some(user),
            error: None,
        }
    }

    /// Exchange credentials for session tokens; admins only.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionTokens, LoginError> {
        let Some(provider) = &self.provider else {
            return Err(LoginError::Unavailable);
        };

        let tokens = provider.sign_in(email, password).await.map_err(|e| match e {
            AuthError::InvalidCredentials => LoginError::InvalidCredentials,
            AuthError::NotConfigured => LoginError::Unavailable,
            AuthError::Provider(msg) => LoginError::Provider(msg),
        })?;

        // No session credential leaves the gate for a non-admin, and a
        // failing predicate counts as non-admin.
        match provider.is_admin(&tokens.user.id).await {
            Ok(true) => Ok(tokens),
            Ok(false) => Err(LoginError::NotAdmin),
            Err(e) => {
                warn!(user_id = %tokens.user.id, error = %e, "admin predicate failed during login");
                Err(LoginError::NotAdmin)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct MockProvider {
        admin: bool,
        fail_user: bool,
        fail_admin: bool,
    }

    impl MockProvider {
        fn admin() -> Arc<Self> {
            Arc::new(Self {
                admin: true,
                fail_user: false,
                fail_admin: false,
            })
        }

        fn non_admin() -> Arc<Self> {
            Arc::new(Self {
                admin: false,
                fail_user: false,
                fail_admin: false,
            })
        }
    }

    #[async_trait]
    impl IdentityProvider for MockProvider {
        async fn sign_in(&self, email: &str, password: &str) -> Result<SessionTokens, AuthError> {
            if password != "correct" {
                return Err(AuthError::InvalidCredentials);
            }
            Ok(SessionTokens {
                access_token: "access".into(),
                refresh_token: "refresh".into(),
                expires_in: 3600,
                user: AuthUser {
                    id: "u-1".into(),
                    email: Some(email.to_string()),
                },
            })
        }

        async fn get_user(&self, _access_token: &str) -> Result<AuthUser, AuthError> {
            if self.fail_user {
                return Err(AuthError::InvalidCredentials);
            }
            Ok(AuthUser {
                id: "u-1".into(),
                email: Some("user@example.com".into()),
            })
        }

        async fn is_admin(&self, _user_id: &str) -> Result<bool, AuthError> {
            if self.fail_admin {
                return Err(AuthError::Provider("rpc unavailable".into()));
            }
            Ok(self.admin)
        }
    }

    #[tokio::test]
    async fn unconfigured_gate_allows_all() {
        let gate = AuthGate::disabled();
        assert!(!gate.enabled());
        let outcome = gate.verify(None).await;
        assert!(outcome.valid);
        assert!(outcome.is_admin);
        assert!(outcome.user.is_none());
    }

    #[tokio::test]
    async fn missing_token_is_invalid() {
        let gate = AuthGate::with_provider(MockProvider::admin());
        let outcome = gate.verify(None).await;
        assert!(!outcome.valid);
        assert!(!outcome.is_admin);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn bad_token_is_invalid() {
        let gate = AuthGate::with_provider(Arc::new(MockProvider {
            admin: true,
            fail_user: true,
            fail_admin: false,
        }));
        let outcome = gate.verify(Some("garbage")).await;
        assert!(!outcome.valid);
    }

    #[tokio::test]
    async fn admin_token_is_valid_and_admin() {
        let gate = AuthGate::with_provider(MockProvider::admin());
        let outcome = gate.verify(Some("token")).await;
        assert!(outcome.valid);
        assert!(outcome.is_admin);
        assert_eq!(outcome.user.unwrap().id, "u-1");
    }

    #[tokio::test]
    async fn predicate_failure_is_valid_but_not_admin() {
        let gate = AuthGate::with_provider(Arc::new(MockProvider {
            admin: true,
            fail_user: false,
            fail_admin: true,
        }));
        let outcome = gate.verify(Some("token")).await;
        assert!(outcome.valid);
        assert!(!outcome.is_admin);
    }

    #[tokio::test]
    async fn login_rejects_non_admin_with_valid_credentials() {
        let gate = AuthGate::with_provider(MockProvider::non_admin());
        let err = gate.login("user@example.com", "correct").await.unwrap_err();
        assert!(matches!(err, LoginError::NotAdmin));
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials() {
        let gate = AuthGate::with_provider(MockProvider::admin());
        let err = gate.login("user@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, LoginError::InvalidCredentials));
    }

    #[tokio::test]
    async fn login_returns_tokens_for_admin() {
        let gate = AuthGate::with_provider(MockProvider::admin());
        let tokens = gate.login("admin@example.com", "correct").await.unwrap();
        assert_eq!(tokens.access_token, "access");
        assert_eq!(tokens.user.email.as_deref(), Some("admin@example.com"));
    }

    #[tokio::test]
    async fn login_unavailable_without_provider() {
        let gate = AuthGate::disabled();
        let err = gate.login("a@example.com", "correct").await.unwrap_err();
        assert!(matches!(err, LoginError::Unavailable));
    }
}
