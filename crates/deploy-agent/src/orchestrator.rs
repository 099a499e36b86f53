use std::sync::Arc;

use anyhow::{Context, Result};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_sessions::SessionManagerLayer;
use tower_sessions_sqlx_store::SqliteStore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::db::{DbClient, NewActionLog, RepositoryLinkRecord};
use crate::deployment::git::{GitAdapter, RepositorySync};
use crate::deployment::instance::PrefixNamingPolicy;
use crate::deployment::lock::DeployLocks;
use crate::deployment::modules::OdooModuleUpdater;
use crate::deployment::pipeline::DeployPipeline;
use crate::deployment::service::SystemdServiceManager;
use crate::request_logging::log_request;
use crate::system::PrivilegeWrapper;

mod api_types;
mod auth;
pub mod credentials;
mod deploys;
mod error;
mod git_actions;
pub mod github_client;
mod links;
pub mod webhook;

use credentials::{CredentialCipher, CredentialError};
use error::ApiError;
use github_client::GitHubClient;

/// Services shared by every handler, built once at startup.
#[derive(Clone)]
pub struct OrchestratorState {
    pub db: DbClient,
    pub public_base_url: Option<String>,
    pub credentials: Option<Arc<CredentialCipher>>,
    pub github: GitHubClient,
    pub git: Arc<GitAdapter>,
    pub pipeline: DeployPipeline,
}

impl OrchestratorState {
    /// # Errors
    /// Returns an error if the database cannot be initialized, the encryption key is
    /// malformed or the HTTP client cannot be built.
    pub async fn from_config(config: &AgentConfig) -> Result<Self> {
        let database_path = config.database_path();
        let db = DbClient::initialize(&database_path)
            .await
            .with_context(|| format!("failed to initialize database at {database_path}"))?;

        let credentials = match config.encryption_key() {
            Some(key) => Some(Arc::new(
                CredentialCipher::from_base64_key(&key).context("invalid encryption_key")?,
            )),
            None => {
                warn!("encryption_key is not set; GitHub credentials cannot be stored");
                None
            }
        };

        let github = GitHubClient::new(&config.github_api_base_url(), config.github_timeout())?;
        let git = Arc::new(GitAdapter::new(config.git_binary(), config.git_timeout()));

        let privilege_wrapper = PrivilegeWrapper::new(
            config.use_sudo(),
            &config.service_prefix(),
            vec![config.dev_root(), config.prod_root()],
        );
        let services =
            SystemdServiceManager::new(privilege_wrapper.clone(), config.update_timeout());
        let modules = OdooModuleUpdater::new(
            privilege_wrapper,
            &config.system_user(),
            config.update_timeout(),
        );
        let naming = PrefixNamingPolicy {
            dev_prefix: config.dev_prefix(),
            dev_root: config.dev_root(),
            prod_root: config.prod_root(),
            service_prefix: config.service_prefix(),
        };

        let repository: Arc<dyn RepositorySync> = git.clone();
        let pipeline = DeployPipeline::new(
            repository,
            Arc::new(services),
            Arc::new(modules),
            Arc::new(naming),
            Arc::new(DeployLocks::new(config.lock_wait())),
        );

        Ok(Self {
            db,
            public_base_url: config.public_base_url(),
            credentials,
            github,
            git,
            pipeline,
        })
    }

    /// Absolute when a public base URL is configured, otherwise relative.
    #[must_use]
    pub fn webhook_url(&self, instance_name: &str) -> String {
        format!(
            "{}/api/github/webhook/{}",
            self.public_base_url.as_deref().unwrap_or_default(),
            urlencoding::encode(instance_name)
        )
    }

    fn encrypt_credential(&self, token: &str) -> Result<String, ApiError> {
        let cipher = self
            .credentials
            .as_ref()
            .ok_or(CredentialError::MissingKey)?;
        Ok(cipher.encrypt(token)?)
    }

    /// The link's access token in clear, or `None` if it has none.
    fn decrypt_credential(&self, link: &RepositoryLinkRecord) -> Result<Option<String>, ApiError> {
        let Some(encrypted) = link.access_credential_encrypted.as_deref() else {
            return Ok(None);
        };
        let cipher = self
            .credentials
            .as_ref()
            .ok_or(CredentialError::MissingKey)?;
        Ok(Some(cipher.decrypt(encrypted)?))
    }

    /// Best effort: a failed audit write is logged, never surfaced to the caller.
    async fn record_action(
        &self,
        owner_id: &str,
        action: &str,
        instance_name: &str,
        details: &str,
        success: bool,
    ) {
        let entry = NewActionLog {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            action: action.to_string(),
            instance_name: instance_name.to_string(),
            details: details.to_string(),
            status: if success { "success" } else { "error" }.to_string(),
        };

        if let Err(error) = self.db.insert_action_log(&entry).await {
            warn!(action, instance = instance_name, error = %error, "failed to record action log");
        }
    }

    async fn active_link(
        &self,
        owner_id: &str,
        instance_name: &str,
    ) -> Result<RepositoryLinkRecord, ApiError> {
        self.db
            .get_active_repository_link(owner_id, instance_name)
            .await?
            .ok_or_else(|| ApiError::link_not_found(instance_name))
    }
}

/// Routes without the session layer.
#[must_use]
pub fn router(state: OrchestratorState) -> Router {
    let github_router = Router::new()
        .route("/verify-token", post(links::verify_token))
        .route("/repos", get(links::list_repositories))
        .route("/config", get(links::list_links).post(links::create_link))
        .route(
            "/config/:instance",
            get(links::get_link).delete(links::delete_link),
        )
        .route("/config/:instance/reset", post(links::reset_link))
        .route("/config/:instance/reconfigure", post(links::reconfigure_link))
        .route("/config/:instance/webhook", post(links::configure_webhook))
        .route("/config/:instance/test-deploy", post(deploys::test_deploy))
        .route("/init-repo", post(git_actions::init_repo))
        .route("/status/:instance", get(git_actions::status))
        .route("/commit", post(git_actions::commit))
        .route("/push", post(git_actions::push))
        .route("/pull", post(git_actions::pull))
        .route("/history/:instance", get(git_actions::history))
        .route("/diff/:instance", get(git_actions::diff))
        .route("/branches/:instance", get(git_actions::branches))
        .route("/deploy/:instance", post(deploys::manual_deploy))
        .route("/deploy-logs/:instance", get(deploys::deploy_logs))
        .route("/webhook/:instance", post(webhook::receive_webhook));

    Router::new()
        .route("/api/auth/setup", post(auth::auth_setup))
        .route("/api/auth/login", post(auth::auth_login))
        .route("/api/auth/status", post(auth::auth_status))
        .route("/api/auth/session", post(auth::auth_session))
        .route("/api/auth/users", post(auth::auth_create_user))
        .nest("/api/github", github_router)
        .with_state(state)
}

/// Full application: routes, cookie sessions in the same SQLite database, and
/// request logging.
///
/// # Errors
/// Returns an error if the session table cannot be migrated.
pub async fn app(state: OrchestratorState) -> Result<Router> {
    let session_store = SqliteStore::new(state.db.pool());
    session_store.migrate().await?;

    let secure_cookies = state
        .public_base_url
        .as_deref()
        .is_some_and(|url| url.starts_with("https://"));
    let session_layer = SessionManagerLayer::new(session_store).with_secure(secure_cookies);

    Ok(router(state)
        .layer(session_layer)
        .layer(middleware::from_fn(log_request)))
}

/// # Errors
/// Returns an error if startup fails or the listener stops with an error.
pub async fn run(config: &AgentConfig) -> Result<()> {
    let state = OrchestratorState::from_config(config).await?;
    let app = app(state).await?;

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;

    info!(
        bind_address = %bind_address,
        database = %config.database_path(),
        "deploy agent listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
