use serde::{Deserialize, Serialize};

use crate::db::{ActionLogRecord, RepositoryLinkRecord};

#[derive(Debug, Deserialize)]
pub(super) struct SetupRequest {
    pub(super) username: String,
    pub(super) password: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct LoginRequest {
    pub(super) username: String,
    pub(super) password: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateUserRequest {
    pub(super) username: String,
    pub(super) password: String,
    pub(super) role: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct AuthStatusResponse {
    pub(super) users_count: i64,
    pub(super) authenticated: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct VerifyTokenRequest {
    pub(super) token: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateLinkRequest {
    pub(super) instance_name: String,
    pub(super) github_token: String,
    pub(super) repo_owner: String,
    pub(super) repo_name: String,
    pub(super) local_path: String,
    pub(super) repo_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ReconfigureLinkRequest {
    pub(super) github_token: String,
    pub(super) repo_owner: Option<String>,
    pub(super) repo_name: Option<String>,
    pub(super) repo_branch: Option<String>,
    pub(super) local_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ConfigureWebhookRequest {
    #[serde(default = "enabled")]
    pub(super) auto_deploy: bool,
    #[serde(default)]
    pub(super) run_module_update: bool,
}

const fn enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub(super) struct InstanceRequest {
    pub(super) instance_name: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct CommitRequest {
    pub(super) instance_name: String,
    pub(super) message: String,
    pub(super) author_name: Option<String>,
    pub(super) author_email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ManualDeployRequest {
    #[serde(default)]
    pub(super) modules: Vec<String>,
    pub(super) run_module_update: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LimitQuery {
    pub(super) limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DiffQuery {
    pub(super) file: Option<String>,
}

/// Link as shown to clients: never the credential or the webhook secret.
#[derive(Debug, Serialize)]
pub(super) struct LinkView {
    pub(super) id: String,
    pub(super) instance_name: String,
    pub(super) instance_class: String,
    pub(super) repo_owner: String,
    pub(super) repo_name: String,
    pub(super) repo_branch: String,
    pub(super) local_path: String,
    pub(super) github_username: Option<String>,
    pub(super) has_credential: bool,
    pub(super) webhook_configured: bool,
    pub(super) auto_deploy: bool,
    pub(super) run_module_update: bool,
    pub(super) active: bool,
    pub(super) last_deploy_at: Option<String>,
    pub(super) created_at: String,
    pub(super) updated_at: String,
}

impl From<RepositoryLinkRecord> for LinkView {
    fn from(record: RepositoryLinkRecord) -> Self {
        Self {
            id: record.id,
            instance_name: record.instance_name,
            instance_class: record.instance_class,
            repo_owner: record.remote_owner,
            repo_name: record.remote_repo,
            repo_branch: record.target_branch,
            local_path: record.local_path,
            github_username: record.github_username,
            has_credential: record.access_credential_encrypted.is_some(),
            webhook_configured: record.webhook_secret.is_some(),
            auto_deploy: record.auto_deploy_enabled,
            run_module_update: record.run_module_update_on_deploy,
            active: record.active,
            last_deploy_at: record.last_deploy_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct ActionLogItem {
    pub(super) id: String,
    pub(super) action: String,
    pub(super) instance_name: String,
    pub(super) details: String,
    pub(super) status: String,
    pub(super) created_at: String,
}

impl From<ActionLogRecord> for ActionLogItem {
    fn from(record: ActionLogRecord) -> Self {
        Self {
            id: record.id,
            action: record.action,
            instance_name: record.instance_name,
            details: record.details,
            status: record.status,
            created_at: record.created_at,
        }
    }
}
