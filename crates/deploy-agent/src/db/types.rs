use crate::deployment::instance::InstanceClass;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

/// Create-or-update input for a repository link. The webhook secret and deploy
/// timestamps are managed by their own operations.
#[derive(Debug, Clone)]
pub struct RepositoryLinkUpsert {
    pub id: String,
    pub owner_id: String,
    pub instance_name: String,
    pub instance_class: InstanceClass,
    pub remote_owner: String,
    pub remote_repo: String,
    pub target_branch: String,
    pub local_path: String,
    pub github_username: Option<String>,
    pub access_credential_encrypted: Option<String>,
    pub auto_deploy_enabled: bool,
    pub run_module_update_on_deploy: bool,
}

/// Fresh credential plus optional overrides applied when relinking after a reset.
#[derive(Debug, Clone, Default)]
pub struct RepositoryLinkReconfigure {
    pub github_username: String,
    pub access_credential_encrypted: String,
    pub remote_owner: Option<String>,
    pub remote_repo: Option<String>,
    pub target_branch: Option<String>,
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RepositoryLinkRecord {
    pub id: String,
    pub owner_id: String,
    pub instance_name: String,
    pub instance_class: String,
    pub remote_owner: String,
    pub remote_repo: String,
    pub target_branch: String,
    pub local_path: String,
    pub github_username: Option<String>,
    pub access_credential_encrypted: Option<String>,
    pub webhook_secret: Option<String>,
    pub auto_deploy_enabled: bool,
    pub run_module_update_on_deploy: bool,
    pub active: bool,
    pub last_deploy_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl RepositoryLinkRecord {
    #[must_use]
    pub fn class(&self) -> InstanceClass {
        self.instance_class
            .parse()
            .unwrap_or(InstanceClass::Production)
    }
}

#[derive(Debug, Clone)]
pub struct NewActionLog {
    pub id: String,
    pub owner_id: String,
    pub action: String,
    pub instance_name: String,
    pub details: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct ActionLogRecord {
    pub id: String,
    pub action: String,
    pub instance_name: String,
    pub details: String,
    pub status: String,
    pub created_at: String,
}
