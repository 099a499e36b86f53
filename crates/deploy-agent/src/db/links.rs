use anyhow::Result;
use chrono::Utc;

use crate::deployment::instance::{InstanceClass, PRODUCTION_BRANCH};

use super::{DbClient, RepositoryLinkReconfigure, RepositoryLinkRecord, RepositoryLinkUpsert};

const LINK_COLUMNS: &str = "id, owner_id, instance_name, instance_class, remote_owner, remote_repo, target_branch, local_path, github_username, access_credential_encrypted, webhook_secret, auto_deploy_enabled, run_module_update_on_deploy, active, last_deploy_at, created_at, updated_at";

// Production links always track main, whatever the caller sent.
const BRANCH_RULE: &str =
    "CASE WHEN instance_class = 'production' THEN 'main' ELSE target_branch END";

#[allow(clippy::missing_errors_doc)]
impl DbClient {
    /// Creates the link or refreshes an existing one (active or not) for the same
    /// owner and instance. The deploy flags only apply on insert; the webhook secret
    /// is never touched here.
    pub async fn upsert_repository_link(
        &self,
        link: &RepositoryLinkUpsert,
    ) -> Result<RepositoryLinkRecord> {
        let target_branch = match link.instance_class {
            InstanceClass::Production => PRODUCTION_BRANCH,
            InstanceClass::Development => link.target_branch.as_str(),
        };

        sqlx::query(
            "INSERT INTO repository_links (id, owner_id, instance_name, instance_class, remote_owner, remote_repo, target_branch, local_path, github_username, access_credential_encrypted, auto_deploy_enabled, run_module_update_on_deploy, active) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1)
            ON CONFLICT(owner_id, instance_name) DO UPDATE SET
              instance_class = excluded.instance_class,
              remote_owner = excluded.remote_owner,
              remote_repo = excluded.remote_repo,
              target_branch = excluded.target_branch,
              local_path = excluded.local_path,
              github_username = excluded.github_username,
              access_credential_encrypted = excluded.access_credential_encrypted,
              active = 1,
              updated_at = CURRENT_TIMESTAMP",
        )
        .bind(&link.id)
        .bind(&link.owner_id)
        .bind(&link.instance_name)
        .bind(link.instance_class.as_str())
        .bind(&link.remote_owner)
        .bind(&link.remote_repo)
        .bind(target_branch)
        .bind(&link.local_path)
        .bind(link.github_username.as_deref())
        .bind(link.access_credential_encrypted.as_deref())
        .bind(link.auto_deploy_enabled)
        .bind(link.run_module_update_on_deploy)
        .execute(&self.pool)
        .await?;

        self.get_repository_link(&link.owner_id, &link.instance_name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("repository link vanished after upsert"))
    }

    /// Any link for the owner and instance, active or not.
    pub async fn get_repository_link(
        &self,
        owner_id: &str,
        instance_name: &str,
    ) -> Result<Option<RepositoryLinkRecord>> {
        let record = sqlx::query_as::<_, RepositoryLinkRecord>(&format!(
            "SELECT {LINK_COLUMNS} FROM repository_links WHERE owner_id = ?1 AND instance_name = ?2"
        ))
        .bind(owner_id)
        .bind(instance_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_active_repository_link(
        &self,
        owner_id: &str,
        instance_name: &str,
    ) -> Result<Option<RepositoryLinkRecord>> {
        Ok(self
            .get_repository_link(owner_id, instance_name)
            .await?
            .filter(|record| record.active))
    }

    pub async fn list_repository_links(&self, owner_id: &str) -> Result<Vec<RepositoryLinkRecord>> {
        let records = sqlx::query_as::<_, RepositoryLinkRecord>(&format!(
            "SELECT {LINK_COLUMNS} FROM repository_links WHERE owner_id = ?1 AND active = 1 ORDER BY instance_name ASC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Active, auto-deploy-enabled links for an instance across all owners; the
    /// webhook receiver picks the one whose secret verifies.
    pub async fn list_auto_deploy_links(
        &self,
        instance_name: &str,
    ) -> Result<Vec<RepositoryLinkRecord>> {
        let records = sqlx::query_as::<_, RepositoryLinkRecord>(&format!(
            "SELECT {LINK_COLUMNS} FROM repository_links WHERE instance_name = ?1 AND active = 1 AND auto_deploy_enabled = 1 ORDER BY updated_at DESC"
        ))
        .bind(instance_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Soft delete. Returns `false` if there was no active link.
    pub async fn deactivate_repository_link(
        &self,
        owner_id: &str,
        instance_name: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE repository_links SET active = 0, updated_at = CURRENT_TIMESTAMP WHERE owner_id = ?1 AND instance_name = ?2 AND active = 1",
        )
        .bind(owner_id)
        .bind(instance_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Drops the credential and GitHub username and deactivates the link, keeping the
    /// repository, branch and path for a later relink.
    pub async fn reset_repository_link(
        &self,
        owner_id: &str,
        instance_name: &str,
    ) -> Result<Option<RepositoryLinkRecord>> {
        let result = sqlx::query(
            "UPDATE repository_links SET access_credential_encrypted = NULL, github_username = NULL, active = 0, updated_at = CURRENT_TIMESTAMP WHERE owner_id = ?1 AND instance_name = ?2",
        )
        .bind(owner_id)
        .bind(instance_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_repository_link(owner_id, instance_name).await
    }

    /// Installs a new credential, applies the overrides and reactivates the link.
    pub async fn reconfigure_repository_link(
        &self,
        owner_id: &str,
        instance_name: &str,
        update: &RepositoryLinkReconfigure,
    ) -> Result<Option<RepositoryLinkRecord>> {
        let result = sqlx::query(
            "UPDATE repository_links SET
              github_username = ?3,
              access_credential_encrypted = ?4,
              remote_owner = COALESCE(?5, remote_owner),
              remote_repo = COALESCE(?6, remote_repo),
              target_branch = CASE WHEN instance_class = 'production' THEN 'main' ELSE COALESCE(?7, target_branch) END,
              local_path = COALESCE(?8, local_path),
              active = 1,
              updated_at = CURRENT_TIMESTAMP
            WHERE owner_id = ?1 AND instance_name = ?2",
        )
        .bind(owner_id)
        .bind(instance_name)
        .bind(&update.github_username)
        .bind(&update.access_credential_encrypted)
        .bind(update.remote_owner.as_deref())
        .bind(update.remote_repo.as_deref())
        .bind(update.target_branch.as_deref())
        .bind(update.local_path.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_repository_link(owner_id, instance_name).await
    }

    /// Stores `candidate_secret` only if the link has none yet, and updates the deploy
    /// flags. Returns the link with its effective secret.
    pub async fn configure_webhook(
        &self,
        owner_id: &str,
        instance_name: &str,
        candidate_secret: &str,
        auto_deploy_enabled: bool,
        run_module_update_on_deploy: bool,
    ) -> Result<Option<RepositoryLinkRecord>> {
        let result = sqlx::query(&format!(
            "UPDATE repository_links SET
              webhook_secret = COALESCE(webhook_secret, ?3),
              auto_deploy_enabled = ?4,
              run_module_update_on_deploy = ?5,
              target_branch = {BRANCH_RULE},
              updated_at = CURRENT_TIMESTAMP
            WHERE owner_id = ?1 AND instance_name = ?2 AND active = 1"
        ))
        .bind(owner_id)
        .bind(instance_name)
        .bind(candidate_secret)
        .bind(auto_deploy_enabled)
        .bind(run_module_update_on_deploy)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_repository_link(owner_id, instance_name).await
    }

    pub async fn record_deploy_success(&self, link_id: &str) -> Result<String> {
        let deployed_at = Utc::now().to_rfc3339();
        sqlx::query("UPDATE repository_links SET last_deploy_at = ?2 WHERE id = ?1")
            .bind(link_id)
            .bind(&deployed_at)
            .execute(&self.pool)
            .await?;

        Ok(deployed_at)
    }
}
