use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use tower_sessions::Session;
use tracing::info;
use uuid::Uuid;

use crate::db::{RepositoryLinkReconfigure, RepositoryLinkUpsert};
use crate::deployment::git::remote::{validate_branch, validate_repo_slug};
use crate::deployment::instance::validate_instance_name;

use super::api_types::{
    ConfigureWebhookRequest, CreateLinkRequest, LinkView, ReconfigureLinkRequest,
    VerifyTokenRequest,
};
use super::auth::require_deployer;
use super::error::ApiError;
use super::OrchestratorState;

const TOKEN_HEADER: &str = "X-GitHub-Token";
const WEBHOOK_SECRET_LEN: usize = 64;

fn generate_webhook_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(WEBHOOK_SECRET_LEN)
        .map(char::from)
        .collect()
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(value)
}

fn check(result: anyhow::Result<()>) -> Result<(), ApiError> {
    result.map_err(|error| ApiError::bad_request(error.to_string()))
}

async fn require_directory(path: &str) -> Result<(), ApiError> {
    let is_dir = tokio::fs::metadata(path)
        .await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(ApiError::bad_request(format!("path {path} does not exist")));
    }
    Ok(())
}

pub(super) async fn verify_token(
    State(state): State<OrchestratorState>,
    session: Session,
    Json(payload): Json<VerifyTokenRequest>,
) -> Result<Json<Value>, ApiError> {
    require_deployer(&state, &session).await?;
    let token = required("token", &payload.token)?;

    let identity = state.github.verify_credential(token).await?;
    Ok(Json(json!({ "success": true, "user": identity })))
}

pub(super) async fn list_repositories(
    State(state): State<OrchestratorState>,
    session: Session,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_deployer(&state, &session).await?;
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{TOKEN_HEADER} header is required")))?;

    let repositories = state.github.list_repositories(token).await?;
    Ok(Json(json!({
        "success": true,
        "count": repositories.len(),
        "repositories": repositories,
    })))
}

pub(super) async fn list_links(
    State(state): State<OrchestratorState>,
    session: Session,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let links = state.db.list_repository_links(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "configs": links.into_iter().map(LinkView::from).collect::<Vec<_>>(),
    })))
}

pub(super) async fn get_link(
    State(state): State<OrchestratorState>,
    session: Session,
    Path(instance_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let link = state
        .db
        .get_active_repository_link(&user.id, &instance_name)
        .await?;

    Ok(Json(match link {
        Some(link) => json!({ "success": true, "config": LinkView::from(link) }),
        None => json!({ "success": false, "config": Value::Null }),
    }))
}

pub(super) async fn create_link(
    State(state): State<OrchestratorState>,
    session: Session,
    Json(payload): Json<CreateLinkRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;

    let instance_name = required("instance_name", &payload.instance_name)?;
    let token = required("github_token", &payload.github_token)?;
    let remote_owner = required("repo_owner", &payload.repo_owner)?;
    let remote_repo = required("repo_name", &payload.repo_name)?;
    let local_path = required("local_path", &payload.local_path)?;
    check(validate_instance_name(instance_name))?;
    check(validate_repo_slug(remote_owner))?;
    check(validate_repo_slug(remote_repo))?;

    let naming = state.pipeline.naming();
    let instance_class = naming.classify(instance_name);
    let target_branch = instance_class.effective_branch(instance_name, payload.repo_branch.as_deref());
    check(validate_branch(&target_branch))?;

    let identity = state.github.verify_credential(token).await?;
    require_directory(local_path).await?;
    let encrypted = state.encrypt_credential(token)?;

    let existed = state
        .db
        .get_repository_link(&user.id, instance_name)
        .await?
        .is_some();
    let record = state
        .db
        .upsert_repository_link(&RepositoryLinkUpsert {
            id: Uuid::new_v4().to_string(),
            owner_id: user.id.clone(),
            instance_name: instance_name.to_string(),
            instance_class,
            remote_owner: remote_owner.to_string(),
            remote_repo: remote_repo.to_string(),
            target_branch,
            local_path: local_path.to_string(),
            github_username: Some(identity.username),
            access_credential_encrypted: Some(encrypted),
            auto_deploy_enabled: false,
            run_module_update_on_deploy: false,
        })
        .await?;

    let action = if existed {
        "update_github_config"
    } else {
        "create_github_config"
    };
    state
        .record_action(
            &user.id,
            action,
            instance_name,
            &format!("Repo: {remote_owner}/{remote_repo}"),
            true,
        )
        .await;
    info!(instance = instance_name, class = %record.class(), branch = %record.target_branch, "repository linked");

    Ok(Json(json!({
        "success": true,
        "message": "Configuration saved",
        "config": LinkView::from(record),
    })))
}

pub(super) async fn delete_link(
    State(state): State<OrchestratorState>,
    session: Session,
    Path(instance_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;

    if !state
        .db
        .deactivate_repository_link(&user.id, &instance_name)
        .await?
    {
        return Err(ApiError::link_not_found(&instance_name));
    }

    state
        .record_action(
            &user.id,
            "delete_github_config",
            &instance_name,
            "Configuration deactivated",
            true,
        )
        .await;

    Ok(Json(json!({
        "success": true,
        "message": "Configuration removed",
    })))
}

pub(super) async fn reset_link(
    State(state): State<OrchestratorState>,
    session: Session,
    Path(instance_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;

    let Some(record) = state
        .db
        .reset_repository_link(&user.id, &instance_name)
        .await?
    else {
        return Ok(Json(json!({
            "success": true,
            "message": "No configuration to reset",
            "action": "create_new",
        })));
    };

    state
        .record_action(
            &user.id,
            "reset_github_config",
            &instance_name,
            "Configuration reset, credential cleared",
            true,
        )
        .await;

    Ok(Json(json!({
        "success": true,
        "message": "Configuration reset. Generate a new token and reconfigure.",
        "action": "reconfigure",
        "config": {
            "instance_name": record.instance_name,
            "repo_owner": record.remote_owner,
            "repo_name": record.remote_repo,
            "repo_branch": record.target_branch,
            "local_path": record.local_path,
        },
    })))
}

pub(super) async fn reconfigure_link(
    State(state): State<OrchestratorState>,
    session: Session,
    Path(instance_name): Path<String>,
    Json(payload): Json<ReconfigureLinkRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let token = required("github_token", &payload.github_token)?;

    let overrides = |value: Option<String>| {
        value
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    let remote_owner = overrides(payload.repo_owner);
    let remote_repo = overrides(payload.repo_name);
    let target_branch = overrides(payload.repo_branch);
    let local_path = overrides(payload.local_path);

    for slug in [&remote_owner, &remote_repo].into_iter().flatten() {
        check(validate_repo_slug(slug))?;
    }
    if let Some(branch) = &target_branch {
        check(validate_branch(branch))?;
    }

    let identity = state.github.verify_credential(token).await?;

    if state
        .db
        .get_repository_link(&user.id, &instance_name)
        .await?
        .is_none()
    {
        return Err(ApiError::link_not_found(&instance_name));
    }
    if let Some(path) = &local_path {
        require_directory(path).await?;
    }

    let update = RepositoryLinkReconfigure {
        github_username: identity.username.clone(),
        access_credential_encrypted: state.encrypt_credential(token)?,
        remote_owner,
        remote_repo,
        target_branch,
        local_path,
    };
    let record = state
        .db
        .reconfigure_repository_link(&user.id, &instance_name, &update)
        .await?
        .ok_or_else(|| ApiError::link_not_found(&instance_name))?;

    state
        .record_action(
            &user.id,
            "reconfigure_github_config",
            &instance_name,
            &format!("Credential updated for GitHub user {}", identity.username),
            true,
        )
        .await;

    Ok(Json(json!({
        "success": true,
        "message": "Configuration updated",
        "config": LinkView::from(record),
    })))
}

/// Generates the webhook secret on first use, stores the deploy flags and returns
/// what the repository's webhook settings need.
pub(super) async fn configure_webhook(
    State(state): State<OrchestratorState>,
    session: Session,
    Path(instance_name): Path<String>,
    Json(payload): Json<ConfigureWebhookRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;

    let record = state
        .db
        .configure_webhook(
            &user.id,
            &instance_name,
            &generate_webhook_secret(),
            payload.auto_deploy,
            payload.run_module_update,
        )
        .await?
        .ok_or_else(|| ApiError::link_not_found(&instance_name))?;

    state
        .record_action(
            &user.id,
            "configure_webhook",
            &instance_name,
            &format!(
                "auto_deploy={} run_module_update={}",
                record.auto_deploy_enabled, record.run_module_update_on_deploy
            ),
            true,
        )
        .await;

    Ok(Json(json!({
        "success": true,
        "webhook_url": state.webhook_url(&instance_name),
        "secret": record.webhook_secret,
        "content_type": "application/json",
        "events": ["push"],
        "target_branch": record.target_branch,
        "auto_deploy": record.auto_deploy_enabled,
        "run_module_update": record.run_module_update_on_deploy,
    })))
}
