use std::path::PathBuf;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use tower_sessions::Session;
use tracing::warn;
use uuid::Uuid;

use crate::db::RepositoryLinkRecord;
use crate::deployment::instance::validate_module_names;
use crate::deployment::pipeline::{CommitInfo, DeployAttempt, DeployRequest};

use super::api_types::{ActionLogItem, LimitQuery, ManualDeployRequest};
use super::auth::require_deployer;
use super::error::ApiError;
use super::OrchestratorState;

const DEFAULT_LOG_LIMIT: i64 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum DeployTrigger {
    Webhook,
    Manual,
    Test,
}

impl DeployTrigger {
    const fn action(self) -> &'static str {
        match self {
            Self::Webhook => "auto_deploy",
            Self::Manual => "manual_deploy",
            Self::Test => "test_deploy",
        }
    }
}

#[derive(Clone, Debug)]
pub(super) struct DeployOptions {
    pub(super) trigger: DeployTrigger,
    pub(super) run_module_update: bool,
    pub(super) modules: Vec<String>,
    pub(super) commit: CommitInfo,
}

fn describe(attempt: &DeployAttempt) -> String {
    let commit = attempt.commit_id.as_deref().unwrap_or("-");
    match (&attempt.error, &attempt.detail) {
        (Some(error), Some(detail)) => {
            format!("branch {} commit {commit}: {error}: {detail}", attempt.branch)
        }
        _ => format!("branch {} commit {commit}: deployed", attempt.branch),
    }
}

/// Runs one attempt for `link` under the instance lock, stamps `last_deploy_at` on
/// success and writes the action log entry either way.
pub(super) async fn execute_deploy(
    state: &OrchestratorState,
    link: &RepositoryLinkRecord,
    options: DeployOptions,
) -> Result<DeployAttempt, ApiError> {
    let action = options.trigger.action();
    let token = state.decrypt_credential(link).inspect_err(|error| {
        warn!(instance = %link.instance_name, error = error.kind(), "cannot decrypt access credential");
    })?;

    let request = DeployRequest {
        instance_name: link.instance_name.clone(),
        local_path: PathBuf::from(&link.local_path),
        branch: link.target_branch.clone(),
        token,
        run_module_update: options.run_module_update,
        modules: options.modules,
        commit: options.commit,
        test: options.trigger == DeployTrigger::Test,
    };

    let attempt = match state.pipeline.deploy(request).await {
        Ok(attempt) => attempt,
        Err(error) => {
            state
                .record_action(
                    &link.owner_id,
                    action,
                    &link.instance_name,
                    &error.to_string(),
                    false,
                )
                .await;
            return Err(error.into());
        }
    };

    if attempt.success {
        if let Err(error) = state.db.record_deploy_success(&link.id).await {
            warn!(instance = %link.instance_name, error = %error, "failed to record deploy time");
        }
    }
    state
        .record_action(
            &link.owner_id,
            action,
            &link.instance_name,
            &describe(&attempt),
            attempt.success,
        )
        .await;

    Ok(attempt)
}

pub(super) async fn manual_deploy(
    State(state): State<OrchestratorState>,
    session: Session,
    Path(instance_name): Path<String>,
    payload: Option<Json<ManualDeployRequest>>,
) -> Result<Json<DeployAttempt>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let Json(payload) = payload.unwrap_or_default();
    validate_module_names(&payload.modules)
        .map_err(|error| ApiError::bad_request(error.to_string()))?;

    let link = state.active_link(&user.id, &instance_name).await?;
    let options = DeployOptions {
        trigger: DeployTrigger::Manual,
        run_module_update: payload
            .run_module_update
            .unwrap_or(link.run_module_update_on_deploy),
        modules: payload.modules,
        commit: CommitInfo {
            message: Some("Manual deploy".to_string()),
            author: Some(user.username.clone()),
            timestamp: Some(Utc::now().to_rfc3339()),
            pusher: Some(user.username),
            repository: Some(format!("{}/{}", link.remote_owner, link.remote_repo)),
            ..CommitInfo::default()
        },
    };

    Ok(Json(execute_deploy(&state, &link, options).await?))
}

/// Same pipeline as a webhook delivery, with synthesized commit metadata.
pub(super) async fn test_deploy(
    State(state): State<OrchestratorState>,
    session: Session,
    Path(instance_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let link = state.active_link(&user.id, &instance_name).await?;

    let commit = CommitInfo {
        id: Some(format!("test-{}", Uuid::new_v4().simple())),
        message: Some("Test deploy".to_string()),
        author: Some(user.username.clone()),
        timestamp: Some(Utc::now().to_rfc3339()),
        pusher: Some(user.username),
        repository: Some(format!("{}/{}", link.remote_owner, link.remote_repo)),
    };
    let options = DeployOptions {
        trigger: DeployTrigger::Test,
        run_module_update: link.run_module_update_on_deploy,
        modules: Vec::new(),
        commit: commit.clone(),
    };

    let attempt = execute_deploy(&state, &link, options).await?;
    Ok(Json(json!({
        "success": attempt.success,
        "test": true,
        "commit_info": commit,
        "deploy_result": attempt,
    })))
}

pub(super) async fn deploy_logs(
    State(state): State<OrchestratorState>,
    session: Session,
    Path(instance_name): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let logs = state
        .db
        .list_action_logs(
            &user.id,
            &instance_name,
            query.limit.unwrap_or(DEFAULT_LOG_LIMIT),
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "logs": logs.into_iter().map(ActionLogItem::from).collect::<Vec<_>>(),
    })))
}
