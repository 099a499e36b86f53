use std::path::Path as FsPath;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::{json, Value};
use tower_sessions::Session;

use crate::deployment::git::{github_remote_url, CommitAuthor, GitError};

use super::api_types::{CommitRequest, DiffQuery, InstanceRequest, LimitQuery};
use super::auth::{require_deployer, CurrentUser};
use super::error::ApiError;
use super::OrchestratorState;

const DEFAULT_HISTORY_LIMIT: i64 = 20;

impl OrchestratorState {
    /// Writes the action log entry for a working-copy mutation and converts the
    /// failure for the response.
    async fn audit<T>(
        &self,
        user: &CurrentUser,
        action: &str,
        instance_name: &str,
        result: Result<T, GitError>,
        success_detail: &str,
    ) -> Result<T, ApiError> {
        match result {
            Ok(value) => {
                self.record_action(&user.id, action, instance_name, success_detail, true)
                    .await;
                Ok(value)
            }
            Err(error) => {
                self.record_action(&user.id, action, instance_name, &error.to_string(), false)
                    .await;
                Err(error.into())
            }
        }
    }
}

/// Initializes the working copy, or realigns `origin` when it already exists.
pub(super) async fn init_repo(
    State(state): State<OrchestratorState>,
    session: Session,
    Json(payload): Json<InstanceRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let link = state.active_link(&user.id, &payload.instance_name).await?;
    let _guard = state.pipeline.locks().acquire(&link.instance_name).await?;

    let path = FsPath::new(&link.local_path);
    let remote_url = github_remote_url(&link.remote_owner, &link.remote_repo);

    match state
        .git
        .ensure_initialized(path, &remote_url, &link.target_branch)
        .await
    {
        Err(GitError::AlreadyInitialized(_)) => {
            let reconciliation = state.git.reconcile_remote(path, &remote_url).await;
            let reconciliation = state
                .audit(
                    &user,
                    "init_git_repo",
                    &link.instance_name,
                    reconciliation,
                    "Repository already initialized, remote reconciled",
                )
                .await?;
            Ok(Json(json!({
                "success": true,
                "message": "Repository already initialized",
                "remote": reconciliation,
            })))
        }
        result => {
            state
                .audit(
                    &user,
                    "init_git_repo",
                    &link.instance_name,
                    result,
                    &format!("Repository initialized on {}", link.target_branch),
                )
                .await?;
            Ok(Json(json!({
                "success": true,
                "message": "Repository initialized",
                "branch": link.target_branch,
                "remote_url": remote_url,
            })))
        }
    }
}

pub(super) async fn status(
    State(state): State<OrchestratorState>,
    session: Session,
    Path(instance_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let link = state.active_link(&user.id, &instance_name).await?;

    let status = state.git.status(FsPath::new(&link.local_path)).await?;
    Ok(Json(json!({ "success": true, "status": status })))
}

pub(super) async fn commit(
    State(state): State<OrchestratorState>,
    session: Session,
    Json(payload): Json<CommitRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let message = payload.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("message is required"));
    }
    let link = state.active_link(&user.id, &payload.instance_name).await?;
    let _guard = state.pipeline.locks().acquire(&link.instance_name).await?;

    let author = CommitAuthor {
        name: payload.author_name.or_else(|| link.github_username.clone()),
        email: payload.author_email,
    };
    let result = state
        .git
        .commit(FsPath::new(&link.local_path), message, &author)
        .await;

    if matches!(result, Err(GitError::NoChanges)) {
        state
            .record_action(&user.id, "git_commit", &link.instance_name, "Nothing to commit", true)
            .await;
        return Ok(Json(json!({
            "success": true,
            "committed": false,
            "message": "Nothing to commit",
        })));
    }

    let report = state
        .audit(&user, "git_commit", &link.instance_name, result, message)
        .await?;
    Ok(Json(json!({
        "success": true,
        "committed": true,
        "commit": report,
    })))
}

pub(super) async fn push(
    State(state): State<OrchestratorState>,
    session: Session,
    Json(payload): Json<InstanceRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let link = state.active_link(&user.id, &payload.instance_name).await?;
    let token = state.decrypt_credential(&link)?;
    let _guard = state.pipeline.locks().acquire(&link.instance_name).await?;

    let result = state
        .git
        .push(
            FsPath::new(&link.local_path),
            &link.target_branch,
            token.as_deref(),
        )
        .await;
    let report = state
        .audit(&user, "git_push", &link.instance_name, result, "Push succeeded")
        .await?;

    let warning = report
        .auto_merge_performed
        .then_some("Remote changes were merged automatically before pushing");
    Ok(Json(json!({
        "success": true,
        "push": report,
        "warning": warning,
    })))
}

pub(super) async fn pull(
    State(state): State<OrchestratorState>,
    session: Session,
    Json(payload): Json<InstanceRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let link = state.active_link(&user.id, &payload.instance_name).await?;
    let token = state.decrypt_credential(&link)?;
    let _guard = state.pipeline.locks().acquire(&link.instance_name).await?;

    let result = state
        .git
        .pull(
            FsPath::new(&link.local_path),
            &link.target_branch,
            token.as_deref(),
        )
        .await;
    let report = state
        .audit(&user, "git_pull", &link.instance_name, result, "Pull succeeded")
        .await?;

    Ok(Json(json!({ "success": true, "pull": report })))
}

pub(super) async fn history(
    State(state): State<OrchestratorState>,
    session: Session,
    Path(instance_name): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let link = state.active_link(&user.id, &instance_name).await?;

    let limit = usize::try_from(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)).unwrap_or(1);
    let commits = state
        .git
        .commit_history(FsPath::new(&link.local_path), limit)
        .await?;

    Ok(Json(json!({
        "success": true,
        "count": commits.len(),
        "commits": commits,
    })))
}

pub(super) async fn diff(
    State(state): State<OrchestratorState>,
    session: Session,
    Path(instance_name): Path<String>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let link = state.active_link(&user.id, &instance_name).await?;

    let diff = state
        .git
        .diff(FsPath::new(&link.local_path), query.file.as_deref())
        .await?;
    Ok(Json(json!({
        "success": true,
        "file": query.file,
        "diff": diff,
    })))
}

pub(super) async fn branches(
    State(state): State<OrchestratorState>,
    session: Session,
    Path(instance_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = require_deployer(&state, &session).await?;
    let link = state.active_link(&user.id, &instance_name).await?;
    let token = state.decrypt_credential(&link)?;
    let _guard = state.pipeline.locks().acquire(&link.instance_name).await?;

    let branches = state
        .git
        .list_remote_branches(FsPath::new(&link.local_path), token.as_deref())
        .await?;
    Ok(Json(json!({
        "success": true,
        "current": link.target_branch,
        "branches": branches,
    })))
}
