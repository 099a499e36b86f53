use std::fmt::Display;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::deployment::git::GitError;
use crate::deployment::lock::DeployError;

use super::credentials::CredentialError;
use super::github_client::GitHubError;
use super::webhook::WebhookError;

/// `{success: false, error, detail}` with a status chosen per error kind.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", detail)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Authentication required",
        )
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", "Insufficient permissions")
    }

    pub fn link_not_found(instance_name: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("No repository link configured for {instance_name}"),
        )
    }

    pub fn internal(source: impl Display) -> Self {
        error!(error = %source, "request failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            source.to_string(),
        )
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.error
    }

    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "success": false,
                "error": self.error,
                "detail": self.detail,
            })),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(source: anyhow::Error) -> Self {
        Self::internal(source)
    }
}

impl From<GitError> for ApiError {
    fn from(source: GitError) -> Self {
        let status = match &source {
            GitError::NotFound(_) => StatusCode::NOT_FOUND,
            GitError::AlreadyInitialized(_) | GitError::NoChanges => StatusCode::CONFLICT,
            GitError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            GitError::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GitError::NotAGitRepository(_)
            | GitError::UnrelatedHistories { .. }
            | GitError::NonFastForward { .. }
            | GitError::AuthenticationFailed { .. }
            | GitError::CommandFailed { .. }
            | GitError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, source.kind(), source.to_string())
    }
}

impl From<GitHubError> for ApiError {
    fn from(source: GitHubError) -> Self {
        let status = match &source {
            GitHubError::InvalidCredential { .. } => StatusCode::BAD_REQUEST,
            GitHubError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GitHubError::Request(_) | GitHubError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, source.kind(), source.to_string())
    }
}

impl From<DeployError> for ApiError {
    fn from(source: DeployError) -> Self {
        let status = match &source {
            DeployError::DeployInProgress { .. } => StatusCode::CONFLICT,
            DeployError::Aborted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, source.kind(), source.to_string())
    }
}

impl From<CredentialError> for ApiError {
    fn from(source: CredentialError) -> Self {
        let status = match &source {
            CredentialError::MissingKey => StatusCode::FAILED_DEPENDENCY,
            CredentialError::InvalidKey(_)
            | CredentialError::Encrypt
            | CredentialError::Decrypt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, source.kind(), source.to_string())
    }
}

impl From<WebhookError> for ApiError {
    fn from(source: WebhookError) -> Self {
        let status = match &source {
            WebhookError::MissingSignature
            | WebhookError::MissingSecret
            | WebhookError::SignatureInvalid => StatusCode::UNAUTHORIZED,
            WebhookError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, source.kind(), source.to_string())
    }
}
