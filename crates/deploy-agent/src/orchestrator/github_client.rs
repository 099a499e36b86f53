use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const USER_AGENT: &str = "deploy-agent";
const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
const API_VERSION: &str = "2022-11-28";
const ACCEPT_GITHUB_JSON: &str = "application/vnd.github+json";
const REPOSITORY_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub rejected the credential ({status}): {message}")]
    InvalidCredential { status: u16, message: String },

    #[error("GitHub did not answer within {seconds}s")]
    UpstreamTimeout { seconds: u64 },

    #[error("GitHub request failed: {0}")]
    Request(String),

    #[error("unexpected GitHub response: {0}")]
    InvalidResponse(String),
}

impl GitHubError {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCredential { .. } => "invalid_credential",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::Request(_) => "upstream_request_failed",
            Self::InvalidResponse(_) => "invalid_upstream_response",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GitHubIdentity {
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RepositoryDescriptor {
    pub name: String,
    pub full_name: String,
    pub owner: String,
    pub private: bool,
    pub visibility: String,
    pub default_branch: String,
    pub description: Option<String>,
    pub clone_url: String,
    pub ssh_url: Option<String>,
    pub html_url: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiRepository {
    name: String,
    full_name: String,
    owner: ApiOwner,
    #[serde(default)]
    private: bool,
    visibility: Option<String>,
    default_branch: Option<String>,
    description: Option<String>,
    clone_url: String,
    ssh_url: Option<String>,
    html_url: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

impl From<ApiRepository> for RepositoryDescriptor {
    fn from(repository: ApiRepository) -> Self {
        let visibility = repository.visibility.unwrap_or_else(|| {
            if repository.private { "private" } else { "public" }.to_string()
        });

        Self {
            name: repository.name,
            full_name: repository.full_name,
            owner: repository.owner.login,
            private: repository.private,
            visibility,
            default_branch: repository
                .default_branch
                .unwrap_or_else(|| "main".to_string()),
            description: repository.description,
            clone_url: repository.clone_url,
            ssh_url: repository.ssh_url,
            html_url: repository.html_url,
            updated_at: repository.updated_at,
        }
    }
}

/// Thin REST client for the identity and repository listing endpoints.
#[derive(Clone, Debug)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base_url: String,
    timeout: Duration,
}

impl GitHubClient {
    /// # Errors
    /// Returns [`GitHubError::Request`] if the HTTP client cannot be built.
    pub fn new(api_base_url: &str, timeout: Duration) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|error| GitHubError::Request(error.to_string()))?;

        Ok(Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Calls `GET /user` with the token.
    ///
    /// # Errors
    /// [`GitHubError::InvalidCredential`] on any non-2xx answer,
    /// [`GitHubError::UpstreamTimeout`] when the call exceeds the timeout.
    pub async fn verify_credential(&self, token: &str) -> Result<GitHubIdentity, GitHubError> {
        let response = self.send(self.get("/user", token)).await?;
        let user = response
            .json::<ApiUser>()
            .await
            .map_err(|error| self.body_error(&error))?;

        Ok(GitHubIdentity {
            username: user.login,
            display_name: user.name,
            email: user.email,
            avatar_url: user.avatar_url,
        })
    }

    /// One page of the token owner's repositories, most recently updated first.
    ///
    /// # Errors
    /// Same failure kinds as [`GitHubClient::verify_credential`].
    pub async fn list_repositories(
        &self,
        token: &str,
    ) -> Result<Vec<RepositoryDescriptor>, GitHubError> {
        let path = format!("/user/repos?per_page={REPOSITORY_PAGE_SIZE}&sort=updated");
        let response = self.send(self.get(&path, token)).await?;
        let repositories = response
            .json::<Vec<ApiRepository>>()
            .await
            .map_err(|error| self.body_error(&error))?;

        Ok(repositories.into_iter().map(Into::into).collect())
    }

    fn get(&self, path: &str, token: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.api_base_url))
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(ACCEPT, ACCEPT_GITHUB_JSON)
            .header(API_VERSION_HEADER, API_VERSION)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GitHubError> {
        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                self.timeout_error()
            } else {
                GitHubError::Request(error.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|parsed| parsed.message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request rejected")
                    .to_string()
            });

        Err(GitHubError::InvalidCredential {
            status: status.as_u16(),
            message,
        })
    }

    fn body_error(&self, error: &reqwest::Error) -> GitHubError {
        if error.is_timeout() {
            self.timeout_error()
        } else {
            GitHubError::InvalidResponse(error.to_string())
        }
    }

    fn timeout_error(&self) -> GitHubError {
        GitHubError::UpstreamTimeout {
            seconds: self.timeout.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;

    const GOOD_TOKEN: &str = "ghp_good";

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            == Some("Bearer ghp_good")
            && headers
                .get(API_VERSION_HEADER)
                .and_then(|value| value.to_str().ok())
                == Some(API_VERSION)
    }

    async fn user(headers: HeaderMap) -> (StatusCode, Json<serde_json::Value>) {
        if !authorized(&headers) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": "Bad credentials" })),
            );
        }
        (
            StatusCode::OK,
            Json(json!({
                "login": "octocat",
                "name": "The Octocat",
                "email": null,
                "avatar_url": "https://avatars.example/octocat.png"
            })),
        )
    }

    async fn repos(headers: HeaderMap) -> (StatusCode, Json<serde_json::Value>) {
        if !authorized(&headers) {
            return (StatusCode::FORBIDDEN, Json(json!({})));
        }
        (
            StatusCode::OK,
            Json(json!([
                {
                    "name": "addons",
                    "full_name": "acme/addons",
                    "owner": { "login": "acme" },
                    "private": true,
                    "default_branch": "main",
                    "clone_url": "https://github.com/acme/addons.git",
                    "ssh_url": "git@github.com:acme/addons.git",
                    "updated_at": "2026-01-01T00:00:00Z"
                },
                {
                    "name": "themes",
                    "full_name": "acme/themes",
                    "owner": { "login": "acme" },
                    "visibility": "internal",
                    "clone_url": "https://github.com/acme/themes.git"
                }
            ])),
        )
    }

    async fn slow() -> Json<serde_json::Value> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Json(json!({ "login": "late" }))
    }

    async fn mock_github(slow_user: bool) -> String {
        let app = if slow_user {
            Router::new().route("/user", get(slow))
        } else {
            Router::new()
                .route("/user", get(user))
                .route("/user/repos", get(repos))
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock");
        let address = listener.local_addr().expect("mock address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{address}/")
    }

    #[tokio::test]
    async fn verify_credential_returns_the_identity() {
        let base = mock_github(false).await;
        let client = GitHubClient::new(&base, Duration::from_secs(5)).expect("client");

        let identity = client.verify_credential(GOOD_TOKEN).await.expect("identity");
        assert_eq!(identity.username, "octocat");
        assert_eq!(identity.display_name.as_deref(), Some("The Octocat"));
        assert!(identity.email.is_none());
    }

    #[tokio::test]
    async fn rejected_tokens_carry_status_and_message() {
        let base = mock_github(false).await;
        let client = GitHubClient::new(&base, Duration::from_secs(5)).expect("client");

        let error = client
            .verify_credential("ghp_bad")
            .await
            .expect_err("bad token");
        match error {
            GitHubError::InvalidCredential { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Bad credentials");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn repositories_are_normalized() {
        let base = mock_github(false).await;
        let client = GitHubClient::new(&base, Duration::from_secs(5)).expect("client");

        let repositories = client.list_repositories(GOOD_TOKEN).await.expect("repos");
        assert_eq!(repositories.len(), 2);
        assert_eq!(repositories[0].owner, "acme");
        assert_eq!(repositories[0].visibility, "private");
        assert_eq!(repositories[1].visibility, "internal");
        assert_eq!(repositories[1].default_branch, "main");

        let error = client
            .list_repositories("ghp_bad")
            .await
            .expect_err("bad token");
        assert_eq!(error.kind(), "invalid_credential");
    }

    #[tokio::test]
    async fn slow_upstream_is_reported_as_timeout() {
        let base = mock_github(true).await;
        let client = GitHubClient::new(&base, Duration::from_millis(200)).expect("client");

        let error = client
            .verify_credential(GOOD_TOKEN)
            .await
            .expect_err("timeout");
        assert!(matches!(error, GitHubError::UpstreamTimeout { .. }));
    }
}
