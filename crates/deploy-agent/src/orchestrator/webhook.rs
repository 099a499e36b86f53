use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::RepositoryLinkRecord;
use crate::deployment::pipeline::CommitInfo;

use super::deploys::{execute_deploy, DeployOptions, DeployTrigger};
use super::error::ApiError;
use super::OrchestratorState;

pub(super) const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub(super) const EVENT_HEADER: &str = "X-GitHub-Event";
const SIGNATURE_PREFIX: &str = "sha256=";
const BRANCH_REF_PREFIX: &str = "refs/heads/";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing {SIGNATURE_HEADER} header")]
    MissingSignature,

    #[error("webhook secret is not configured for this instance")]
    MissingSecret,

    #[error("webhook signature does not match")]
    SignatureInvalid,

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
}

impl WebhookError {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingSignature => "missing_signature",
            Self::MissingSecret => "missing_secret",
            Self::SignatureInvalid => "signature_invalid",
            Self::UnsupportedContentType(_) => "unsupported_content_type",
            Self::InvalidPayload(_) => "invalid_payload",
        }
    }
}

/// Checks `sha256=<hex>` against HMAC-SHA256 of the raw body. An empty secret never
/// verifies.
///
/// # Errors
/// [`WebhookError::MissingSecret`] for an empty secret, otherwise
/// [`WebhookError::SignatureInvalid`] for anything that does not match.
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> Result<(), WebhookError> {
    if secret.is_empty() {
        return Err(WebhookError::MissingSecret);
    }

    let provided = signature
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|hex_digest| hex::decode(hex_digest).ok())
        .ok_or(WebhookError::SignatureInvalid)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::SignatureInvalid)?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| WebhookError::SignatureInvalid)
}

#[derive(Debug, Deserialize)]
pub(super) struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    #[serde(default)]
    commits: Vec<PushCommit>,
    head_commit: Option<PushCommit>,
    pusher: Option<NamedActor>,
    repository: Option<PushRepository>,
}

#[derive(Clone, Debug, Deserialize)]
struct PushCommit {
    id: Option<String>,
    message: Option<String>,
    timestamp: Option<String>,
    author: Option<NamedActor>,
}

#[derive(Clone, Debug, Deserialize)]
struct NamedActor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushRepository {
    full_name: Option<String>,
}

impl PushPayload {
    pub(super) fn branch(&self) -> Option<&str> {
        self.git_ref
            .as_deref()
            .and_then(|git_ref| git_ref.strip_prefix(BRANCH_REF_PREFIX))
    }

    /// Head commit when present, otherwise the last listed commit.
    pub(super) fn commit_info(&self) -> CommitInfo {
        let commit = self.head_commit.as_ref().or_else(|| self.commits.last());

        CommitInfo {
            id: commit.and_then(|commit| commit.id.clone()),
            message: commit.and_then(|commit| commit.message.clone()),
            author: commit
                .and_then(|commit| commit.author.as_ref())
                .and_then(|author| author.name.clone()),
            timestamp: commit.and_then(|commit| commit.timestamp.clone()),
            pusher: self.pusher.as_ref().and_then(|pusher| pusher.name.clone()),
            repository: self
                .repository
                .as_ref()
                .and_then(|repository| repository.full_name.clone()),
        }
    }
}

/// Accepts `application/json` bodies and form bodies carrying the JSON in `payload`.
///
/// # Errors
/// [`WebhookError::UnsupportedContentType`] or [`WebhookError::InvalidPayload`].
pub(super) fn parse_payload(content_type: &str, body: &[u8]) -> Result<PushPayload, WebhookError> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match media_type.as_str() {
        "application/json" => serde_json::from_slice(body)
            .map_err(|error| WebhookError::InvalidPayload(error.to_string())),
        "application/x-www-form-urlencoded" => {
            let raw = std::str::from_utf8(body)
                .map_err(|error| WebhookError::InvalidPayload(error.to_string()))?;
            let encoded = raw
                .split('&')
                .find_map(|pair| pair.strip_prefix("payload="))
                .ok_or_else(|| WebhookError::InvalidPayload("missing payload field".to_string()))?;
            let decoded = urlencoding::decode(&encoded.replace('+', " "))
                .map_err(|error| WebhookError::InvalidPayload(error.to_string()))?
                .into_owned();
            serde_json::from_str(&decoded)
                .map_err(|error| WebhookError::InvalidPayload(error.to_string()))
        }
        other => Err(WebhookError::UnsupportedContentType(other.to_string())),
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// The active auto-deploy link whose secret verifies the body.
fn authenticate(
    candidates: Vec<RepositoryLinkRecord>,
    body: &[u8],
    signature: &str,
) -> Result<RepositoryLinkRecord, WebhookError> {
    let mut saw_secret = false;
    for link in candidates {
        let Some(secret) = link.webhook_secret.as_deref().filter(|secret| !secret.is_empty())
        else {
            continue;
        };
        saw_secret = true;
        if verify_signature(body, signature, secret).is_ok() {
            return Ok(link);
        }
    }

    Err(if saw_secret {
        WebhookError::SignatureInvalid
    } else {
        WebhookError::MissingSecret
    })
}

pub(super) async fn receive_webhook(
    State(state): State<OrchestratorState>,
    Path(instance_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let candidates = state.db.list_auto_deploy_links(&instance_name).await?;
    if candidates.is_empty() {
        return Err(ApiError::link_not_found(&instance_name));
    }

    let signature = header_value(&headers, SIGNATURE_HEADER).ok_or(WebhookError::MissingSignature)?;
    let link = authenticate(candidates, &body, signature).inspect_err(|error| {
        warn!(instance = %instance_name, error = error.kind(), "webhook rejected");
    })?;

    let event = header_value(&headers, EVENT_HEADER).unwrap_or_default();
    if event == "ping" {
        info!(instance = %instance_name, "webhook ping acknowledged");
        return Ok(Json(json!({ "message": "pong" })));
    }
    if event != "push" {
        return Ok(Json(json!({
            "message": format!("Evento ignorado: {event}"),
        })));
    }

    let content_type = header_value(&headers, CONTENT_TYPE.as_str()).unwrap_or_default();
    let payload = parse_payload(content_type, &body)?;
    let commit_info = payload.commit_info();

    let branch = payload.branch().unwrap_or_default();
    if branch != link.target_branch {
        info!(
            instance = %instance_name,
            pushed = branch,
            target = %link.target_branch,
            "push to another branch ignored"
        );
        return Ok(Json(json!({
            "message": format!("Rama ignorada: {branch} (se despliega {})", link.target_branch),
        })));
    }

    let options = DeployOptions {
        trigger: DeployTrigger::Webhook,
        run_module_update: link.run_module_update_on_deploy,
        modules: Vec::new(),
        commit: commit_info.clone(),
    };

    match execute_deploy(&state, &link, options).await {
        Ok(attempt) => {
            let message = if attempt.success {
                "Deploy completado"
            } else {
                "Deploy fallido"
            };
            Ok(Json(json!({
                "success": attempt.success,
                "message": message,
                "commit_info": commit_info,
                "deploy_result": attempt,
            })))
        }
        Err(error) => Ok(Json(json!({
            "success": false,
            "error": error.kind(),
            "detail": error.detail(),
            "commit_info": commit_info,
            "deploy_result": Value::Null,
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(body: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac init");
        mac.update(body);
        format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signatures_verify_and_any_byte_change_fails() {
        let body = br#"{"ref":"refs/heads/main"}"#.to_vec();
        let signature = sign(&body, "s3cret");
        assert_eq!(verify_signature(&body, &signature, "s3cret"), Ok(()));

        for index in 0..body.len() {
            let mut mutated = body.clone();
            mutated[index] ^= 0x01;
            assert_eq!(
                verify_signature(&mutated, &signature, "s3cret"),
                Err(WebhookError::SignatureInvalid)
            );
        }
    }

    #[test]
    fn malformed_or_unkeyed_signatures_fail_closed() {
        let body = b"{}";
        let signature = sign(body, "s3cret");

        assert_eq!(
            verify_signature(body, &signature, ""),
            Err(WebhookError::MissingSecret)
        );
        assert_eq!(
            verify_signature(body, &signature, "other"),
            Err(WebhookError::SignatureInvalid)
        );
        assert_eq!(
            verify_signature(body, signature.trim_start_matches(SIGNATURE_PREFIX), "s3cret"),
            Err(WebhookError::SignatureInvalid)
        );
        assert_eq!(
            verify_signature(body, "sha256=zz", "s3cret"),
            Err(WebhookError::SignatureInvalid)
        );
    }

    #[test]
    fn json_and_form_payloads_parse_to_the_same_push() {
        let json_body = r#"{"ref":"refs/heads/dev-shop","commits":[{"id":"abc","message":"fix","timestamp":"t1","author":{"name":"Ada"}}],"pusher":{"name":"ada"},"repository":{"full_name":"acme/addons"}}"#;
        let form_body = format!("payload={}", urlencoding::encode(json_body));

        for (content_type, body) in [
            ("application/json; charset=utf-8", json_body.as_bytes().to_vec()),
            ("application/x-www-form-urlencoded", form_body.into_bytes()),
        ] {
            let payload = parse_payload(content_type, &body).expect("payload");
            assert_eq!(payload.branch(), Some("dev-shop"));

            let info = payload.commit_info();
            assert_eq!(info.id.as_deref(), Some("abc"));
            assert_eq!(info.author.as_deref(), Some("Ada"));
            assert_eq!(info.pusher.as_deref(), Some("ada"));
            assert_eq!(info.repository.as_deref(), Some("acme/addons"));
        }
    }

    #[test]
    fn head_commit_wins_over_the_commit_list() {
        let body = br#"{"ref":"refs/heads/main","commits":[{"id":"first"},{"id":"second"}],"head_commit":{"id":"head","message":"merge"}}"#;
        let payload = parse_payload("application/json", body).expect("payload");
        assert_eq!(payload.commit_info().id.as_deref(), Some("head"));

        let body = br#"{"ref":"refs/heads/main","commits":[{"id":"first"},{"id":"second"}]}"#;
        let payload = parse_payload("application/json", body).expect("payload");
        assert_eq!(payload.commit_info().id.as_deref(), Some("second"));
    }

    #[test]
    fn tags_and_unknown_media_types_are_handled() {
        let payload =
            parse_payload("application/json", br#"{"ref":"refs/tags/v1"}"#).expect("payload");
        assert_eq!(payload.branch(), None);

        assert_eq!(
            parse_payload("text/plain", b"{}").map(|_| ()),
            Err(WebhookError::UnsupportedContentType("text/plain".to_string()))
        );
        assert!(matches!(
            parse_payload("application/x-www-form-urlencoded", b"other=1"),
            Err(WebhookError::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_payload("application/json", b"not json"),
            Err(WebhookError::InvalidPayload(_))
        ));
    }
}
