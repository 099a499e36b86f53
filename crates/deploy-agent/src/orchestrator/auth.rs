use std::fmt;
use std::str::FromStr;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tower_sessions::Session;
use uuid::Uuid;

use crate::db::NewUser;

use super::api_types::{AuthStatusResponse, CreateUserRequest, LoginRequest, SetupRequest};
use super::error::ApiError;
use super::OrchestratorState;

const SESSION_USER_ID_KEY: &str = "user_id";
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Role {
    Admin,
    Developer,
    Viewer,
}

impl Role {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Developer => "developer",
            Self::Viewer => "viewer",
        }
    }

    /// Only admins and developers may touch repositories and deploys.
    const fn can_deploy(self) -> bool {
        matches!(self, Self::Admin | Self::Developer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "admin" => Ok(Self::Admin),
            "developer" => Ok(Self::Developer),
            "viewer" => Ok(Self::Viewer),
            other => Err(ApiError::bad_request(format!("unknown role: {other}"))),
        }
    }
}

#[derive(Clone, Debug)]
pub(super) struct CurrentUser {
    pub(super) id: String,
    pub(super) username: String,
    pub(super) role: Role,
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(ApiError::internal)
}

fn validate_credentials(username: &str, password: &str) -> Result<(), ApiError> {
    if username.trim().is_empty() || password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "username is required and password must have at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

async fn insert_user(
    state: &OrchestratorState,
    username: &str,
    password: &str,
    role: Role,
) -> Result<String, ApiError> {
    validate_credentials(username, password)?;

    if state.db.find_user_by_username(username.trim()).await?.is_some() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "user_exists",
            format!("user {} already exists", username.trim()),
        ));
    }

    let user_id = Uuid::new_v4().to_string();
    state
        .db
        .insert_user(&NewUser {
            id: user_id.clone(),
            username: username.trim().to_string(),
            password_hash: hash_password(password)?,
            role: role.to_string(),
        })
        .await?;

    Ok(user_id)
}

async fn session_user_id(session: &Session) -> Result<Option<String>, ApiError> {
    session
        .get::<String>(SESSION_USER_ID_KEY)
        .await
        .map_err(ApiError::internal)
}

pub(super) async fn auth_setup(
    State(state): State<OrchestratorState>,
    session: Session,
    Json(payload): Json<SetupRequest>,
) -> Result<StatusCode, ApiError> {
    if state.db.users_count().await? > 0 {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "already_initialized",
            "setup has already been completed",
        ));
    }

    let user_id = insert_user(&state, &payload.username, &payload.password, Role::Admin).await?;

    session
        .insert(SESSION_USER_ID_KEY, user_id)
        .await
        .map_err(ApiError::internal)?;

    Ok(StatusCode::CREATED)
}

pub(super) async fn auth_login(
    State(state): State<OrchestratorState>,
    session: Session,
    Json(payload): Json<LoginRequest>,
) -> Result<StatusCode, ApiError> {
    let user = state
        .db
        .find_user_by_username(payload.username.trim())
        .await?
        .ok_or_else(ApiError::unauthorized)?;

    let parsed_hash =
        PasswordHash::new(&user.password_hash).map_err(|_| ApiError::unauthorized())?;

    Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::unauthorized())?;

    session
        .insert(SESSION_USER_ID_KEY, user.id)
        .await
        .map_err(ApiError::internal)?;

    Ok(StatusCode::OK)
}

pub(super) async fn auth_status(
    State(state): State<OrchestratorState>,
    session: Session,
) -> Result<Json<AuthStatusResponse>, ApiError> {
    let users_count = state.db.users_count().await?;
    let authenticated = session_user_id(&session).await?.is_some();

    Ok(Json(AuthStatusResponse {
        users_count,
        authenticated,
    }))
}

pub(super) async fn auth_session(
    State(state): State<OrchestratorState>,
    session: Session,
) -> Result<StatusCode, ApiError> {
    current_user(&state, &session).await?;
    Ok(StatusCode::OK)
}

pub(super) async fn auth_create_user(
    State(state): State<OrchestratorState>,
    session: Session,
    Json(payload): Json<CreateUserRequest>,
) -> Result<StatusCode, ApiError> {
    let user = current_user(&state, &session).await?;
    if user.role != Role::Admin {
        return Err(ApiError::forbidden());
    }

    let role = payload
        .role
        .as_deref()
        .map_or(Ok(Role::Developer), str::parse)?;
    insert_user(&state, &payload.username, &payload.password, role).await?;

    Ok(StatusCode::CREATED)
}

pub(super) async fn current_user(
    state: &OrchestratorState,
    session: &Session,
) -> Result<CurrentUser, ApiError> {
    let user_id = session_user_id(session)
        .await?
        .ok_or_else(ApiError::unauthorized)?;
    let user = state
        .db
        .find_user_by_id(&user_id)
        .await?
        .ok_or_else(ApiError::unauthorized)?;

    Ok(CurrentUser {
        id: user.id,
        username: user.username,
        role: user.role.parse().unwrap_or(Role::Viewer),
    })
}

/// Session user allowed to manage repositories and deploys (admin or developer).
pub(super) async fn require_deployer(
    state: &OrchestratorState,
    session: &Session,
) -> Result<CurrentUser, ApiError> {
    let user = current_user(state, session).await?;
    if !user.role.can_deploy() {
        return Err(ApiError::forbidden());
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admins_and_developers_can_deploy() {
        assert!("admin".parse::<Role>().expect("role").can_deploy());
        assert!("developer".parse::<Role>().expect("role").can_deploy());
        assert!(!"viewer".parse::<Role>().expect("role").can_deploy());
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_credentials("admin", "short").is_err());
        assert!(validate_credentials(" ", "long-enough").is_err());
        assert!(validate_credentials("admin", "long-enough").is_ok());
    }

    #[test]
    fn hashes_verify_with_argon2() {
        let hash = hash_password("correct horse").expect("hash");
        let parsed = PasswordHash::new(&hash).expect("parse");
        assert!(Argon2::default()
            .verify_password(b"correct horse", &parsed)
            .is_ok());
        assert!(Argon2::default()
            .verify_password(b"wrong horse", &parsed)
            .is_err());
    }
}
