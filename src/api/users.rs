use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{ApiError, ResultExt};
use crate::auth::{Auth, Client};
use crate::db::{Database, User};
use crate::impl_has_auth_backend;
use crate::password::{MIN_PASSWORD_LEN, hash_password};
use crate::rate_limit::{RateLimitConfig, rate_limit_login, rate_limit_user_create};
use crate::session::SessionManager;
use crate::token::TokenCodec;

/// Longest email accepted at signup.
const MAX_EMAIL_LEN: usize = 254;

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub tokens: Arc<TokenCodec>,
    pub trust_proxy: bool,
    /// Longest lifetime a bearer token may have to be accepted as an access token.
    pub access_ttl: chrono::Duration,
    pub sessions: SessionManager,
    pub rate_limit_config: Arc<RateLimitConfig>,
}

impl_has_auth_backend!(UsersState);

pub fn router(state: UsersState) -> Router {
    let create_router = Router::new()
        .route("/create-user", post(create_user))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_user_create,
        ));

    let login_router = Router::new()
        .route("/login-user", post(login_user))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_login,
        ));

    let user_router = Router::new()
        .route("/user", get(get_current_user))
        .with_state(state);

    Router::new()
        .merge(create_router)
        .merge(login_router)
        .merge(user_router)
}

#[derive(Deserialize)]
struct CredentialsRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct UserResponse {
    id: Uuid,
    email: String,
    created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

#[derive(Serialize)]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    session_id: Uuid,
    token_issued_at: DateTime<Utc>,
    token_expired_at: DateTime<Utc>,
    refresh_token_expired: DateTime<Utc>,
    id: Uuid,
    email: String,
    created_at: DateTime<Utc>,
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    if email.is_empty() {
        return Err(ApiError::bad_request("Email cannot be empty"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(ApiError::bad_request(format!(
            "Email cannot be longer than {} characters",
            MAX_EMAIL_LEN
        )));
    }
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            Ok(())
        }
        _ => Err(ApiError::bad_request("Email must be a valid address")),
    }
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

async fn create_user(
    State(state): State<UsersState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = payload.email.trim().to_string();
    validate_email(&email)?;
    validate_password(&payload.password)?;

    let password = payload.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::db_error("Password hashing task failed", e))?
        .map_err(|e| ApiError::db_error("Failed to hash password", e))?;

    let user = match state.db.users().create(&email, &password_hash).await {
        Ok(user) => user,
        Err(e) if e.is_unique_violation() => {
            return Err(ApiError::conflict("Email already exists"));
        }
        Err(e) => return Err(ApiError::db_error("Failed to create user", e)),
    };

    tracing::info!(user_id = %user.id, "User created");

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

async fn login_user(
    State(state): State<UsersState>,
    Client(client): Client,
    Json(payload): Json<CredentialsRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let outcome = state
        .sessions
        .login(payload.email.trim(), &payload.password, &client)
        .await?;

    Ok(Json(LoginResponse {
        access_token: outcome.access_token,
        refresh_token: outcome.refresh_token,
        session_id: outcome.session_id,
        token_issued_at: outcome.access.issued_at,
        token_expired_at: outcome.access.expires_at,
        refresh_token_expired: outcome.refresh.expires_at,
        id: outcome.user.id,
        email: outcome.user.email,
        created_at: outcome.user.created_at,
    }))
}

async fn get_current_user(
    State(state): State<UsersState>,
    Auth(identity): Auth,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .db
        .users()
        .get_by_id(identity.user_id)
        .await
        .db_err("Failed to load user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(UserResponse::from(user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("a@b@c").is_err());
        assert!(validate_email(&format!("{}@x.io", "a".repeat(MAX_EMAIL_LEN))).is_err());
    }

    #[test]
    fn test_password_validation() {
        assert!(validate_password("12345678").is_ok());
        assert!(validate_password("1234567").is_err());
    }
}
