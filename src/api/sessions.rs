//! Refresh and logout endpoints.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::MessageResponse;
use super::error::ApiError;
use crate::auth::Auth;
use crate::impl_has_auth_backend;
use crate::session::SessionManager;
use crate::token::TokenCodec;

#[derive(Clone)]
pub struct SessionsState {
    pub tokens: Arc<TokenCodec>,
    pub trust_proxy: bool,
    /// Longest lifetime a bearer token may have to be accepted as an access token.
    pub access_ttl: chrono::Duration,
    pub sessions: SessionManager,
}

impl_has_auth_backend!(SessionsState);

pub fn router(state: SessionsState) -> Router {
    Router::new()
        .route("/refresh-token", post(refresh_token))
        .route("/logout", get(logout))
        .with_state(state)
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Serialize)]
struct RefreshResponse {
    access_token: String,
    access_token_expired_at: DateTime<Utc>,
}

async fn refresh_token(
    State(state): State<SessionsState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    if payload.refresh_token.is_empty() {
        return Err(ApiError::bad_request("refresh_token cannot be empty"));
    }

    let outcome = state
        .sessions
        .refresh(&payload.refresh_token)
        .await
        .inspect_err(|e| tracing::warn!(error = %e, "Token refresh rejected"))?;

    Ok(Json(RefreshResponse {
        access_token: outcome.access_token,
        access_token_expired_at: outcome.access.expires_at,
    }))
}

async fn logout(
    State(state): State<SessionsState>,
    Auth(identity): Auth,
) -> Result<Json<MessageResponse>, ApiError> {
    state.sessions.logout(identity.session_id).await?;
    Ok(Json(MessageResponse::new("logged out successfully")))
}
