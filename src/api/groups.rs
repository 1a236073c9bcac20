use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{ApiError, ResultExt};
use crate::auth::Auth;
use crate::db::{Database, MediaGroup};
use crate::impl_has_auth_backend;
use crate::token::TokenCodec;

const MAX_GROUP_NAME_LEN: usize = 100;

#[derive(Clone)]
pub struct GroupsState {
    pub db: Database,
    pub tokens: Arc<TokenCodec>,
    pub trust_proxy: bool,
    /// Longest lifetime a bearer token may have to be accepted as an access token.
    pub access_ttl: chrono::Duration,
}

impl_has_auth_backend!(GroupsState);

pub fn router(state: GroupsState) -> Router {
    Router::new()
        .route("/", get(list_groups).post(create_group))
        .with_state(state)
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
}

#[derive(Serialize)]
struct GroupResponse {
    id: Uuid,
    user_id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<MediaGroup> for GroupResponse {
    fn from(group: MediaGroup) -> Self {
        Self {
            id: group.id,
            user_id: group.user_id,
            name: group.name,
            created_at: group.created_at,
        }
    }
}

async fn create_group(
    State(state): State<GroupsState>,
    Auth(identity): Auth,
    Json(payload): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Group name cannot be empty"));
    }
    if name.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "Group name cannot be longer than {} characters",
            MAX_GROUP_NAME_LEN
        )));
    }

    let group = state
        .db
        .groups()
        .create(identity.user_id, name)
        .await
        .db_err("Failed to create group")?;

    Ok((StatusCode::CREATED, Json(GroupResponse::from(group))))
}

async fn list_groups(
    State(state): State<GroupsState>,
    Auth(identity): Auth,
) -> Result<Json<Vec<GroupResponse>>, ApiError> {
    let groups = state
        .db
        .groups()
        .list_by_user(identity.user_id)
        .await
        .db_err("Failed to list groups")?;

    Ok(Json(groups.into_iter().map(GroupResponse::from).collect()))
}
