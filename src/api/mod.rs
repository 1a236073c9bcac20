mod error;
mod groups;
mod media;
mod sessions;
mod users;

use axum::Router;
use serde::Serialize;
use std::sync::Arc;

use crate::ServerConfig;
use crate::rate_limit::RateLimitConfig;
use crate::session::SessionManager;
use crate::storage::Storage;
use crate::upload::UploadOrchestrator;

pub use error::{ApiError, ResultExt};

/// Body of endpoints that only report an outcome.
#[derive(Serialize)]
pub struct MessageResponse {
    message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Create the API router.
pub fn create_api_router(config: &ServerConfig) -> Router {
    let sessions = SessionManager::new(config.db.clone(), config.tokens.clone(), config.sessions);
    let uploads = UploadOrchestrator::new(config.db.clone(), Storage::new(&config.upload_dir));
    let rate_limit_config = Arc::new(RateLimitConfig::new(
        config.rate_limits,
        config.trust_proxy,
    ));

    let users_state = users::UsersState {
        db: config.db.clone(),
        tokens: config.tokens.clone(),
        trust_proxy: config.trust_proxy,
        access_ttl: config.sessions.access_ttl,
        sessions: sessions.clone(),
        rate_limit_config,
    };

    let sessions_state = sessions::SessionsState {
        tokens: config.tokens.clone(),
        trust_proxy: config.trust_proxy,
        access_ttl: config.sessions.access_ttl,
        sessions,
    };

    let media_state = media::MediaState {
        db: config.db.clone(),
        tokens: config.tokens.clone(),
        trust_proxy: config.trust_proxy,
        access_ttl: config.sessions.access_ttl,
        uploads,
        limits: config.upload_limits,
        shutdown: config.shutdown.clone(),
    };

    let groups_state = groups::GroupsState {
        db: config.db.clone(),
        tokens: config.tokens.clone(),
        trust_proxy: config.trust_proxy,
        access_ttl: config.sessions.access_ttl,
    };

    Router::new()
        .merge(users::router(users_state))
        .merge(sessions::router(sessions_state))
        .nest("/media", media::router(media_state))
        .nest("/groups", groups::router(groups_state))
}
