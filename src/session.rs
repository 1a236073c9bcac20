//! Login, refresh and logout on top of persisted sessions.
//!
//! A session is `Active` until logout blocks it, and a blocked session never
//! becomes active again. Logging in while a session is still active extends
//! that session with a fresh refresh token instead of opening a new one,
//! subject to the configured [`ReusePolicy`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, DbError, Session, User};
use crate::password::verify_password;
use crate::token::{
    ACCESS_TOKEN_VALIDITY_SECS, REFRESH_TOKEN_VALIDITY_SECS, TokenCodec, TokenError, TokenPayload,
};

/// Decides whether an existing session may be extended at login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReusePolicy {
    /// Extend the newest session that is neither blocked nor expired.
    #[default]
    ReuseActive,
    /// Open a new session on every login.
    AlwaysNew,
}

impl ReusePolicy {
    pub fn allows(self, session: &Session, now: DateTime<Utc>) -> bool {
        match self {
            ReusePolicy::ReuseActive => !session.is_blocked && !session.is_expired(now),
            ReusePolicy::AlwaysNew => false,
        }
    }
}

/// Where a login came from. Recorded on the session.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub user_agent: String,
    pub client_ip: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub policy: ReusePolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            access_ttl: Duration::seconds(ACCESS_TOKEN_VALIDITY_SECS),
            refresh_ttl: Duration::seconds(REFRESH_TOKEN_VALIDITY_SECS),
            policy: ReusePolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub session_id: Uuid,
    pub access_token: String,
    pub access: TokenPayload,
    pub refresh_token: String,
    pub refresh: TokenPayload,
    /// True when an existing session was extended.
    pub reused: bool,
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub access_token: String,
    pub access: TokenPayload,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid email or password")]
    CredentialInvalid,
    #[error("session is no longer valid")]
    SessionInvalid,
    #[error("password check failed")]
    PasswordCheck,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Persistence(#[from] DbError),
}

#[derive(Clone)]
pub struct SessionManager {
    db: Database,
    tokens: Arc<TokenCodec>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(db: Database, tokens: Arc<TokenCodec>, settings: SessionSettings) -> Self {
        Self {
            db,
            tokens,
            settings,
        }
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientContext,
    ) -> Result<LoginOutcome, SessionError> {
        let user = self
            .db
            .users()
            .get_by_email(email)
            .await?
            .ok_or(SessionError::CredentialInvalid)?;

        if !self.check_password(&user, password).await? {
            return Err(SessionError::CredentialInvalid);
        }

        let now = Utc::now();
        let candidate = match self.settings.policy {
            ReusePolicy::AlwaysNew => None,
            ReusePolicy::ReuseActive => self.db.sessions().find_reusable(user.id, now).await?,
        };

        if let Some(session) = candidate.filter(|s| self.settings.policy.allows(s, now)) {
            let (refresh_token, refresh) =
                self.tokens
                    .create_token(user.id, session.id, self.settings.refresh_ttl)?;

            let rotated = self
                .db
                .sessions()
                .rotate(
                    session.id,
                    &refresh_token,
                    refresh.expires_at,
                    &client.user_agent,
                    &client.client_ip,
                )
                .await?;

            if rotated {
                let (access_token, access) =
                    self.tokens
                        .create_token(user.id, session.id, self.settings.access_ttl)?;
                tracing::info!(user_id = %user.id, session_id = %session.id, "Session reused");
                return Ok(LoginOutcome {
                    user,
                    session_id: session.id,
                    access_token,
                    access,
                    refresh_token,
                    refresh,
                    reused: true,
                });
            }

            tracing::debug!(session_id = %session.id, "Session blocked before reuse, opening a new one");
        }

        let session_id = Uuid::new_v4();
        let (refresh_token, refresh) =
            self.tokens
                .create_token(user.id, session_id, self.settings.refresh_ttl)?;

        let session = Session {
            id: session_id,
            user_id: user.id,
            refresh_token: refresh_token.clone(),
            user_agent: client.user_agent.clone(),
            client_ip: client.client_ip.clone(),
            is_blocked: false,
            expires_at: refresh.expires_at,
            created_at: now,
        };
        self.db.sessions().create(&session).await?;

        let (access_token, access) =
            self.tokens
                .create_token(user.id, session_id, self.settings.access_ttl)?;

        tracing::info!(user_id = %user.id, session_id = %session_id, "Session created");

        Ok(LoginOutcome {
            user,
            session_id,
            access_token,
            access,
            refresh_token,
            refresh,
            reused: false,
        })
    }

    /// Mint a new access token for the session a refresh token belongs to.
    /// Only the refresh token currently stored on the session is accepted.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshOutcome, SessionError> {
        let payload = self.tokens.verify_token(refresh_token)?;

        let session = self
            .db
            .sessions()
            .get(payload.session_id)
            .await?
            .ok_or(SessionError::SessionInvalid)?;

        let now = Utc::now();
        if session.is_blocked
            || session.user_id != payload.user_id
            || session.refresh_token != refresh_token
            || now >= session.expires_at
        {
            tracing::debug!(session_id = %session.id, "Refresh rejected");
            return Err(SessionError::SessionInvalid);
        }

        let (access_token, access) =
            self.tokens
                .create_token(session.user_id, session.id, self.settings.access_ttl)?;

        Ok(RefreshOutcome {
            access_token,
            access,
        })
    }

    /// Block a session. Blocking twice, or blocking an unknown id, is not an error.
    pub async fn logout(&self, session_id: Uuid) -> Result<(), SessionError> {
        let found = self.db.sessions().block(session_id).await?;
        if found {
            tracing::info!(session_id = %session_id, "Session blocked");
        } else {
            tracing::debug!(session_id = %session_id, "Logout for unknown session");
        }
        Ok(())
    }

    async fn check_password(&self, user: &User, password: &str) -> Result<bool, SessionError> {
        let password = password.to_string();
        let hash = user.password_hash.clone();

        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Password check task failed");
                SessionError::PasswordCheck
            })?
            .map_err(|e| {
                tracing::error!(user_id = %user.id, error = %e, "Stored password hash is unreadable");
                SessionError::PasswordCheck
            })
    }
}
