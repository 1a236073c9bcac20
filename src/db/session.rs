//! Login session records.
//!
//! A session owns the one refresh token that is allowed to mint access tokens
//! for it. Sessions are blocked on logout rather than deleted, so a blocked row
//! keeps rejecting its refresh token for the rest of its life.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use super::{DbError, from_millis, parse_id, to_millis};

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub is_blocked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    refresh_token: String,
    user_agent: String,
    client_ip: String,
    is_blocked: i32,
    expires_at: i64,
    created_at: i64,
}

impl TryFrom<SessionRow> for Session {
    type Error = DbError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_id(&row.id)?,
            user_id: parse_id(&row.user_id)?,
            refresh_token: row.refresh_token,
            user_agent: row.user_agent,
            client_ip: row.client_ip,
            is_blocked: row.is_blocked != 0,
            expires_at: from_millis(row.expires_at)?,
            created_at: from_millis(row.created_at)?,
        })
    }
}

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a session row built by the caller. The caller picks the id so
    /// it can be embedded in the refresh token before the row exists.
    pub async fn create(&self, session: &Session) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(&session.refresh_token)
        .bind(&session.user_agent)
        .bind(&session.client_ip)
        .bind(session.is_blocked as i32)
        .bind(to_millis(session.expires_at))
        .bind(to_millis(session.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Session>, DbError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, user_id, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at FROM sessions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    /// The most recently created session of a user that is neither blocked
    /// nor expired at `now`.
    pub async fn find_reusable(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, DbError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, user_id, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at FROM sessions WHERE user_id = ? AND is_blocked = 0 AND expires_at > ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id.to_string())
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    /// Swap in a fresh refresh token for a session that is still unblocked.
    /// Returns false when no row was updated, e.g. because a concurrent logout
    /// blocked the session in between.
    pub async fn rotate(
        &self,
        id: Uuid,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
        user_agent: &str,
        client_ip: &str,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE sessions SET refresh_token = ?, expires_at = ?, user_agent = ?, client_ip = ? WHERE id = ? AND is_blocked = 0",
        )
        .bind(refresh_token)
        .bind(to_millis(expires_at))
        .bind(user_agent)
        .bind(client_ip)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a session blocked. Returns false if the session does not exist.
    /// Blocking an already blocked session still counts as found.
    pub async fn block(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE sessions SET is_blocked = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
