use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use super::{DbError, from_millis, parse_id, to_millis};

#[derive(Debug, Clone)]
pub struct MediaGroup {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct MediaGroupRow {
    id: String,
    user_id: String,
    name: String,
    created_at: i64,
}

impl TryFrom<MediaGroupRow> for MediaGroup {
    type Error = DbError;

    fn try_from(row: MediaGroupRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_id(&row.id)?,
            user_id: parse_id(&row.user_id)?,
            name: row.name,
            created_at: from_millis(row.created_at)?,
        })
    }
}

#[derive(Clone)]
pub struct MediaGroupStore {
    pool: SqlitePool,
}

impl MediaGroupStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, user_id: Uuid, name: &str) -> Result<MediaGroup, DbError> {
        let group = MediaGroup {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO media_groups (id, user_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(group.id.to_string())
            .bind(group.user_id.to_string())
            .bind(&group.name)
            .bind(to_millis(group.created_at))
            .execute(&self.pool)
            .await?;

        Ok(group)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<MediaGroup>, DbError> {
        let row: Option<MediaGroupRow> =
            sqlx::query_as("SELECT id, user_id, name, created_at FROM media_groups WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(MediaGroup::try_from).transpose()
    }

    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<MediaGroup>, DbError> {
        let rows: Vec<MediaGroupRow> = sqlx::query_as(
            "SELECT id, user_id, name, created_at FROM media_groups WHERE user_id = ? ORDER BY created_at ASC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MediaGroup::try_from).collect()
    }
}
