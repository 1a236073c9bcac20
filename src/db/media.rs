use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use super::{DbError, from_millis, parse_id, to_millis};

/// Metadata for one stored file. `filename` is the name on disk, relative to
/// the owner's upload directory.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub filename: String,
    pub file_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub group_id: Option<Uuid>,
}

/// Fields the caller supplies when recording a freshly written file.
#[derive(Debug, Clone)]
pub struct NewMediaFile {
    pub user_id: Uuid,
    pub filename: String,
    pub file_type: String,
    pub size: i64,
}

#[derive(sqlx::FromRow)]
struct MediaFileRow {
    id: String,
    user_id: String,
    filename: String,
    file_type: String,
    size: i64,
    created_at: i64,
    group_id: Option<String>,
}

impl TryFrom<MediaFileRow> for MediaFile {
    type Error = DbError;

    fn try_from(row: MediaFileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_id(&row.id)?,
            user_id: parse_id(&row.user_id)?,
            filename: row.filename,
            file_type: row.file_type,
            size: row.size,
            created_at: from_millis(row.created_at)?,
            group_id: row.group_id.as_deref().map(parse_id).transpose()?,
        })
    }
}

#[derive(Clone)]
pub struct MediaFileStore {
    pool: SqlitePool,
}

impl MediaFileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: &NewMediaFile) -> Result<MediaFile, DbError> {
        let media = MediaFile {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            filename: new.filename.clone(),
            file_type: new.file_type.clone(),
            size: new.size,
            created_at: Utc::now(),
            group_id: None,
        };

        sqlx::query(
            "INSERT INTO media_files (id, user_id, filename, file_type, size, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(media.id.to_string())
        .bind(media.user_id.to_string())
        .bind(&media.filename)
        .bind(&media.file_type)
        .bind(media.size)
        .bind(to_millis(media.created_at))
        .execute(&self.pool)
        .await?;

        Ok(media)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<MediaFile>, DbError> {
        let row: Option<MediaFileRow> = sqlx::query_as(
            "SELECT id, user_id, filename, file_type, size, created_at, group_id FROM media_files WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(MediaFile::try_from).transpose()
    }

    /// All files owned by a user, newest first.
    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<MediaFile>, DbError> {
        let rows: Vec<MediaFileRow> = sqlx::query_as(
            "SELECT id, user_id, filename, file_type, size, created_at, group_id FROM media_files WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MediaFile::try_from).collect()
    }

    /// Files a user has placed in one of their groups, newest first.
    pub async fn list_by_group(
        &self,
        user_id: Uuid,
        group_id: Uuid,
    ) -> Result<Vec<MediaFile>, DbError> {
        let rows: Vec<MediaFileRow> = sqlx::query_as(
            "SELECT id, user_id, filename, file_type, size, created_at, group_id FROM media_files WHERE user_id = ? AND group_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id.to_string())
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MediaFile::try_from).collect()
    }

    /// Point a file at a group. Returns false if the file does not exist.
    pub async fn assign_group(&self, id: Uuid, group_id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE media_files SET group_id = ? WHERE id = ?")
            .bind(group_id.to_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn new_file(user_id: Uuid, name: &str) -> NewMediaFile {
        NewMediaFile {
            user_id,
            filename: name.to_string(),
            file_type: "image/png".to_string(),
            size: 42,
        }
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_owner() {
        let db = Database::open(":memory:").await.unwrap();
        let alice = db.users().create("alice@example.com", "h").await.unwrap();
        let bob = db.users().create("bob@example.com", "h").await.unwrap();

        db.media().create(&new_file(alice.id, "1_a.png")).await.unwrap();
        db.media().create(&new_file(alice.id, "2_b.png")).await.unwrap();
        db.media().create(&new_file(bob.id, "3_c.png")).await.unwrap();

        let files = db.media().list_by_user(alice.id).await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.user_id == alice.id));
    }

    #[tokio::test]
    async fn test_assign_group_and_list_by_group() {
        let db = Database::open(":memory:").await.unwrap();
        let alice = db.users().create("alice@example.com", "h").await.unwrap();
        let group = db.groups().create(alice.id, "holiday").await.unwrap();

        let grouped = db.media().create(&new_file(alice.id, "1_a.png")).await.unwrap();
        db.media().create(&new_file(alice.id, "2_b.png")).await.unwrap();

        assert!(db.media().assign_group(grouped.id, group.id).await.unwrap());
        assert!(!db.media().assign_group(Uuid::new_v4(), group.id).await.unwrap());

        let files = db.media().list_by_group(alice.id, group.id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, grouped.id);
        assert_eq!(files[0].group_id, Some(group.id));
    }

    #[tokio::test]
    async fn test_assign_unknown_group_is_rejected() {
        let db = Database::open(":memory:").await.unwrap();
        let alice = db.users().create("alice@example.com", "h").await.unwrap();
        let media = db.media().create(&new_file(alice.id, "1_a.png")).await.unwrap();

        let err = db
            .media()
            .assign_group(media.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation { .. }));
    }
}
