//! Media upload, listing, download and group assignment.
//!
//! All endpoints require a bearer access token. Files are only ever served to
//! their owner.

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::MessageResponse;
use super::error::{ApiError, ResultExt, parse_uuid};
use crate::auth::Auth;
use crate::db::{Database, MediaFile};
use crate::impl_has_auth_backend;
use crate::token::TokenCodec;
use crate::upload::{BatchResult, IncomingFile, UploadError, UploadLimits, UploadOrchestrator};

/// Multipart field that carries uploaded files.
const FILES_FIELD: &str = "files";

/// Room for multipart boundaries and part headers on top of the file bytes.
const MULTIPART_OVERHEAD: u64 = 1 << 20;

#[derive(Clone)]
pub struct MediaState {
    pub db: Database,
    pub tokens: Arc<TokenCodec>,
    pub trust_proxy: bool,
    /// Longest lifetime a bearer token may have to be accepted as an access token.
    pub access_ttl: chrono::Duration,
    pub uploads: UploadOrchestrator,
    pub limits: UploadLimits,
    /// Cancelled on server shutdown; each upload runs under a child token.
    pub shutdown: CancellationToken,
}

impl_has_auth_backend!(MediaState);

pub fn router(state: MediaState) -> Router {
    // One file over the cap is still read (and discarded) so it can be
    // reported per file, hence the extra file's worth of headroom. Parts are
    // staged on disk, so this bounds disk use per request, not memory.
    let body_limit = (state.limits.max_files as u64 + 1)
        .saturating_mul(state.limits.max_file_bytes)
        .saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/", get(list_media))
        .route(
            "/upload",
            post(upload_media).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/{id}/download", get(download_media))
        .route("/{id}/group/{group_id}", patch(assign_group))
        .with_state(state)
}

// --- Response types ---

#[derive(Serialize)]
struct MediaResponse {
    id: Uuid,
    user_id: Uuid,
    filename: String,
    file_type: String,
    size: i64,
    created_at: DateTime<Utc>,
    group_id: Option<Uuid>,
}

impl From<MediaFile> for MediaResponse {
    fn from(media: MediaFile) -> Self {
        Self {
            id: media.id,
            user_id: media.user_id,
            filename: media.filename,
            file_type: media.file_type,
            size: media.size,
            created_at: media.created_at,
            group_id: media.group_id,
        }
    }
}

#[derive(Serialize)]
struct PartialUploadResponse {
    message: &'static str,
    errors: Vec<String>,
}

#[derive(Deserialize)]
struct ListQuery {
    group_id: Option<String>,
}

// --- Handlers ---

/// Accept up to `max_files` parts named `files` and save them concurrently.
///
/// Responds 200 when every file was saved and 206 with one message per failed
/// file otherwise. Too many parts is a 400 and nothing is stored.
async fn upload_media(
    State(state): State<MediaState>,
    Auth(identity): Auth,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut files = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::bad_request("Invalid multipart data"))?
    {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }

        if files.len() == state.limits.max_files {
            return Err(UploadError::TooManyFiles {
                max: state.limits.max_files,
            }
            .into());
        }

        let name = field.file_name().unwrap_or("file").to_string();
        let mut staged = Some(
            state
                .uploads
                .storage()
                .stage(identity.user_id)
                .await
                .map_err(staging_failed)?,
        );
        let mut size: u64 = 0;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|_| ApiError::bad_request("Failed to read file data"))?
        {
            size += chunk.len() as u64;
            if size > state.limits.max_file_bytes {
                // Over the cap: keep counting, drop what was written.
                staged = None;
                continue;
            }
            if let Some(file) = staged.as_mut() {
                file.write_chunk(&chunk)
                    .await
                    .map_err(staging_failed)?;
            }
        }

        files.push(IncomingFile { name, size, staged });
    }

    let cancel = state.shutdown.child_token();
    // Dropping the request future (client gone) cancels the remaining stages.
    let _guard = cancel.clone().drop_guard();

    let count = files.len();
    let result = state
        .uploads
        .ingest(identity.user_id, files, state.limits, &cancel)
        .await?;

    match result {
        BatchResult::AllSucceeded { .. } => {
            tracing::info!(user_id = %identity.user_id, files = count, "Upload saved");
            Ok(Json(MessageResponse::new("Saved all files successfully!")).into_response())
        }
        BatchResult::PartialSuccess { files, failures } => {
            tracing::warn!(
                user_id = %identity.user_id,
                saved = files.len(),
                failed = failures.len(),
                "Upload partially failed"
            );
            Ok((
                StatusCode::PARTIAL_CONTENT,
                Json(PartialUploadResponse {
                    message: "Some files failed to upload",
                    errors: failures.iter().map(|e| e.to_string()).collect(),
                }),
            )
                .into_response())
        }
    }
}

/// List the caller's media, optionally limited to one of their groups.
async fn list_media(
    State(state): State<MediaState>,
    Auth(identity): Auth,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<MediaResponse>>, ApiError> {
    let files = match query.group_id.as_deref() {
        Some(raw) => {
            let group_id = parse_uuid(raw, "group_id")?;
            state
                .db
                .media()
                .list_by_group(identity.user_id, group_id)
                .await
        }
        None => state.db.media().list_by_user(identity.user_id).await,
    }
    .db_err("Failed to list media")?;

    Ok(Json(files.into_iter().map(MediaResponse::from).collect()))
}

/// Stream a stored file back to its owner.
async fn download_media(
    State(state): State<MediaState>,
    Auth(identity): Auth,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let media_id = parse_uuid(&id, "media id")?;
    let download = state
        .uploads
        .open_download(identity.user_id, media_id)
        .await?;

    let content_type = HeaderValue::from_str(&download.media.file_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let mut response = Response::new(Body::from_stream(ReaderStream::new(download.file)));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.len));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&download.media.filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

/// Put one of the caller's files into one of the caller's groups.
async fn assign_group(
    State(state): State<MediaState>,
    Auth(identity): Auth,
    Path((id, group_id)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let media_id = parse_uuid(&id, "media id")?;
    let group_id = parse_uuid(&group_id, "group id")?;

    let media = state
        .db
        .media()
        .get(media_id)
        .await
        .db_err("Failed to load media")?
        .ok_or_else(|| ApiError::not_found("Media not found"))?;
    if media.user_id != identity.user_id {
        return Err(ApiError::forbidden("Access denied"));
    }

    let group = state
        .db
        .groups()
        .get(group_id)
        .await
        .db_err("Failed to load group")?
        .ok_or_else(|| ApiError::not_found("Group not found"))?;
    if group.user_id != identity.user_id {
        return Err(ApiError::forbidden("Access denied"));
    }

    let updated = state
        .db
        .media()
        .assign_group(media.id, group.id)
        .await
        .db_err("Failed to assign media to group")?;
    if !updated {
        return Err(ApiError::not_found("Media not found"));
    }

    Ok(Json(MessageResponse::new(
        "Assign media to a group successfully.",
    )))
}

fn staging_failed(e: std::io::Error) -> ApiError {
    tracing::error!(error = %e, "Failed to stage upload");
    ApiError::internal("Failed to store upload")
}

/// `attachment` disposition naming the file as the client uploaded it.
fn content_disposition(stored_name: &str) -> String {
    let original = stored_name
        .split_once('_')
        .map(|(_, rest)| rest)
        .unwrap_or(stored_name);
    let safe: String = original
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_strips_prefix_and_quotes() {
        assert_eq!(
            content_disposition("1700000000000000000_cat.png"),
            "attachment; filename=\"cat.png\""
        );
        assert_eq!(
            content_disposition("17_we\"ird_na\u{e9}me.txt"),
            "attachment; filename=\"we_ird_na_me.txt\""
        );
    }
}
