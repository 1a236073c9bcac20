//! Concurrent batch ingestion of uploaded files.
//!
//! Every file in a batch is saved by its own task. A failure in one file is
//! recorded against that file and never stops its siblings; the caller gets
//! back the saved files together with the per-file failures.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::fs::File;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{Database, DbError, MediaFile, NewMediaFile};
use crate::storage::{StagedFile, Storage};

/// Default cap on files per batch.
pub const DEFAULT_MAX_FILES: usize = 20;

/// Default cap on a single file: 100 MiB
pub const DEFAULT_MAX_FILE_BYTES: u64 = 100 << 20;

#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_files: usize,
    pub max_file_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

/// One file received from the client. `size` is the number of bytes the
/// client sent; `staged` is `None` when the body was discarded for exceeding
/// the limit while it was being read.
#[derive(Debug)]
pub struct IncomingFile {
    pub name: String,
    pub size: u64,
    pub staged: Option<StagedFile>,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("too many files, at most {max} per upload")]
    TooManyFiles { max: usize },
    #[error("{name}: file exceeds the {max_bytes} byte limit")]
    FileTooLarge { name: String, max_bytes: u64 },
    #[error("{name}: failed to save file")]
    WriteFailed {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("{name}: failed to record file")]
    MetadataFailed {
        name: String,
        #[source]
        source: DbError,
    },
    #[error("{name}: upload cancelled")]
    Cancelled { name: String },
    #[error("{name}: upload did not finish")]
    Aborted { name: String },
}

#[derive(Debug)]
pub enum BatchResult {
    AllSucceeded {
        files: Vec<MediaFile>,
    },
    PartialSuccess {
        files: Vec<MediaFile>,
        failures: Vec<UploadError>,
    },
}

impl BatchResult {
    pub fn files(&self) -> &[MediaFile] {
        match self {
            BatchResult::AllSucceeded { files } | BatchResult::PartialSuccess { files, .. } => {
                files
            }
        }
    }

    pub fn failures(&self) -> &[UploadError] {
        match self {
            BatchResult::AllSucceeded { .. } => &[],
            BatchResult::PartialSuccess { failures, .. } => failures,
        }
    }
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("media belongs to another user")]
    Forbidden,
    #[error("media not found")]
    NotFound,
    #[error(transparent)]
    Persistence(#[from] DbError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An opened stored file, ready to stream to its owner.
#[derive(Debug)]
pub struct Download {
    pub media: MediaFile,
    pub file: File,
    pub len: u64,
}

#[derive(Clone)]
pub struct UploadOrchestrator {
    db: Database,
    storage: Storage,
}

impl UploadOrchestrator {
    pub fn new(db: Database, storage: Storage) -> Self {
        Self { db, storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Save a batch of files for `owner`.
    ///
    /// A batch over `limits.max_files` is refused before anything is written.
    /// Otherwise each file is written and recorded independently; files whose
    /// task observes `cancel` stop before their next stage.
    pub async fn ingest(
        &self,
        owner: Uuid,
        files: Vec<IncomingFile>,
        limits: UploadLimits,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, UploadError> {
        if files.len() > limits.max_files {
            return Err(UploadError::TooManyFiles {
                max: limits.max_files,
            });
        }

        let db = self.db.clone();
        let storage = self.storage.clone();
        let cancel = cancel.clone();

        let result = run_batch(owner, files, move |file| {
            let db = db.clone();
            let storage = storage.clone();
            let cancel = cancel.clone();
            async move {
                save_one(&db, &storage, owner, file, limits.max_file_bytes, &cancel).await
            }
        })
        .await;

        Ok(result)
    }

    /// Open a stored file on behalf of `requester`, refusing anyone but the owner.
    pub async fn open_download(
        &self,
        requester: Uuid,
        media_id: Uuid,
    ) -> Result<Download, AccessError> {
        let media = self
            .db
            .media()
            .get(media_id)
            .await?
            .ok_or(AccessError::NotFound)?;

        if media.user_id != requester {
            return Err(AccessError::Forbidden);
        }

        let (file, len) = match self.storage.open(media.user_id, &media.filename).await {
            Ok(opened) => opened,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(media_id = %media.id, "Media row has no file on disk");
                return Err(AccessError::NotFound);
            }
            Err(e) => return Err(AccessError::Io(e)),
        };

        Ok(Download { media, file, len })
    }
}

/// Run `save` for every file on its own task and gather the outcomes in
/// input order. A task that panics or is aborted counts as a failure of its
/// file.
async fn run_batch<F, Fut>(owner: Uuid, files: Vec<IncomingFile>, save: F) -> BatchResult
where
    F: Fn(IncomingFile) -> Fut,
    Fut: Future<Output = Result<MediaFile, UploadError>> + Send + 'static,
{
    let failures: Arc<Mutex<Vec<(usize, UploadError)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = JoinSet::new();
    let mut pending: HashMap<task::Id, (usize, String)> = HashMap::new();

    for (index, file) in files.into_iter().enumerate() {
        let name = file.name.clone();
        let saving = save(file);
        let failures = Arc::clone(&failures);

        let handle = tasks.spawn(async move {
            match saving.await {
                Ok(media) => Some((index, media)),
                Err(e) => {
                    tracing::warn!(user_id = %owner, error = %e, "File upload failed");
                    failures.lock().push((index, e));
                    None
                }
            }
        });
        pending.insert(handle.id(), (index, name));
    }

    let mut saved = Vec::new();
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, outcome)) => {
                pending.remove(&id);
                saved.extend(outcome);
            }
            Err(e) => {
                if let Some((index, name)) = pending.remove(&e.id()) {
                    tracing::error!(user_id = %owner, file = %name, error = %e, "Upload task did not finish");
                    failures.lock().push((index, UploadError::Aborted { name }));
                }
            }
        }
    }

    saved.sort_by_key(|(index, _)| *index);
    let files: Vec<MediaFile> = saved.into_iter().map(|(_, media)| media).collect();

    let mut failed = std::mem::take(&mut *failures.lock());
    if failed.is_empty() {
        return BatchResult::AllSucceeded { files };
    }
    failed.sort_by_key(|(index, _)| *index);

    BatchResult::PartialSuccess {
        files,
        failures: failed.into_iter().map(|(_, e)| e).collect(),
    }
}

async fn save_one(
    db: &Database,
    storage: &Storage,
    owner: Uuid,
    file: IncomingFile,
    max_file_bytes: u64,
    cancel: &CancellationToken,
) -> Result<MediaFile, UploadError> {
    let IncomingFile { name, size, staged } = file;

    if cancel.is_cancelled() {
        return Err(UploadError::Cancelled { name });
    }
    let staged = match staged {
        Some(staged) if size <= max_file_bytes => staged,
        _ => {
            return Err(UploadError::FileTooLarge {
                name,
                max_bytes: max_file_bytes,
            });
        }
    };

    let stored_name = match storage.commit(owner, &name, staged).await {
        Ok(stored_name) => stored_name,
        Err(source) => return Err(UploadError::WriteFailed { name, source }),
    };

    // The file is on disk; a cancelled request leaves it unrecorded.
    if cancel.is_cancelled() {
        return Err(UploadError::Cancelled { name });
    }

    let file_type = mime_guess::from_path(&name)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    let new = NewMediaFile {
        user_id: owner,
        filename: stored_name,
        file_type,
        size: size as i64,
    };

    db.media()
        .create(&new)
        .await
        .map_err(|source| UploadError::MetadataFailed { name, source })
}
