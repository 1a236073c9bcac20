//! Local filesystem layout for uploaded media.
//!
//! Files live at `<root>/<user_id>/<nanos>_<name>`. An upload is first
//! streamed into a hidden temporary file in the same directory, then renamed
//! into place without replacing anything, so two uploads never share a path
//! even when they land in the same nanosecond.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::{Builder, TempPath};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// How many fresh timestamps to try before giving up on a free name.
const MAX_NAME_ATTEMPTS: usize = 8;

/// Prefix of in-progress uploads. Never a valid stored name.
const STAGING_PREFIX: &str = ".upload-";

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

/// An upload still being received. The file is removed when this is dropped
/// without being committed.
#[derive(Debug)]
pub struct StagedFile {
    file: File,
    path: TempPath,
    len: u64,
}

impl StagedFile {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn user_dir(&self, user_id: Uuid) -> PathBuf {
        self.root.join(user_id.to_string())
    }

    /// Open a temporary file in the owner's directory to receive an upload.
    pub async fn stage(&self, user_id: Uuid) -> io::Result<StagedFile> {
        let dir = self.user_dir(user_id);
        fs::create_dir_all(&dir).await?;

        let named = tokio::task::spawn_blocking(move || {
            Builder::new().prefix(STAGING_PREFIX).tempfile_in(dir)
        })
        .await
        .map_err(io::Error::other)??;

        let (file, path) = named.into_parts();
        Ok(StagedFile {
            file: File::from_std(file),
            path,
            len: 0,
        })
    }

    /// Flush a staged upload to disk and move it to a fresh stored name,
    /// which is returned. On error the staged file is removed.
    pub async fn commit(
        &self,
        user_id: Uuid,
        original_name: &str,
        staged: StagedFile,
    ) -> io::Result<String> {
        let StagedFile { mut file, mut path, .. } = staged;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let dir = self.user_dir(user_id);
        let name = sanitize_file_name(original_name);

        for _ in 0..MAX_NAME_ATTEMPTS {
            let stored_name = format!("{}_{}", unix_nanos(), name);
            let target = dir.join(&stored_name);
            let persisted = tokio::task::spawn_blocking(move || path.persist_noclobber(target))
                .await
                .map_err(io::Error::other)?;

            match persisted {
                Ok(()) => return Ok(stored_name),
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    path = e.path;
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.error),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free storage name for {}", name),
        ))
    }

    /// Open a stored file for reading, returning it with its length.
    pub async fn open(&self, user_id: Uuid, stored_name: &str) -> io::Result<(File, u64)> {
        // Stored names never contain separators or a leading dot; refuse
        // anything that does.
        if stored_name != sanitize_file_name(stored_name) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "invalid stored name"));
        }
        let file = File::open(self.user_dir(user_id).join(stored_name)).await?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Reduce a client-supplied file name to a single safe path component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
