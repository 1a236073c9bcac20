//! Periodic storage usage report.
//!
//! Walks every user directory under the upload root and logs file counts and
//! byte totals. Entries that cannot be read are logged and skipped; one bad
//! file never stops the walk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Default interval between reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserUsage {
    /// Name of the user's directory, which is the user id.
    pub owner: String,
    pub files: u64,
    pub bytes: u64,
}

/// Sum file counts and sizes per top-level directory of `root`.
/// A missing root reports nothing.
pub fn collect_usage(root: &Path) -> Vec<UserUsage> {
    let mut usage = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if e.depth() > 0 || root.exists() {
                    warn!(error = %e, "Skipping unreadable upload entry");
                }
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let mut owner_usage = UserUsage {
            owner: entry.file_name().to_string_lossy().into_owned(),
            files: 0,
            bytes: 0,
        };

        for file in WalkDir::new(entry.path()) {
            let file = match file {
                Ok(file) => file,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable upload entry");
                    continue;
                }
            };
            // Hidden files are uploads still being received.
            if !file.file_type().is_file() || file.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            match file.metadata() {
                Ok(meta) => {
                    owner_usage.files += 1;
                    owner_usage.bytes += meta.len();
                }
                Err(e) => warn!(path = %file.path().display(), error = %e, "Failed to stat upload"),
            }
        }

        usage.push(owner_usage);
    }

    usage.sort_by(|a, b| a.owner.cmp(&b.owner));
    usage
}

/// Collect and log usage once.
pub async fn report_usage(root: &Path) {
    let root_owned = root.to_path_buf();
    let usage = match tokio::task::spawn_blocking(move || collect_usage(&root_owned)).await {
        Ok(usage) => usage,
        Err(e) => {
            error!(error = %e, "Usage walk failed");
            return;
        }
    };

    log_usage(&usage);
}

/// One line per user and one with the totals, all at info level.
fn log_usage(usage: &[UserUsage]) {
    let mut total_files = 0;
    let mut total_bytes = 0;
    for user in usage {
        info!(owner = %user.owner, files = user.files, bytes = user.bytes, "Storage usage");
        total_files += user.files;
        total_bytes += user.bytes;
    }

    info!(
        users = usage.len(),
        files = total_files,
        bytes = total_bytes,
        "Storage usage report"
    );
}

/// Spawn a task that reports usage every `interval` until `cancel` fires.
/// The first report runs one interval after start.
pub fn spawn_usage_reporter(
    root: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Usage reporter started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Usage reporter stopping");
                    break;
                }
                _ = ticker.tick() => report_usage(&root).await,
            }
        }
    })
}
