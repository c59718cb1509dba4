//! Periodic purge of old upload and result directories.
//!
//! Every [`CLEANUP_INTERVAL`] the job removes per-task directories under
//! the uploads and results roots whose modification time is older than
//! the configured retention.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

/// How often the cleanup job runs.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Directories to sweep and how long their entries are kept.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub uploads_dir: PathBuf,
    pub upload_retention: Duration,
    pub results_dir: PathBuf,
    pub result_retention: Duration,
}

impl RetentionPolicy {
    pub fn new(
        uploads_dir: PathBuf,
        upload_retention_days: u64,
        results_dir: PathBuf,
        result_retention_days: u64,
    ) -> Self {
        Self {
            uploads_dir,
            upload_retention: Duration::from_secs(upload_retention_days * SECS_PER_DAY),
            results_dir,
            result_retention: Duration::from_secs(result_retention_days * SECS_PER_DAY),
        }
    }
}

/// Run the cleanup loop until `cancel` is triggered.
///
/// The first sweep happens one full interval after startup.
pub async fn run(policy: RetentionPolicy, cancel: CancellationToken) {
    tracing::info!(
        upload_retention_days = policy.upload_retention.as_secs() / SECS_PER_DAY,
        result_retention_days = policy.result_retention.as_secs() / SECS_PER_DAY,
        interval_secs = CLEANUP_INTERVAL.as_secs(),
        "Directory cleanup job started"
    );

    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Directory cleanup job stopping");
                break;
            }
            _ = interval.tick() => {
                let now = SystemTime::now();
                let uploads = purge_older_than(&policy.uploads_dir, policy.upload_retention, now).await;
                let results = purge_older_than(&policy.results_dir, policy.result_retention, now).await;
                tracing::info!(uploads, results, "Periodic cleanup completed");
            }
        }
    }
}

/// Remove the direct children of `root` last modified more than `max_age`
/// before `now`. Returns how many entries were removed.
///
/// Errors are logged and skipped; a missing `root` removes nothing.
pub async fn purge_older_than(root: &Path, max_age: Duration, now: SystemTime) -> usize {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::error!(path = %root.display(), error = %e, "Cleanup: cannot read directory");
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(path = %root.display(), error = %e, "Cleanup: listing failed");
                break;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cleanup: cannot stat entry");
                continue;
            }
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if !age.is_some_and(|age| age > max_age) {
            continue;
        }

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Cleanup: removed expired entry");
                removed += 1;
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Cleanup: removal failed"),
        }
    }

    removed
}
