//! Pipeline tuning read from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Default delay between two polls of the remote engine.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on the poll delay after consecutive poll errors.
pub const DEFAULT_MAX_POLL_BACKOFF: Duration = Duration::from_secs(60);

/// Default time [`OrchestratorSupervisor::stop_all`](crate::OrchestratorSupervisor::stop_all)
/// waits for routines to exit.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Settings shared by every orchestrator.
///
/// | Env var                 | Default   |
/// |-------------------------|-----------|
/// | `UPLOADS_DIR`           | `uploads` |
/// | `RESULTS_DIR`           | `results` |
/// | `POLL_INTERVAL_SECS`    | `5`       |
/// | `MAX_POLL_BACKOFF_SECS` | `60`      |
/// | `MAX_POLL_ERRORS`       | unlimited |
/// | `SHUTDOWN_TIMEOUT_SECS` | `30`      |
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of `{uploads_dir}/{task_id}/images`.
    pub uploads_dir: PathBuf,
    /// Root of `{results_dir}/{task_id}`.
    pub results_dir: PathBuf,
    pub poll_interval: Duration,
    pub max_poll_backoff: Duration,
    /// Consecutive failed polls after which a task is failed. `None`
    /// retries forever.
    pub max_consecutive_poll_errors: Option<u32>,
    pub shutdown_grace: Duration,
}

impl PipelineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let uploads_dir = std::env::var("UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.uploads_dir);
        let results_dir = std::env::var("RESULTS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.results_dir);
        let poll_interval = env_secs("POLL_INTERVAL_SECS").unwrap_or(defaults.poll_interval);
        let max_poll_backoff =
            env_secs("MAX_POLL_BACKOFF_SECS").unwrap_or(defaults.max_poll_backoff);
        let max_consecutive_poll_errors = std::env::var("MAX_POLL_ERRORS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| *n > 0);
        let shutdown_grace = env_secs("SHUTDOWN_TIMEOUT_SECS").unwrap_or(defaults.shutdown_grace);

        Self {
            uploads_dir,
            results_dir,
            poll_interval,
            max_poll_backoff,
            max_consecutive_poll_errors,
            shutdown_grace,
        }
    }

    /// Directory holding the validated input images of a task.
    pub fn images_dir(&self, task_id: &str) -> PathBuf {
        self.uploads_dir.join(task_id).join("images")
    }

    /// Upload root of a task.
    pub fn upload_dir(&self, task_id: &str) -> PathBuf {
        self.uploads_dir.join(task_id)
    }

    /// Directory the result bundle is downloaded and unpacked into.
    pub fn result_dir(&self, task_id: &str) -> PathBuf {
        self.results_dir.join(task_id)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            results_dir: PathBuf::from("results"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_backoff: DEFAULT_MAX_POLL_BACKOFF,
            max_consecutive_poll_errors: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
