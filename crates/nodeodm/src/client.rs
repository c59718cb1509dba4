//! Remote job seam used by the orchestrator.
//!
//! [`RemoteJobClient`] is the narrow interface the pipeline needs from a
//! processing engine. [`NodeOdmClient`] implements it over [`NodeOdmApi`];
//! tests substitute a scripted implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use orthoflow_core::quality::TaskParameters;

use crate::api::{NodeOdmApi, NodeOdmError};
use crate::messages::{NodeInfo, TaskStatusCode};

/// Name of the archive written by [`RemoteJobClient::fetch_result_bundle`].
pub const BUNDLE_FILE_NAME: &str = "all_results.zip";

/// Handle to a job accepted by the remote engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJob {
    pub uuid: String,
}

impl RemoteJob {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into() }
    }
}

/// Lifecycle state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Queued,
    Running,
    Failed,
    Completed,
    Canceled,
}

impl RemoteState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Completed | Self::Canceled)
    }
}

/// One poll result.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStatus {
    pub state: RemoteState,
    /// Percentage as reported by the engine (may exceed 100 or be
    /// fractional).
    pub progress: f64,
    /// Console lines emitted since the requested offset.
    pub log_lines: Vec<String>,
    pub error: Option<String>,
}

/// Brief description of the engine, from its info endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInfo {
    pub version: String,
    pub queue_count: u32,
}

/// Errors surfaced through [`RemoteJobClient`].
#[derive(Debug, thiserror::Error)]
pub enum RemoteJobError {
    /// The engine could not be reached or answered with a transport error.
    #[error("{0}")]
    Connection(String),

    /// The engine understood the request and refused it.
    #[error("{0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<NodeOdmError> for RemoteJobError {
    fn from(err: NodeOdmError) -> Self {
        match err {
            NodeOdmError::Request(e) => Self::Connection(e.to_string()),
            NodeOdmError::Api { status, body } => {
                Self::Connection(format!("HTTP {status}: {body}"))
            }
            NodeOdmError::Engine(msg) => Self::Rejected(msg),
            NodeOdmError::Io(e) => Self::Io(e),
        }
    }
}

/// Operations the orchestrator performs against a processing engine.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Reachability check.
    async fn info(&self) -> Result<EngineInfo, RemoteJobError>;

    /// Submit a job with the given images and engine parameters.
    async fn submit(
        &self,
        images: &[PathBuf],
        parameters: &TaskParameters,
        name: &str,
    ) -> Result<RemoteJob, RemoteJobError>;

    /// Poll state and progress, plus console lines from `since_line` on.
    async fn status(&self, job: &RemoteJob, since_line: usize)
        -> Result<RemoteStatus, RemoteJobError>;

    /// Download the full result archive into `dest_dir` and return its path.
    async fn fetch_result_bundle(
        &self,
        job: &RemoteJob,
        dest_dir: &Path,
    ) -> Result<PathBuf, RemoteJobError>;

    /// Ask the engine to stop the job.
    async fn cancel(&self, job: &RemoteJob) -> Result<(), RemoteJobError>;
}

// ---------------------------------------------------------------------------
// NodeODM implementation
// ---------------------------------------------------------------------------

/// Connection settings for a NodeODM node.
///
/// | Env var          | Default     |
/// |------------------|-------------|
/// | `ODM_NODE_HOST`  | `localhost` |
/// | `ODM_NODE_PORT`  | `3000`      |
/// | `ODM_NODE_TOKEN` | (empty)     |
#[derive(Debug, Clone)]
pub struct NodeOdmConfig {
    pub host: String,
    pub port: u16,
    pub token: Option<String>,
}

impl NodeOdmConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("ODM_NODE_HOST").unwrap_or_else(|_| "localhost".into());
        let port: u16 = std::env::var("ODM_NODE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);
        let token = std::env::var("ODM_NODE_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        Self { host, port, token }
    }

    /// Base HTTP URL. A host that already carries a scheme is used as is.
    pub fn api_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

impl Default for NodeOdmConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 3000,
            token: None,
        }
    }
}

/// [`RemoteJobClient`] backed by a NodeODM node.
pub struct NodeOdmClient {
    api: NodeOdmApi,
}

impl NodeOdmClient {
    pub fn new(config: &NodeOdmConfig) -> Self {
        Self {
            api: NodeOdmApi::new(config.api_url(), config.token.clone()),
        }
    }

    pub fn api(&self) -> &NodeOdmApi {
        &self.api
    }
}

fn remote_state(code: TaskStatusCode) -> Result<RemoteState, RemoteJobError> {
    match code {
        TaskStatusCode::Queued => Ok(RemoteState::Queued),
        TaskStatusCode::Running => Ok(RemoteState::Running),
        TaskStatusCode::Failed => Ok(RemoteState::Failed),
        TaskStatusCode::Completed => Ok(RemoteState::Completed),
        TaskStatusCode::Canceled => Ok(RemoteState::Canceled),
        TaskStatusCode::Unknown(other) => Err(RemoteJobError::Rejected(format!(
            "Unknown task status code {other}"
        ))),
    }
}

impl From<NodeInfo> for EngineInfo {
    fn from(info: NodeInfo) -> Self {
        Self {
            version: info.version,
            queue_count: info.task_queue_count,
        }
    }
}

#[async_trait]
impl RemoteJobClient for NodeOdmClient {
    async fn info(&self) -> Result<EngineInfo, RemoteJobError> {
        Ok(self.api.info().await?.into())
    }

    async fn submit(
        &self,
        images: &[PathBuf],
        parameters: &TaskParameters,
        name: &str,
    ) -> Result<RemoteJob, RemoteJobError> {
        let created = self.api.create_task(images, parameters, name).await?;
        tracing::info!(
            remote_uuid = %created.uuid,
            images = images.len(),
            name,
            "Submitted task to NodeODM",
        );
        Ok(RemoteJob::new(created.uuid))
    }

    async fn status(
        &self,
        job: &RemoteJob,
        since_line: usize,
    ) -> Result<RemoteStatus, RemoteJobError> {
        let info = self.api.task_info(&job.uuid).await?;
        let state = remote_state(info.status.code)?;
        let log_lines = self.api.task_output(&job.uuid, since_line).await?;

        Ok(RemoteStatus {
            state,
            progress: info.progress,
            log_lines,
            error: info.status.error_message.filter(|m| !m.is_empty()),
        })
    }

    async fn fetch_result_bundle(
        &self,
        job: &RemoteJob,
        dest_dir: &Path,
    ) -> Result<PathBuf, RemoteJobError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(BUNDLE_FILE_NAME);
        let bytes = self.api.download_all(&job.uuid, &dest).await?;
        tracing::info!(
            remote_uuid = %job.uuid,
            bytes,
            path = %dest.display(),
            "Downloaded result bundle",
        );
        Ok(dest)
    }

    async fn cancel(&self, job: &RemoteJob) -> Result<(), RemoteJobError> {
        self.api.cancel_task(&job.uuid).await?;
        tracing::info!(remote_uuid = %job.uuid, "Cancelled NodeODM task");
        Ok(())
    }
}
