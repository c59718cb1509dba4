//! NodeODM REST payloads.
//!
//! NodeODM answers most calls with HTTP 200 even on failure and reports
//! the problem as `{"error": "..."}`. [`ApiReply`] captures both shapes so
//! callers can turn the error form into a typed error.

use serde::Deserialize;

/// Either a successful payload or NodeODM's `{"error": ...}` envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiReply<T> {
    Error { error: String },
    Ok(T),
}

impl<T> ApiReply<T> {
    pub fn into_result(self) -> Result<T, String> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Error { error } => Err(error),
        }
    }
}

/// Response of `GET /info`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub version: String,
    #[serde(default)]
    pub task_queue_count: u32,
    #[serde(default)]
    pub max_images: Option<u32>,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub engine_version: Option<String>,
}

/// Response of `POST /task/new`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTaskResponse {
    pub uuid: String,
}

/// Response of `POST /task/cancel`.
#[derive(Debug, Clone, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Numeric task status reported by NodeODM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "u16")]
pub enum TaskStatusCode {
    Queued,
    Running,
    Failed,
    Completed,
    Canceled,
    Unknown(u16),
}

impl From<u16> for TaskStatusCode {
    fn from(code: u16) -> Self {
        match code {
            10 => Self::Queued,
            20 => Self::Running,
            30 => Self::Failed,
            40 => Self::Completed,
            50 => Self::Canceled,
            other => Self::Unknown(other),
        }
    }
}

/// The `status` object inside [`TaskInfo`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub code: TaskStatusCode,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Response of `GET /task/{uuid}/info`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: TaskStatus,
    /// Percentage, 0-100.
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub images_count: u32,
    /// Milliseconds spent processing so far.
    #[serde(default)]
    pub processing_time: i64,
}

/// Parse a NodeODM reply body.
pub fn parse_reply<T>(text: &str) -> Result<ApiReply<T>, serde_json::Error>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(text)
}
