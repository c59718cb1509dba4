//! REST API client for the NodeODM HTTP endpoints.
//!
//! Wraps the NodeODM HTTP API (node info, task creation, status, console
//! output, bundle download and cancellation) using [`reqwest`].

use std::path::Path;

use orthoflow_core::quality::TaskParameters;
use reqwest::multipart::{Form, Part};
use tokio::io::AsyncWriteExt;

use crate::messages::{ApiReply, NewTaskResponse, NodeInfo, SuccessResponse, TaskInfo};

/// HTTP client for a single NodeODM node.
pub struct NodeOdmApi {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

/// Errors from the NodeODM REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum NodeOdmError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// NodeODM returned a non-2xx status code.
    #[error("NodeODM API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// NodeODM answered with an `{"error": ...}` body.
    #[error("{0}")]
    Engine(String),

    /// Reading an input image or writing the bundle failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeOdmApi {
    /// Create a new API client for a NodeODM node.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:3000`.
    /// * `token`   - Optional access token appended as `?token=`.
    pub fn new(api_url: String, token: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, token)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, token: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Base HTTP URL of the node.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Fetch node information (`GET /info`). Doubles as a reachability check.
    pub async fn info(&self) -> Result<NodeInfo, NodeOdmError> {
        let response = self.get("/info").send().await?;
        Self::parse_response(response).await
    }

    /// Create a task from a set of images (`POST /task/new`).
    ///
    /// Images are sent as repeated `images` multipart parts; `options` is
    /// the JSON list of `{name, value}` pairs NodeODM expects.
    pub async fn create_task(
        &self,
        images: &[impl AsRef<Path>],
        parameters: &TaskParameters,
        name: &str,
    ) -> Result<NewTaskResponse, NodeOdmError> {
        let options = serde_json::to_string(&parameters.to_option_list())
            .map_err(|e| NodeOdmError::Engine(format!("Invalid task options: {e}")))?;

        let mut form = Form::new()
            .text("name", name.to_string())
            .text("options", options);

        for path in images {
            let path = path.as_ref();
            let bytes = tokio::fs::read(path).await?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string());
            form = form.part("images", Part::bytes(bytes).file_name(file_name));
        }

        let response = self.post("/task/new").multipart(form).send().await?;
        Self::parse_response(response).await
    }

    /// Retrieve task status (`GET /task/{uuid}/info`).
    pub async fn task_info(&self, uuid: &str) -> Result<TaskInfo, NodeOdmError> {
        let response = self.get(&format!("/task/{uuid}/info")).send().await?;
        Self::parse_response(response).await
    }

    /// Retrieve console lines starting at `line` (`GET /task/{uuid}/output`).
    pub async fn task_output(&self, uuid: &str, line: usize) -> Result<Vec<String>, NodeOdmError> {
        let response = self
            .get(&format!("/task/{uuid}/output"))
            .query(&[("line", line)])
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Stream the full result archive to `dest`
    /// (`GET /task/{uuid}/download/all.zip`).
    pub async fn download_all(&self, uuid: &str, dest: &Path) -> Result<u64, NodeOdmError> {
        let response = self
            .get(&format!("/task/{uuid}/download/all.zip"))
            .send()
            .await?;
        let mut response = Self::ensure_success(response).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    /// Cancel a queued or running task (`POST /task/cancel`).
    pub async fn cancel_task(&self, uuid: &str) -> Result<(), NodeOdmError> {
        let response = self
            .post("/task/cancel")
            .form(&[("uuid", uuid)])
            .send()
            .await?;
        let reply: SuccessResponse = Self::parse_response(response).await?;
        if !reply.success {
            return Err(NodeOdmError::Engine(format!("Cancel of {uuid} was refused")));
        }
        Ok(())
    }

    // ---- private helpers ----

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.with_token(self.client.get(format!("{}{path}", self.api_url)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.with_token(self.client.post(format!("{}{path}", self.api_url)))
    }

    fn with_token(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.query(&[("token", token)]),
            None => builder,
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`NodeOdmError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, NodeOdmError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(NodeOdmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body, unwrapping NodeODM's
    /// `{"error": ...}` envelope into [`NodeOdmError::Engine`].
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, NodeOdmError> {
        let response = Self::ensure_success(response).await?;
        let reply = response.json::<ApiReply<T>>().await?;
        reply.into_result().map_err(NodeOdmError::Engine)
    }
}
