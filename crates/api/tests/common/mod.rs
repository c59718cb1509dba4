#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use orthoflow_core::quality::{ProcessingQuality, TaskParameters};
use orthoflow_core::status::ProcessingStatus;
use orthoflow_db::models::project::{CreateProject, Project};
use orthoflow_events::SubscriberRegistry;
use orthoflow_nodeodm::{
    EngineInfo, RemoteJob, RemoteJobClient, RemoteJobError, RemoteState, RemoteStatus,
};
use orthoflow_pipeline::{MemoryProjectStore, OrchestratorSupervisor, PipelineConfig};
use tempfile::TempDir;
use tower::ServiceExt;

use orthoflow_api::config::ServerConfig;
use orthoflow_api::router::build_app_router;
use orthoflow_api::state::AppState;

pub const STUB_UUID: &str = "0b4c2f9e-stub-job";

pub const MULTIPART_BOUNDARY: &str = "orthoflow-test-boundary";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        max_images: 50,
        max_upload_size: 10 * 1024 * 1024,
        upload_retention_days: 7,
        result_retention_days: 30,
    }
}

// ---------------------------------------------------------------------------
// Stub engine
// ---------------------------------------------------------------------------

/// Engine that accepts every job and reports it running at 10% forever.
#[derive(Default)]
pub struct StubClient {
    submitted: Mutex<usize>,
    cancelled: Mutex<Vec<String>>,
}

impl StubClient {
    pub fn submissions(&self) -> usize {
        *self.submitted.lock().unwrap()
    }

    pub fn cancelled_jobs(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteJobClient for StubClient {
    async fn info(&self) -> Result<EngineInfo, RemoteJobError> {
        Ok(EngineInfo {
            version: "stub".to_string(),
            queue_count: 0,
        })
    }

    async fn submit(
        &self,
        _images: &[PathBuf],
        _parameters: &TaskParameters,
        _name: &str,
    ) -> Result<RemoteJob, RemoteJobError> {
        *self.submitted.lock().unwrap() += 1;
        Ok(RemoteJob::new(STUB_UUID))
    }

    async fn status(
        &self,
        _job: &RemoteJob,
        _since_line: usize,
    ) -> Result<RemoteStatus, RemoteJobError> {
        Ok(RemoteStatus {
            state: RemoteState::Running,
            progress: 10.0,
            log_lines: Vec::new(),
            error: None,
        })
    }

    async fn fetch_result_bundle(
        &self,
        _job: &RemoteJob,
        _dest_dir: &Path,
    ) -> Result<PathBuf, RemoteJobError> {
        Err(RemoteJobError::Connection("stub has no results".to_string()))
    }

    async fn cancel(&self, job: &RemoteJob) -> Result<(), RemoteJobError> {
        self.cancelled.lock().unwrap().push(job.uuid.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test application
// ---------------------------------------------------------------------------

/// Router plus handles on everything behind it.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryProjectStore>,
    pub client: Arc<StubClient>,
    pub registry: Arc<SubscriberRegistry>,
    pub supervisor: Arc<OrchestratorSupervisor>,
    pub dir: TempDir,
}

/// Build the full application router with all middleware layers over an
/// in-memory store, a stub engine and temporary upload/result roots.
pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

pub fn build_test_app_with(config: ServerConfig) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = PipelineConfig {
        uploads_dir: dir.path().join("uploads"),
        results_dir: dir.path().join("results"),
        poll_interval: Duration::from_millis(5),
        shutdown_grace: Duration::from_secs(2),
        ..PipelineConfig::default()
    };

    let store = Arc::new(MemoryProjectStore::new());
    let client = Arc::new(StubClient::default());
    let registry = Arc::new(SubscriberRegistry::default());
    let supervisor = Arc::new(OrchestratorSupervisor::new(
        store.clone(),
        client.clone(),
        registry.clone(),
        pipeline,
    ));

    let state = AppState {
        store: store.clone(),
        supervisor: supervisor.clone(),
        registry: registry.clone(),
        config: Arc::new(config.clone()),
    };
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        store,
        client,
        registry,
        supervisor,
        dir,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn upload(&self, files: &[(&str, &[u8])]) -> Response<Body> {
        self.send(
            Request::post("/api/v1/projects")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
                )
                .body(Body::from(multipart_body(files, &[])))
                .unwrap(),
        )
        .await
    }

    /// Insert a `pending` record and write `images` placeholder images.
    pub async fn seed_pending(&self, task_id: &str, images: usize) -> Project {
        let images_dir = self.state.pipeline().images_dir(task_id);
        std::fs::create_dir_all(&images_dir).unwrap();
        for i in 0..images {
            std::fs::write(images_dir.join(format!("IMG_{i:04}.JPG")), b"jpeg").unwrap();
        }

        let input = CreateProject {
            task_id: task_id.to_string(),
            name: format!("Project {task_id}"),
            description: None,
            quality: ProcessingQuality::Medium,
            total_images: images as i32,
        };
        let project = Project::pending(1, &input, Utc::now());
        self.store.insert(project.clone()).await;
        project
    }

    /// Insert a `completed` record whose orthophoto exists on disk.
    pub async fn seed_completed(&self, task_id: &str) -> Project {
        let mut project = self.seed_pending(task_id, 3).await;
        let result_dir = self.state.pipeline().result_dir(task_id);
        let ortho = result_dir.join("odm_orthophoto/odm_orthophoto.tif");
        std::fs::create_dir_all(ortho.parent().unwrap()).unwrap();
        std::fs::write(&ortho, b"GeoTIFF bytes").unwrap();

        project.status = ProcessingStatus::Completed;
        project.progress = 100;
        project.processing_time = Some(42.5);
        project.completed_at = Some(Utc::now());
        project.orthophoto_path = Some(ortho.to_string_lossy().into_owned());
        self.store.insert(project.clone()).await;
        project
    }
}

/// Encode `files` (and plain `fields`) as a multipart/form-data body.
pub fn multipart_body(files: &[(&str, &[u8])], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for (file_name, content) in files {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Poll `check` until it holds or [`WAIT_LIMIT`] passes.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {WAIT_LIMIT:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
