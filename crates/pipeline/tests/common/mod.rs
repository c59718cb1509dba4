#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use orthoflow_core::quality::{ProcessingQuality, TaskParameters};
use orthoflow_core::status::ProcessingStatus;
use orthoflow_db::models::project::{CreateProject, Project, ProjectUpdate};
use orthoflow_events::SubscriberRegistry;
use orthoflow_nodeodm::{
    EngineInfo, RemoteJob, RemoteJobClient, RemoteJobError, RemoteState, RemoteStatus,
    BUNDLE_FILE_NAME,
};
use orthoflow_pipeline::{MemoryProjectStore, PipelineConfig, ProjectStore, StoreError};
use tempfile::TempDir;

pub const REMOTE_UUID: &str = "remote-0001";

/// How long a test waits for an asynchronous condition before failing.
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Scripted remote engine
// ---------------------------------------------------------------------------

/// A submitted job as seen by the scripted engine.
#[derive(Debug, Clone)]
pub struct Submission {
    pub images: Vec<PathBuf>,
    pub parameters: TaskParameters,
    pub name: String,
}

/// [`RemoteJobClient`] that replays a fixed sequence of poll results.
///
/// Once the script runs out, the last `Running`/`Queued` status is
/// repeated with progress growing by one per poll (capped at 98), so a
/// routine keeps writing until it is stopped.
#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<RemoteStatus, String>>>,
    last: Mutex<Option<RemoteStatus>>,
    bundle_entries: Vec<&'static str>,
    info_error: Option<String>,
    submit_error: Option<String>,
    bundle_error: Option<String>,
    pub submissions: Mutex<Vec<Submission>>,
    pub cancelled: Mutex<Vec<String>>,
    pub since_lines: Mutex<Vec<usize>>,
    pub polls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(self, progress: f64) -> Self {
        self.push(Ok(status(RemoteState::Running, progress, Vec::new(), None)))
    }

    pub fn running_with_lines(self, progress: f64, lines: Vec<String>) -> Self {
        self.push(Ok(status(RemoteState::Running, progress, lines, None)))
    }

    pub fn completed(self) -> Self {
        self.push(Ok(status(RemoteState::Completed, 100.0, Vec::new(), None)))
    }

    pub fn failed(self, progress: f64, error: Option<&str>) -> Self {
        self.push(Ok(status(
            RemoteState::Failed,
            progress,
            Vec::new(),
            error.map(str::to_string),
        )))
    }

    pub fn canceled(self) -> Self {
        self.push(Ok(status(RemoteState::Canceled, 0.0, Vec::new(), None)))
    }

    pub fn poll_error(self, message: &str) -> Self {
        self.push(Err(message.to_string()))
    }

    pub fn with_bundle(mut self, entries: &[&'static str]) -> Self {
        self.bundle_entries = entries.to_vec();
        self
    }

    pub fn unreachable(mut self, message: &str) -> Self {
        self.info_error = Some(message.to_string());
        self
    }

    pub fn rejecting_submit(mut self, message: &str) -> Self {
        self.submit_error = Some(message.to_string());
        self
    }

    pub fn failing_bundle(mut self, message: &str) -> Self {
        self.bundle_error = Some(message.to_string());
        self
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn cancelled_jobs(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn since_lines(&self) -> Vec<usize> {
        self.since_lines.lock().unwrap().clone()
    }

    fn push(self, entry: Result<RemoteStatus, String>) -> Self {
        self.script.lock().unwrap().push_back(entry);
        self
    }
}

fn status(
    state: RemoteState,
    progress: f64,
    log_lines: Vec<String>,
    error: Option<String>,
) -> RemoteStatus {
    RemoteStatus {
        state,
        progress,
        log_lines,
        error,
    }
}

#[async_trait]
impl RemoteJobClient for ScriptedClient {
    async fn info(&self) -> Result<EngineInfo, RemoteJobError> {
        match &self.info_error {
            Some(message) => Err(RemoteJobError::Connection(message.clone())),
            None => Ok(EngineInfo {
                version: "2.2.0".into(),
                queue_count: 0,
            }),
        }
    }

    async fn submit(
        &self,
        images: &[PathBuf],
        parameters: &TaskParameters,
        name: &str,
    ) -> Result<RemoteJob, RemoteJobError> {
        if let Some(message) = &self.submit_error {
            return Err(RemoteJobError::Connection(message.clone()));
        }
        self.submissions.lock().unwrap().push(Submission {
            images: images.to_vec(),
            parameters: parameters.clone(),
            name: name.to_string(),
        });
        Ok(RemoteJob::new(REMOTE_UUID))
    }

    async fn status(
        &self,
        _job: &RemoteJob,
        since_line: usize,
    ) -> Result<RemoteStatus, RemoteJobError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.since_lines.lock().unwrap().push(since_line);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(status)) => {
                *self.last.lock().unwrap() = Some(status.clone());
                Ok(status)
            }
            Some(Err(message)) => Err(RemoteJobError::Connection(message)),
            None => {
                let mut last = self.last.lock().unwrap();
                let mut held = last
                    .clone()
                    .unwrap_or_else(|| status(RemoteState::Running, 0.0, Vec::new(), None));
                held.log_lines.clear();
                if matches!(held.state, RemoteState::Running | RemoteState::Queued) {
                    held.progress = (held.progress + 1.0).min(98.0);
                }
                *last = Some(held.clone());
                Ok(held)
            }
        }
    }

    async fn fetch_result_bundle(
        &self,
        _job: &RemoteJob,
        dest_dir: &Path,
    ) -> Result<PathBuf, RemoteJobError> {
        if let Some(message) = &self.bundle_error {
            return Err(RemoteJobError::Connection(message.clone()));
        }
        std::fs::create_dir_all(dest_dir)?;
        let path = dest_dir.join(BUNDLE_FILE_NAME);
        write_bundle(&path, &self.bundle_entries);
        Ok(path)
    }

    async fn cancel(&self, job: &RemoteJob) -> Result<(), RemoteJobError> {
        self.cancelled.lock().unwrap().push(job.uuid.clone());
        Ok(())
    }
}

/// Write a zip containing `entries`, each with a small payload.
pub fn write_bundle(path: &Path, entries: &[&str]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for entry in entries {
        zip.start_file(*entry, options).unwrap();
        zip.write_all(b"payload").unwrap();
    }
    zip.finish().unwrap();
}

// ---------------------------------------------------------------------------
// Recording store
// ---------------------------------------------------------------------------

/// One call to [`ProjectStore::update`].
#[derive(Debug, Clone)]
pub struct RecordedUpdate {
    pub task_id: String,
    pub update: ProjectUpdate,
    pub applied: bool,
}

/// [`MemoryProjectStore`] that records every update and can be told to
/// fail or stall specific writes.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryProjectStore,
    updates: Mutex<Vec<RecordedUpdate>>,
    failing_progress_writes: AtomicUsize,
    failing_terminal_writes: AtomicBool,
    refusing_remote_handle: AtomicBool,
    holding_progress_writes: AtomicBool,
    held_progress_writes: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_progress_writes(&self, count: usize) {
        self.failing_progress_writes.store(count, Ordering::SeqCst);
    }

    /// Fail every `completed`/`failed`/`cancelled` write with a pool error.
    pub fn fail_terminal_writes(&self) {
        self.failing_terminal_writes.store(true, Ordering::SeqCst);
    }

    /// Report the remote handle write as not applied, as if another
    /// writer had moved the record out of `processing`.
    pub fn refuse_remote_handle(&self) {
        self.refusing_remote_handle.store(true, Ordering::SeqCst);
    }

    /// Stall progress writes until [`RecordingStore::release_progress_writes`].
    pub fn hold_progress_writes(&self) {
        self.holding_progress_writes.store(true, Ordering::SeqCst);
    }

    pub fn release_progress_writes(&self) {
        self.holding_progress_writes.store(false, Ordering::SeqCst);
    }

    /// Progress writes that have stalled on the hold so far.
    pub fn held_progress_writes(&self) -> usize {
        self.held_progress_writes.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Progress values that were actually persisted, in order.
    pub fn applied_progress(&self) -> Vec<i32> {
        self.updates()
            .into_iter()
            .filter(|u| u.applied)
            .filter_map(|u| match u.update {
                ProjectUpdate::Progress { progress, .. } => Some(progress),
                _ => None,
            })
            .collect()
    }

    pub fn applied_count(&self) -> usize {
        self.updates().iter().filter(|u| u.applied).count()
    }

    pub async fn project(&self, task_id: &str) -> Project {
        self.inner.get(task_id).await.unwrap().unwrap()
    }
}

#[async_trait]
impl ProjectStore for RecordingStore {
    async fn get(&self, task_id: &str) -> Result<Option<Project>, StoreError> {
        self.inner.get(task_id).await
    }

    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<Project>, StoreError> {
        self.inner.list(skip, limit).await
    }

    async fn list_by_status(&self, status: ProcessingStatus) -> Result<Vec<Project>, StoreError> {
        self.inner.list_by_status(status).await
    }

    async fn create(&self, input: &CreateProject) -> Result<Project, StoreError> {
        self.inner.create(input).await
    }

    async fn update(&self, task_id: &str, update: &ProjectUpdate) -> Result<bool, StoreError> {
        let terminal = matches!(
            update,
            ProjectUpdate::Completed { .. }
                | ProjectUpdate::Failed { .. }
                | ProjectUpdate::Cancelled { .. }
        );
        if terminal && self.failing_terminal_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        if matches!(update, ProjectUpdate::RemoteSubmitted { .. })
            && self.refusing_remote_handle.load(Ordering::SeqCst)
        {
            return Ok(false);
        }

        if matches!(update, ProjectUpdate::Progress { .. })
            && self.holding_progress_writes.load(Ordering::SeqCst)
        {
            self.held_progress_writes.fetch_add(1, Ordering::SeqCst);
            while self.holding_progress_writes.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        if matches!(update, ProjectUpdate::Progress { .. }) {
            let remaining = self.failing_progress_writes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_progress_writes
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
        }

        let applied = self.inner.update(task_id, update).await?;
        self.updates.lock().unwrap().push(RecordedUpdate {
            task_id: task_id.to_string(),
            update: update.clone(),
            applied,
        });
        Ok(applied)
    }

    async fn delete(&self, task_id: &str) -> Result<bool, StoreError> {
        self.inner.delete(task_id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Temp directories, store and registry shared by one test.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: PipelineConfig,
    pub store: Arc<RecordingStore>,
    pub registry: Arc<SubscriberRegistry>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            uploads_dir: dir.path().join("uploads"),
            results_dir: dir.path().join("results"),
            poll_interval: Duration::from_millis(5),
            max_poll_backoff: Duration::from_millis(20),
            max_consecutive_poll_errors: None,
            shutdown_grace: Duration::from_secs(2),
        };
        Self {
            dir,
            config,
            store: Arc::new(RecordingStore::new()),
            registry: Arc::new(SubscriberRegistry::default()),
        }
    }

    /// Insert a `pending` project created a second ago, with `images`
    /// image files on disk.
    pub async fn seed_pending(&self, task_id: &str, images: usize, quality: ProcessingQuality) {
        let images_dir = self.config.images_dir(task_id);
        std::fs::create_dir_all(&images_dir).unwrap();
        for i in 0..images {
            std::fs::write(images_dir.join(format!("IMG_{i:04}.jpg")), b"jpeg").unwrap();
        }

        let input = CreateProject {
            task_id: task_id.to_string(),
            name: format!("Survey {task_id}"),
            description: None,
            quality,
            total_images: images as i32,
        };
        let created = Utc::now() - chrono::Duration::seconds(1);
        self.store
            .inner
            .insert(Project::pending(1, &input, created))
            .await;
    }

    /// Insert a project already `processing`, as left by a previous run.
    pub async fn seed_processing(&self, task_id: &str, progress: i32, remote_uuid: Option<&str>) {
        self.seed_pending(task_id, 5, ProcessingQuality::Medium).await;
        let mut project = self.store.project(task_id).await;
        project.status = ProcessingStatus::Processing;
        project.progress = progress;
        project.remote_task_uuid = remote_uuid.map(str::to_string);
        self.store.inner.insert(project).await;
    }

    /// Move a seeded `pending` project to `processing`, as the supervisor
    /// does before launching a routine.
    pub async fn mark_processing(&self, task_id: &str, quality: ProcessingQuality) {
        let update = ProjectUpdate::StartProcessing {
            quality,
            options: serde_json::json!({}),
        };
        assert!(self.store.inner.update(task_id, &update).await.unwrap());
    }
}

/// Poll `condition` until it holds or [`WAIT_LIMIT`] elapses.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT_LIMIT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
