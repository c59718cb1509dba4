//! Owner of every running orchestrator.
//!
//! [`OrchestratorSupervisor`] keeps at most one [`TaskOrchestrator`] per
//! task id. Each routine runs on its own tokio task with a child of the
//! supervisor's master [`CancellationToken`] and removes itself from the
//! running set when it exits. Shutdown cancels the master token and waits
//! (bounded) for every routine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use orthoflow_core::console::ConsoleOutput;
use orthoflow_core::quality::ProcessingOptions;
use orthoflow_core::status::ProcessingStatus;
use orthoflow_db::models::project::{Project, ProjectUpdate};
use orthoflow_events::{ProgressEvent, SubscriberRegistry};
use orthoflow_nodeodm::{RemoteJob, RemoteJobClient};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::orchestrator::{RunOutcome, TaskOrchestrator, MSG_TASK_CANCELLED};
use crate::store::{ProjectStore, StoreError};

/// Message written to records left `processing` with no remote handle.
pub const MSG_INTERRUPTED_BY_RESTART: &str = "Processing interrupted by server restart";

/// Errors surfaced to callers of the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Task {0} is already being processed")]
    Conflict(String),

    #[error("Project {0} not found")]
    NotFound(String),

    #[error("Project {task_id} is {status}, cannot start processing")]
    InvalidState {
        task_id: String,
        status: ProcessingStatus,
    },

    #[error("Supervisor is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Summary of [`OrchestratorSupervisor::recover_interrupted`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resumed: Vec<String>,
    pub failed: Vec<String>,
}

enum Launch {
    Run(ProcessingOptions),
    Resume(RemoteJob),
}

/// Internal bookkeeping for a single routine.
struct RunningTask {
    /// Distinguishes this routine from a later one for the same task id.
    id: u64,
    cancel: CancellationToken,
    /// `None` while the slot is reserved but the routine not yet spawned.
    handle: Option<JoinHandle<RunOutcome>>,
}

type RunningSet = Arc<Mutex<HashMap<String, RunningTask>>>;

/// Starts, tracks and stops task orchestrators.
pub struct OrchestratorSupervisor {
    store: Arc<dyn ProjectStore>,
    client: Arc<dyn RemoteJobClient>,
    registry: Arc<SubscriberRegistry>,
    config: Arc<PipelineConfig>,
    running: RunningSet,
    next_id: AtomicU64,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
}

impl OrchestratorSupervisor {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        client: Arc<dyn RemoteJobClient>,
        registry: Arc<SubscriberRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            client,
            registry,
            config: Arc::new(config),
            running: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start processing a `pending` project.
    ///
    /// Marks the record `processing` and launches the routine in the
    /// background; returns as soon as it is spawned.
    pub async fn start(
        &self,
        task_id: &str,
        options: ProcessingOptions,
    ) -> Result<(), SupervisorError> {
        let (id, cancel) = self.reserve(task_id).await?;

        let started = self.mark_processing(task_id, &options).await;
        if let Err(e) = started {
            self.release(task_id, id).await;
            return Err(e);
        }

        self.spawn(task_id, id, cancel, Launch::Run(options)).await;
        tracing::info!(task_id, "Processing started");
        Ok(())
    }

    /// Reattach to the remote job of a project left `processing`.
    pub async fn resume(&self, task_id: &str) -> Result<(), SupervisorError> {
        let (id, cancel) = self.reserve(task_id).await?;

        let job = match self.resumable_job(task_id).await {
            Ok(job) => job,
            Err(e) => {
                self.release(task_id, id).await;
                return Err(e);
            }
        };

        self.spawn(task_id, id, cancel, Launch::Resume(job)).await;
        Ok(())
    }

    /// Resume every `processing` record that has a remote handle and fail
    /// the rest. Called once at startup.
    pub async fn recover_interrupted(&self) -> Result<RecoveryReport, SupervisorError> {
        let stranded = self.store.list_by_status(ProcessingStatus::Processing).await?;
        let mut report = RecoveryReport::default();

        for project in stranded {
            if project.remote_task_uuid.is_some() {
                match self.resume(&project.task_id).await {
                    Ok(()) => report.resumed.push(project.task_id),
                    Err(e) => tracing::warn!(
                        task_id = %project.task_id,
                        error = %e,
                        "Failed to resume interrupted task",
                    ),
                }
                continue;
            }

            let update = ProjectUpdate::Failed {
                error_message: MSG_INTERRUPTED_BY_RESTART.to_string(),
                console_output: None,
            };
            match self.store.update(&project.task_id, &update).await {
                Ok(true) => report.failed.push(project.task_id),
                Ok(false) => {}
                Err(e) => tracing::error!(
                    task_id = %project.task_id,
                    error = %e,
                    "Failed to mark interrupted task as failed",
                ),
            }
        }

        tracing::info!(
            resumed = report.resumed.len(),
            failed = report.failed.len(),
            "Recovered interrupted tasks",
        );
        Ok(report)
    }

    /// Stop the routine for `task_id`, ask the engine to cancel the job and
    /// mark the record `cancelled`.
    ///
    /// Waits (bounded by the shutdown grace period) for the routine to
    /// exit so that no write races a following delete. Returns `true` if a
    /// routine was running.
    pub async fn cancel_one(&self, task_id: &str) -> bool {
        // The slot stays reserved until the routine has stopped, so a
        // concurrent start or resume keeps getting `Conflict`.
        let entry = self
            .running
            .lock()
            .await
            .get_mut(task_id)
            .map(|slot| (slot.id, slot.cancel.clone(), slot.handle.take()));
        let was_running = entry.is_some();

        if let Some((id, cancel, handle)) = entry {
            cancel.cancel();
            if let Some(handle) = handle {
                if tokio::time::timeout(self.config.shutdown_grace, handle)
                    .await
                    .is_err()
                {
                    tracing::warn!(task_id, "Orchestrator did not stop within grace period");
                }
            }
            self.release(task_id, id).await;
        }

        let project = match self.store.get(task_id).await {
            Ok(Some(project)) if project.status == ProcessingStatus::Processing => project,
            Ok(_) => return was_running,
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Failed to load project for cancellation");
                return was_running;
            }
        };

        if let Some(uuid) = &project.remote_task_uuid {
            if let Err(e) = self.client.cancel(&RemoteJob::new(uuid.clone())).await {
                tracing::warn!(task_id, remote_uuid = %uuid, error = %e, "Remote cancel failed");
            }
        }

        let update = ProjectUpdate::Cancelled {
            error_message: MSG_TASK_CANCELLED.to_string(),
        };
        match self.store.update(task_id, &update).await {
            Ok(true) => {
                let event = ProgressEvent::terminal(
                    task_id,
                    ProcessingStatus::Cancelled,
                    project.progress,
                    &ConsoleOutput::new(),
                    Some(MSG_TASK_CANCELLED.to_string()),
                );
                self.registry.publish(task_id, &event);
                tracing::info!(task_id, "Processing cancelled");
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(task_id, error = %e, "Failed to mark project cancelled"),
        }

        was_running
    }

    /// Cancel every routine and wait for each, bounded by the grace period.
    ///
    /// Records are left `processing` so they resume on the next start.
    pub async fn stop_all(&self) {
        tracing::info!("Stopping all orchestrators");
        self.cancel.cancel();

        let drained: Vec<(String, RunningTask)> = self.running.lock().await.drain().collect();
        let count = drained.len();
        let handles: Vec<_> = drained
            .into_iter()
            .filter_map(|(task_id, task)| {
                task.cancel.cancel();
                task.handle.map(|handle| (task_id, handle))
            })
            .collect();

        let grace = self.config.shutdown_grace;
        join_all(handles.into_iter().map(|(task_id, handle)| async move {
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!(task_id = %task_id, "Orchestrator did not stop within grace period");
            }
        }))
        .await;

        tracing::info!(count, "All orchestrators stopped");
    }

    pub async fn is_running(&self, task_id: &str) -> bool {
        self.running.lock().await.contains_key(task_id)
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    // ---- private helpers ----

    /// Claim the running slot for `task_id`.
    async fn reserve(&self, task_id: &str) -> Result<(u64, CancellationToken), SupervisorError> {
        if self.cancel.is_cancelled() {
            return Err(SupervisorError::ShuttingDown);
        }

        let mut running = self.running.lock().await;
        if running.contains_key(task_id) {
            return Err(SupervisorError::Conflict(task_id.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        running.insert(
            task_id.to_string(),
            RunningTask {
                id,
                cancel: cancel.clone(),
                handle: None,
            },
        );
        Ok((id, cancel))
    }

    async fn release(&self, task_id: &str, id: u64) {
        release_slot(&self.running, task_id, id).await;
    }

    async fn mark_processing(
        &self,
        task_id: &str,
        options: &ProcessingOptions,
    ) -> Result<(), SupervisorError> {
        let project = self.require(task_id).await?;
        if project.status != ProcessingStatus::Pending {
            return Err(SupervisorError::InvalidState {
                task_id: task_id.to_string(),
                status: project.status,
            });
        }

        let parameters = options.resolve();
        let update = ProjectUpdate::StartProcessing {
            quality: options.quality,
            options: serde_json::Value::Object(
                parameters
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect(),
            ),
        };
        if !self.store.update(task_id, &update).await? {
            // Lost a race with another writer between the read and the update.
            let status = self
                .store
                .get(task_id)
                .await?
                .map(|p| p.status)
                .ok_or_else(|| SupervisorError::NotFound(task_id.to_string()))?;
            return Err(SupervisorError::InvalidState {
                task_id: task_id.to_string(),
                status,
            });
        }
        Ok(())
    }

    async fn resumable_job(&self, task_id: &str) -> Result<RemoteJob, SupervisorError> {
        let project = self.require(task_id).await?;
        match (&project.status, &project.remote_task_uuid) {
            (ProcessingStatus::Processing, Some(uuid)) => Ok(RemoteJob::new(uuid.clone())),
            _ => Err(SupervisorError::InvalidState {
                task_id: task_id.to_string(),
                status: project.status,
            }),
        }
    }

    async fn require(&self, task_id: &str) -> Result<Project, SupervisorError> {
        self.store
            .get(task_id)
            .await?
            .ok_or_else(|| SupervisorError::NotFound(task_id.to_string()))
    }

    /// Spawn the routine and attach its handle to the reserved slot.
    async fn spawn(&self, task_id: &str, id: u64, cancel: CancellationToken, launch: Launch) {
        let orchestrator = TaskOrchestrator::new(
            task_id,
            Arc::clone(&self.store),
            Arc::clone(&self.client),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            cancel,
        );
        let running = Arc::clone(&self.running);
        let key = task_id.to_string();

        let handle = tokio::spawn(async move {
            let outcome = match launch {
                Launch::Run(options) => orchestrator.run(options).await,
                Launch::Resume(job) => orchestrator.resume(job).await,
            };
            release_slot(&running, &key, id).await;
            tracing::info!(task_id = %key, ?outcome, "Orchestrator exited");
            outcome
        });

        let mut running = self.running.lock().await;
        if let Some(slot) = running.get_mut(task_id).filter(|slot| slot.id == id) {
            slot.handle = Some(handle);
        }
    }
}

/// Remove `task_id` from the running set if it still belongs to routine `id`.
async fn release_slot(running: &RunningSet, task_id: &str, id: u64) {
    let mut running = running.lock().await;
    if running.get(task_id).is_some_and(|slot| slot.id == id) {
        running.remove(task_id);
    }
}
