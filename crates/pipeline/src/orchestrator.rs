//! Per-project monitoring routine.
//!
//! A [`TaskOrchestrator`] owns the `processing` phase of one project:
//! it submits the images to the remote engine (or reattaches to a job
//! submitted before a restart), polls until the job ends, and records
//! every observed change in the store before publishing it to
//! subscribers. Internal errors never escape; they end up as a `failed`
//! record with a readable message.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orthoflow_core::console::ConsoleOutput;
use orthoflow_core::progress::clamp_in_flight;
use orthoflow_core::quality::ProcessingOptions;
use orthoflow_core::status::ProcessingStatus;
use orthoflow_core::types::Timestamp;
use orthoflow_db::models::project::{Project, ProjectUpdate};
use orthoflow_events::{ProgressEvent, SubscriberRegistry};
use orthoflow_nodeodm::{RemoteJob, RemoteJobClient, RemoteJobError, RemoteState, RemoteStatus};
use tokio_util::sync::CancellationToken;

use crate::assets::collect_input_images;
use crate::backoff::{next_delay, BackoffConfig};
use crate::config::PipelineConfig;
use crate::results::{locate_artifacts, unpack_bundle};
use crate::store::ProjectStore;

/// Attempts made for a terminal write before giving up.
const TERMINAL_WRITE_ATTEMPTS: u32 = 3;

/// Pause between terminal write attempts.
const TERMINAL_WRITE_RETRY_DELAY: Duration = Duration::from_millis(200);

pub const MSG_TASK_FAILED: &str = "Task failed";
pub const MSG_TASK_CANCELLED: &str = "Task cancelled by user";

/// How a routine ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
    /// Stopped by its cancellation token, lost write authority over the
    /// record, or could not persist its terminal status. No terminal
    /// status was written or published.
    Interrupted,
    /// The record disappeared before the routine could start.
    NotFound,
}

/// Mutable bookkeeping for one monitoring loop.
struct RunState {
    created_at: Timestamp,
    progress: i32,
    console: ConsoleOutput,
    log_offset: usize,
    /// After a restart the offset is unknown; the first poll reloads the
    /// console from the beginning instead of appending.
    reload_console: bool,
}

impl RunState {
    fn fresh(project: &Project) -> Self {
        Self {
            created_at: project.created_at,
            progress: 0,
            console: ConsoleOutput::new(),
            log_offset: 0,
            reload_console: false,
        }
    }

    fn resumed(project: &Project) -> Self {
        Self {
            created_at: project.created_at,
            progress: project.progress,
            console: project.console_output.clone(),
            log_offset: 0,
            reload_console: true,
        }
    }

    fn absorb_lines(&mut self, lines: Vec<String>) {
        self.log_offset += lines.len();
        if self.reload_console {
            self.console = ConsoleOutput::from(lines);
            self.reload_console = false;
        } else {
            self.console.extend(lines);
        }
    }
}

/// Drives one project through the remote engine.
pub struct TaskOrchestrator {
    task_id: String,
    store: Arc<dyn ProjectStore>,
    client: Arc<dyn RemoteJobClient>,
    registry: Arc<SubscriberRegistry>,
    config: Arc<PipelineConfig>,
    cancel: CancellationToken,
}

impl TaskOrchestrator {
    pub fn new(
        task_id: impl Into<String>,
        store: Arc<dyn ProjectStore>,
        client: Arc<dyn RemoteJobClient>,
        registry: Arc<SubscriberRegistry>,
        config: Arc<PipelineConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            store,
            client,
            registry,
            config,
            cancel,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Submit the project's images and monitor the job to completion.
    ///
    /// Expects the record to already be `processing`.
    pub async fn run(self, options: ProcessingOptions) -> RunOutcome {
        let project = match self.load().await {
            Some(project) => project,
            None => return RunOutcome::NotFound,
        };
        let state = RunState::fresh(&project);

        tracing::info!(
            task_id = %self.task_id,
            quality = %options.quality,
            "Starting orchestration",
        );

        let reachable = tokio::select! {
            _ = self.cancel.cancelled() => return self.interrupted("engine check"),
            result = self.client.info() => result,
        };
        if let Err(e) = reachable {
            return self
                .fail(&state, format!("NodeODM connection failed: {e}"))
                .await;
        }

        let images = match collect_input_images(&self.config.images_dir(&self.task_id)).await {
            Ok(images) => images,
            Err(e) => return self.fail(&state, e.to_string()).await,
        };

        let parameters = options.resolve();
        let submitted = tokio::select! {
            _ = self.cancel.cancelled() => return self.interrupted("submit"),
            result = self.client.submit(&images, &parameters, &self.task_id) => result,
        };
        let job = match submitted {
            Ok(job) => job,
            Err(e) => return self.fail(&state, submit_error_message(&e)).await,
        };

        tracing::info!(
            task_id = %self.task_id,
            remote_uuid = %job.uuid,
            images = images.len(),
            "Job submitted",
        );

        if self.cancel.is_cancelled() {
            self.cancel_remote(&job).await;
            return self.interrupted("after submit");
        }
        let remembered = ProjectUpdate::RemoteSubmitted {
            remote_task_uuid: job.uuid.clone(),
        };
        match self.store.update(&self.task_id, &remembered).await {
            Ok(true) => {}
            Ok(false) => {
                self.cancel_remote(&job).await;
                return self.lost_authority();
            }
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, error = %e, "Failed to record remote job handle");
            }
        }

        self.monitor(job, state).await
    }

    /// Reattach to a job submitted before a restart, without resubmitting.
    pub async fn resume(self, job: RemoteJob) -> RunOutcome {
        let project = match self.load().await {
            Some(project) => project,
            None => return RunOutcome::NotFound,
        };
        if project.status != ProcessingStatus::Processing {
            tracing::warn!(
                task_id = %self.task_id,
                status = %project.status,
                "Not resuming, project is no longer processing",
            );
            return RunOutcome::Interrupted;
        }

        tracing::info!(
            task_id = %self.task_id,
            remote_uuid = %job.uuid,
            progress = project.progress,
            "Resuming orchestration",
        );
        let state = RunState::resumed(&project);
        self.monitor(job, state).await
    }

    // ---- monitoring ----

    async fn monitor(&self, job: RemoteJob, mut state: RunState) -> RunOutcome {
        let backoff = BackoffConfig::new(self.config.poll_interval, self.config.max_poll_backoff);
        let mut delay = backoff.initial_delay;
        let mut consecutive_errors = 0u32;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return self.interrupted("poll wait"),
                _ = tokio::time::sleep(delay) => {}
            }

            let polled = tokio::select! {
                _ = self.cancel.cancelled() => return self.interrupted("poll"),
                result = self.client.status(&job, state.log_offset) => result,
            };

            let status = match polled {
                Ok(status) => {
                    consecutive_errors = 0;
                    delay = backoff.initial_delay;
                    status
                }
                Err(e) => {
                    consecutive_errors += 1;
                    delay = next_delay(delay, &backoff);
                    tracing::warn!(
                        task_id = %self.task_id,
                        remote_uuid = %job.uuid,
                        consecutive_errors,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Poll failed",
                    );
                    if let Some(max) = self.config.max_consecutive_poll_errors {
                        if consecutive_errors >= max {
                            let message = format!(
                                "Lost contact with processing node after {consecutive_errors} failed polls: {e}"
                            );
                            return self.fail(&state, message).await;
                        }
                    }
                    continue;
                }
            };

            let RemoteStatus {
                state: remote_state,
                progress,
                log_lines,
                error,
            } = status;
            state.absorb_lines(log_lines);

            match remote_state {
                RemoteState::Queued | RemoteState::Running => {
                    if let Some(outcome) = self.record_progress(&mut state, progress).await {
                        return outcome;
                    }
                }
                RemoteState::Completed => return self.complete(&job, &state).await,
                RemoteState::Failed => {
                    let message = error.unwrap_or_else(|| MSG_TASK_FAILED.to_string());
                    tracing::error!(
                        task_id = %self.task_id,
                        remote_uuid = %job.uuid,
                        error = %message,
                        "Remote job failed",
                    );
                    return self.fail(&state, message).await;
                }
                RemoteState::Canceled => return self.cancelled(&state).await,
            }
        }
    }

    /// Persist and publish a progress increase. Returns an outcome when
    /// the routine must stop.
    async fn record_progress(&self, state: &mut RunState, reported: f64) -> Option<RunOutcome> {
        let progress = clamp_in_flight(reported);
        if progress <= state.progress {
            return None;
        }

        if self.cancel.is_cancelled() {
            return Some(self.interrupted("progress write"));
        }

        let update = ProjectUpdate::Progress {
            progress,
            console_output: state.console.clone(),
        };
        match self.store.update(&self.task_id, &update).await {
            Ok(true) => {}
            Ok(false) => return Some(self.lost_authority()),
            Err(e) => {
                tracing::warn!(
                    task_id = %self.task_id,
                    progress,
                    error = %e,
                    "Failed to persist progress",
                );
                return None;
            }
        }

        state.progress = progress;
        tracing::debug!(task_id = %self.task_id, progress, "Progress updated");
        self.registry.publish(
            &self.task_id,
            &ProgressEvent::processing(&self.task_id, progress, &state.console),
        );
        None
    }

    // ---- terminal transitions ----

    async fn complete(&self, job: &RemoteJob, state: &RunState) -> RunOutcome {
        let result_dir = self.config.result_dir(&self.task_id);

        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => return self.interrupted("bundle download"),
            result = self.client.fetch_result_bundle(job, &result_dir) => result,
        };
        let bundle = match fetched {
            Ok(path) => path,
            Err(e) => {
                return self
                    .fail(state, format!("Failed to download results: {e}"))
                    .await
            }
        };
        if let Err(e) = unpack_bundle(&bundle, &result_dir).await {
            return self
                .fail(state, format!("Failed to download results: {e}"))
                .await;
        }

        let artifacts = locate_artifacts(&result_dir).await;
        let completed_at = Utc::now();
        let processing_time =
            ((completed_at - state.created_at).num_milliseconds() as f64 / 1000.0).max(0.0);

        let update = ProjectUpdate::Completed {
            completed_at,
            processing_time,
            artifacts: artifacts.clone(),
            console_output: state.console.clone(),
        };
        if let Some(outcome) = self.write_terminal(&update).await {
            return outcome;
        }

        tracing::info!(
            task_id = %self.task_id,
            remote_uuid = %job.uuid,
            processing_time,
            artifacts = artifacts.count(),
            "Processing completed",
        );
        self.publish_terminal(state, ProcessingStatus::Completed, None);
        RunOutcome::Completed
    }

    async fn fail(&self, state: &RunState, message: String) -> RunOutcome {
        let update = ProjectUpdate::Failed {
            error_message: message.clone(),
            console_output: (!state.console.is_empty()).then(|| state.console.clone()),
        };
        if let Some(outcome) = self.write_terminal(&update).await {
            return outcome;
        }

        tracing::error!(task_id = %self.task_id, error = %message, "Processing failed");
        self.publish_terminal(state, ProcessingStatus::Failed, Some(message));
        RunOutcome::Failed
    }

    async fn cancelled(&self, state: &RunState) -> RunOutcome {
        let update = ProjectUpdate::Cancelled {
            error_message: MSG_TASK_CANCELLED.to_string(),
        };
        if let Some(outcome) = self.write_terminal(&update).await {
            return outcome;
        }

        tracing::info!(task_id = %self.task_id, "Remote job was cancelled");
        self.publish_terminal(
            state,
            ProcessingStatus::Cancelled,
            Some(MSG_TASK_CANCELLED.to_string()),
        );
        RunOutcome::Cancelled
    }

    /// Write a terminal update, retrying transient store errors.
    ///
    /// Returns an outcome when the caller must stop without publishing.
    async fn write_terminal(&self, update: &ProjectUpdate) -> Option<RunOutcome> {
        for attempt in 1..=TERMINAL_WRITE_ATTEMPTS {
            if self.cancel.is_cancelled() {
                return Some(self.interrupted(update.kind()));
            }
            match self.store.update(&self.task_id, update).await {
                Ok(true) => return None,
                Ok(false) => return Some(self.lost_authority()),
                Err(e) => {
                    tracing::error!(
                        task_id = %self.task_id,
                        update = update.kind(),
                        attempt,
                        error = %e,
                        "Terminal write failed",
                    );
                    if attempt < TERMINAL_WRITE_ATTEMPTS {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return Some(self.interrupted(update.kind())),
                            _ = tokio::time::sleep(TERMINAL_WRITE_RETRY_DELAY) => {}
                        }
                    }
                }
            }
        }

        // Nothing was persisted, so nothing is announced. The record stays
        // `processing` and startup recovery picks it up.
        tracing::error!(
            task_id = %self.task_id,
            update = update.kind(),
            attempts = TERMINAL_WRITE_ATTEMPTS,
            "Giving up on terminal write",
        );
        Some(RunOutcome::Interrupted)
    }

    fn publish_terminal(&self, state: &RunState, status: ProcessingStatus, error: Option<String>) {
        let event = ProgressEvent::terminal(&self.task_id, status, state.progress, &state.console, error);
        let delivered = self.registry.publish(&self.task_id, &event);
        tracing::debug!(task_id = %self.task_id, status = %status, delivered, "Published terminal event");
    }

    // ---- helpers ----

    async fn load(&self) -> Option<Project> {
        match self.store.get(&self.task_id).await {
            Ok(Some(project)) => Some(project),
            Ok(None) => {
                tracing::warn!(task_id = %self.task_id, "Project not found");
                None
            }
            Err(e) => {
                tracing::error!(task_id = %self.task_id, error = %e, "Failed to load project");
                None
            }
        }
    }

    async fn cancel_remote(&self, job: &RemoteJob) {
        if let Err(e) = self.client.cancel(job).await {
            tracing::warn!(
                task_id = %self.task_id,
                remote_uuid = %job.uuid,
                error = %e,
                "Failed to cancel remote job",
            );
        }
    }

    fn interrupted(&self, stage: &'static str) -> RunOutcome {
        tracing::info!(task_id = %self.task_id, stage, "Orchestration interrupted");
        RunOutcome::Interrupted
    }

    fn lost_authority(&self) -> RunOutcome {
        tracing::warn!(
            task_id = %self.task_id,
            "Project is no longer processing, stopping orchestration",
        );
        RunOutcome::Interrupted
    }
}

fn submit_error_message(err: &RemoteJobError) -> String {
    match err {
        RemoteJobError::Connection(_) => format!("Connection error: {err}"),
        RemoteJobError::Rejected(_) => format!("Processing failed: {err}"),
        RemoteJobError::Io(_) => format!("Failed to read images: {err}"),
    }
}
