//! Project record, create DTO and the typed mutations applied to it.

use orthoflow_core::artifacts::ArtifactKind;
use orthoflow_core::console::ConsoleOutput;
use orthoflow_core::progress::{COMPLETE_PROGRESS, MAX_IN_FLIGHT_PROGRESS};
use orthoflow_core::quality::ProcessingQuality;
use orthoflow_core::status::ProcessingStatus;
use orthoflow_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `projects` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Project {
    pub id: DbId,
    pub task_id: String,
    pub name: String,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ProcessingStatus,
    #[sqlx(try_from = "String")]
    pub quality: ProcessingQuality,
    pub progress: i32,
    pub total_images: i32,
    pub processed_area: Option<f64>,
    pub processing_time: Option<f64>,
    pub orthophoto_path: Option<String>,
    pub dem_path: Option<String>,
    pub pointcloud_path: Option<String>,
    pub textured_model_path: Option<String>,
    pub error_message: Option<String>,
    #[sqlx(json)]
    pub console_output: ConsoleOutput,
    pub processing_options: Option<serde_json::Value>,
    pub remote_task_uuid: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// DTO for registering a freshly uploaded project.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub task_id: String,
    pub name: String,
    pub description: Option<String>,
    pub quality: ProcessingQuality,
    pub total_images: i32,
}

/// Paths of the artifacts found in an unpacked result bundle.
///
/// A missing file leaves its field `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultArtifacts {
    pub orthophoto_path: Option<String>,
    pub dem_path: Option<String>,
    pub pointcloud_path: Option<String>,
    pub textured_model_path: Option<String>,
}

impl ResultArtifacts {
    pub fn set(&mut self, kind: ArtifactKind, path: String) {
        match kind {
            ArtifactKind::Orthophoto => self.orthophoto_path = Some(path),
            ArtifactKind::Dem => self.dem_path = Some(path),
            ArtifactKind::PointCloud => self.pointcloud_path = Some(path),
            ArtifactKind::TexturedModel => self.textured_model_path = Some(path),
        }
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::Orthophoto => self.orthophoto_path.as_deref(),
            ArtifactKind::Dem => self.dem_path.as_deref(),
            ArtifactKind::PointCloud => self.pointcloud_path.as_deref(),
            ArtifactKind::TexturedModel => self.textured_model_path.as_deref(),
        }
    }

    pub fn count(&self) -> usize {
        ArtifactKind::ALL
            .into_iter()
            .filter(|k| self.get(*k).is_some())
            .count()
    }
}

/// A state transition applied to a project record.
///
/// Every variant except `StartProcessing` only applies while the record
/// is `processing`; terminal variants therefore take effect at most once.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectUpdate {
    /// `pending -> processing`, resetting progress.
    StartProcessing {
        quality: ProcessingQuality,
        options: serde_json::Value,
    },
    /// Remember the engine's handle for resume-after-restart.
    RemoteSubmitted { remote_task_uuid: String },
    /// New in-flight progress. Never lowers the stored value and never
    /// exceeds 99.
    Progress {
        progress: i32,
        console_output: ConsoleOutput,
    },
    Completed {
        completed_at: Timestamp,
        processing_time: f64,
        artifacts: ResultArtifacts,
        console_output: ConsoleOutput,
    },
    Failed {
        error_message: String,
        console_output: Option<ConsoleOutput>,
    },
    Cancelled { error_message: String },
}

impl ProjectUpdate {
    /// Status the record must be in for this update to apply.
    pub fn required_status(&self) -> ProcessingStatus {
        match self {
            Self::StartProcessing { .. } => ProcessingStatus::Pending,
            _ => ProcessingStatus::Processing,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartProcessing { .. } => "start_processing",
            Self::RemoteSubmitted { .. } => "remote_submitted",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

impl Project {
    /// Apply `update` in memory with the same semantics as
    /// [`ProjectRepo::apply`](crate::repositories::ProjectRepo::apply).
    ///
    /// Returns `false` (and leaves the record untouched) when the record is
    /// not in the status the update requires.
    pub fn apply(&mut self, update: &ProjectUpdate, now: Timestamp) -> bool {
        if self.status != update.required_status() {
            return false;
        }

        match update {
            ProjectUpdate::StartProcessing { quality, options } => {
                self.status = ProcessingStatus::Processing;
                self.progress = 0;
                self.quality = *quality;
                self.processing_options = Some(options.clone());
                self.error_message = None;
            }
            ProjectUpdate::RemoteSubmitted { remote_task_uuid } => {
                self.remote_task_uuid = Some(remote_task_uuid.clone());
            }
            ProjectUpdate::Progress {
                progress,
                console_output,
            } => {
                let clamped = (*progress).clamp(0, MAX_IN_FLIGHT_PROGRESS);
                self.progress = self.progress.max(clamped);
                self.console_output = console_output.clone();
            }
            ProjectUpdate::Completed {
                completed_at,
                processing_time,
                artifacts,
                console_output,
            } => {
                self.status = ProcessingStatus::Completed;
                self.progress = COMPLETE_PROGRESS;
                self.completed_at = Some(*completed_at);
                self.processing_time = Some(*processing_time);
                self.orthophoto_path = artifacts.orthophoto_path.clone();
                self.dem_path = artifacts.dem_path.clone();
                self.pointcloud_path = artifacts.pointcloud_path.clone();
                self.textured_model_path = artifacts.textured_model_path.clone();
                self.console_output = console_output.clone();
                self.updated_at = *completed_at;
                return true;
            }
            ProjectUpdate::Failed {
                error_message,
                console_output,
            } => {
                self.status = ProcessingStatus::Failed;
                self.error_message = Some(error_message.clone());
                if let Some(console) = console_output {
                    self.console_output = console.clone();
                }
            }
            ProjectUpdate::Cancelled { error_message } => {
                self.status = ProcessingStatus::Cancelled;
                self.error_message = Some(error_message.clone());
            }
        }

        self.updated_at = now;
        true
    }

    /// Artifact paths currently recorded on the project.
    pub fn artifacts(&self) -> ResultArtifacts {
        ResultArtifacts {
            orthophoto_path: self.orthophoto_path.clone(),
            dem_path: self.dem_path.clone(),
            pointcloud_path: self.pointcloud_path.clone(),
            textured_model_path: self.textured_model_path.clone(),
        }
    }

    /// Build an in-memory `pending` record, as ingress would insert it.
    ///
    /// Used by stores that do not assign ids or timestamps themselves.
    pub fn pending(id: DbId, input: &CreateProject, now: Timestamp) -> Self {
        Self {
            id,
            task_id: input.task_id.clone(),
            name: input.name.clone(),
            description: input.description.clone(),
            status: ProcessingStatus::Pending,
            quality: input.quality,
            progress: 0,
            total_images: input.total_images,
            processed_area: None,
            processing_time: None,
            orthophoto_path: None,
            dem_path: None,
            pointcloud_path: None,
            textured_model_path: None,
            error_message: None,
            console_output: ConsoleOutput::new(),
            processing_options: None,
            remote_task_uuid: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
