//! Repository for the `projects` table.

use orthoflow_core::progress::{COMPLETE_PROGRESS, MAX_IN_FLIGHT_PROGRESS};
use orthoflow_core::status::ProcessingStatus;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::project::{CreateProject, Project, ProjectUpdate};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, task_id, name, description, status, quality, progress, \
    total_images, processed_area, processing_time, orthophoto_path, dem_path, \
    pointcloud_path, textured_model_path, error_message, console_output, \
    processing_options, remote_task_uuid, created_at, updated_at, completed_at";

/// Maximum page size accepted by [`ProjectRepo::list`].
pub const MAX_LIST_LIMIT: i64 = 100;

/// Provides CRUD operations and guarded state transitions for projects.
pub struct ProjectRepo;

impl ProjectRepo {
    /// Insert a new `pending` project, returning the created row.
    ///
    /// A duplicate `task_id` surfaces as a unique violation on
    /// `uq_projects_task_id`.
    pub async fn create(pool: &PgPool, input: &CreateProject) -> Result<Project, sqlx::Error> {
        let query = format!(
            "INSERT INTO projects (task_id, name, description, quality, total_images)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(&input.task_id)
            .bind(&input.name)
            .bind(&input.description)
            .bind(input.quality.as_str())
            .bind(input.total_images)
            .fetch_one(pool)
            .await
    }

    /// Find a project by its external task identifier.
    pub async fn find_by_task_id(
        pool: &PgPool,
        task_id: &str,
    ) -> Result<Option<Project>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE task_id = $1");
        sqlx::query_as::<_, Project>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// List projects, most recently created first.
    ///
    /// `limit` is capped at [`MAX_LIST_LIMIT`].
    pub async fn list(pool: &PgPool, skip: i64, limit: i64) -> Result<Vec<Project>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM projects
             ORDER BY created_at DESC
             OFFSET $1 LIMIT $2"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(skip.max(0))
            .bind(limit.clamp(0, MAX_LIST_LIMIT))
            .fetch_all(pool)
            .await
    }

    /// List every project in the given status, oldest first.
    pub async fn list_by_status(
        pool: &PgPool,
        status: ProcessingStatus,
    ) -> Result<Vec<Project>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM projects WHERE status = $1 ORDER BY created_at ASC");
        sqlx::query_as::<_, Project>(&query)
            .bind(status.as_str())
            .fetch_all(pool)
            .await
    }

    /// Apply a state transition to the project identified by `task_id`.
    ///
    /// Each statement is guarded on the status the update requires, so a
    /// second terminal write (or any write after a terminal one) affects no
    /// rows. Returns `true` if the row was updated.
    pub async fn apply(
        pool: &PgPool,
        task_id: &str,
        update: &ProjectUpdate,
    ) -> Result<bool, sqlx::Error> {
        let guard = update.required_status().as_str();

        let result = match update {
            ProjectUpdate::StartProcessing { quality, options } => {
                sqlx::query(
                    "UPDATE projects SET
                        status = 'processing',
                        progress = 0,
                        quality = $3,
                        processing_options = $4,
                        error_message = NULL,
                        updated_at = NOW()
                     WHERE task_id = $1 AND status = $2",
                )
                .bind(task_id)
                .bind(guard)
                .bind(quality.as_str())
                .bind(options)
                .execute(pool)
                .await?
            }
            ProjectUpdate::RemoteSubmitted { remote_task_uuid } => {
                sqlx::query(
                    "UPDATE projects SET remote_task_uuid = $3, updated_at = NOW()
                     WHERE task_id = $1 AND status = $2",
                )
                .bind(task_id)
                .bind(guard)
                .bind(remote_task_uuid)
                .execute(pool)
                .await?
            }
            ProjectUpdate::Progress {
                progress,
                console_output,
            } => {
                sqlx::query(
                    "UPDATE projects SET
                        progress = GREATEST(progress, LEAST(GREATEST($3, 0), $5)),
                        console_output = $4,
                        updated_at = NOW()
                     WHERE task_id = $1 AND status = $2",
                )
                .bind(task_id)
                .bind(guard)
                .bind(*progress)
                .bind(Json(console_output))
                .bind(MAX_IN_FLIGHT_PROGRESS)
                .execute(pool)
                .await?
            }
            ProjectUpdate::Completed {
                completed_at,
                processing_time,
                artifacts,
                console_output,
            } => {
                sqlx::query(
                    "UPDATE projects SET
                        status = 'completed',
                        progress = $3,
                        completed_at = $4,
                        processing_time = $5,
                        orthophoto_path = $6,
                        dem_path = $7,
                        pointcloud_path = $8,
                        textured_model_path = $9,
                        console_output = $10,
                        updated_at = $4
                     WHERE task_id = $1 AND status = $2",
                )
                .bind(task_id)
                .bind(guard)
                .bind(COMPLETE_PROGRESS)
                .bind(completed_at)
                .bind(processing_time)
                .bind(&artifacts.orthophoto_path)
                .bind(&artifacts.dem_path)
                .bind(&artifacts.pointcloud_path)
                .bind(&artifacts.textured_model_path)
                .bind(Json(console_output))
                .execute(pool)
                .await?
            }
            ProjectUpdate::Failed {
                error_message,
                console_output,
            } => {
                sqlx::query(
                    "UPDATE projects SET
                        status = 'failed',
                        error_message = $3,
                        console_output = COALESCE($4, console_output),
                        updated_at = NOW()
                     WHERE task_id = $1 AND status = $2",
                )
                .bind(task_id)
                .bind(guard)
                .bind(error_message)
                .bind(console_output.as_ref().map(Json))
                .execute(pool)
                .await?
            }
            ProjectUpdate::Cancelled { error_message } => {
                sqlx::query(
                    "UPDATE projects SET
                        status = 'cancelled',
                        error_message = $3,
                        updated_at = NOW()
                     WHERE task_id = $1 AND status = $2",
                )
                .bind(task_id)
                .bind(guard)
                .bind(error_message)
                .execute(pool)
                .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    /// Permanently delete a project. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, task_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM projects WHERE task_id = $1")
            .bind(task_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
