//! Handlers for the `/projects` resource.
//!
//! Upload stores the images under `UPLOADS_DIR/{task_id}/images` and
//! registers a `pending` record; processing itself is handed to the
//! [`OrchestratorSupervisor`](orthoflow_pipeline::OrchestratorSupervisor).

use std::path::{Path as FsPath, PathBuf};

use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use orthoflow_core::artifacts::ArtifactKind;
use orthoflow_core::error::CoreError;
use orthoflow_core::estimation::estimate_processing_secs;
use orthoflow_core::naming::{generate_task_id, is_valid_task_id};
use orthoflow_core::quality::{ProcessingOptions, ProcessingQuality};
use orthoflow_core::status::ProcessingStatus;
use orthoflow_db::models::project::{CreateProject, Project};
use orthoflow_db::repositories::project_repo::MAX_LIST_LIMIT;
use orthoflow_nodeodm::BUNDLE_FILE_NAME;
use orthoflow_pipeline::assets::{collect_input_images, is_supported_image, AssetError};
use orthoflow_pipeline::StoreError;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::query::ListParams;
use crate::response::{DataResponse, MessageResponse};
use crate::state::AppState;

/// Attempts at finding an unused task id before giving up.
const TASK_ID_ATTEMPTS: usize = 3;

/// Console lines returned by the status endpoint.
const STATUS_CONSOLE_LINES: usize = 20;

/// Download name of the complete result bundle.
const ALL_RESULTS_NAME: &str = "all.zip";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub task_id: String,
    pub uploaded_files: Vec<String>,
    pub total_files: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub task_id: String,
    pub status: ProcessingStatus,
    pub message: String,
    /// Estimated processing time in seconds.
    pub estimated_time: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub task_id: String,
    pub status: ProcessingStatus,
    pub progress: i32,
    pub message: String,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    /// Seconds since creation while processing; total run time once completed.
    pub processing_time: Option<f64>,
    pub console_output: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub task_id: String,
    pub status: ProcessingStatus,
    pub orthophoto_url: Option<String>,
    pub dem_url: Option<String>,
    pub pointcloud_url: Option<String>,
    pub textured_model_url: Option<String>,
    pub processed_area: Option<f64>,
    pub processing_time: Option<f64>,
    pub download_all_url: String,
}

// ── Upload ───────────────────────────────────────────────────────────

/// POST /api/v1/projects
///
/// Accept a multipart upload of drone images and register a `pending`
/// project. Files with unsupported extensions are skipped; optional
/// `name` and `description` text fields label the project.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DataResponse<UploadResponse>>)> {
    let (staged_id, images_dir) = reserve_upload_dir(&state).await?;

    let received = receive_images(&state, &images_dir, &mut multipart).await;
    let upload = match received {
        Ok(upload) if !upload.files.is_empty() => upload,
        Ok(upload) => {
            discard_dir(&state.pipeline().upload_dir(&staged_id)).await;
            let msg = if upload.seen_files == 0 {
                "No files provided"
            } else {
                "No valid images were uploaded"
            };
            return Err(AppError::BadRequest(msg.to_string()));
        }
        Err(e) => {
            discard_dir(&state.pipeline().upload_dir(&staged_id)).await;
            return Err(e);
        }
    };

    let project = register_project(&state, staged_id, &upload).await?;
    tracing::info!(
        task_id = %project.task_id,
        images = upload.files.len(),
        bytes = upload.total_bytes,
        "Project uploaded",
    );

    let total_files = upload.files.len();
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: UploadResponse {
                task_id: project.task_id,
                message: format!("Successfully uploaded {total_files} images"),
                uploaded_files: upload.files,
                total_files,
            },
        }),
    ))
}

// ── List ─────────────────────────────────────────────────────────────

/// GET /api/v1/projects?skip=&limit=
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<DataResponse<Vec<Project>>>> {
    let skip = params.skip.unwrap_or(0).max(0);
    let limit = params.limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let projects = state.store.list(skip, limit).await?;
    Ok(Json(DataResponse { data: projects }))
}

// ── Process ──────────────────────────────────────────────────────────

/// POST /api/v1/projects/{task_id}/process
///
/// Body is an optional JSON [`ProcessingOptions`]; an empty body uses the
/// medium preset.
pub async fn start_processing(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<DataResponse<ProcessResponse>>)> {
    let options: ProcessingOptions = if body.is_empty() {
        ProcessingOptions::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid processing options: {e}")))?
    };
    options
        .validate()
        .map_err(|e| AppError::Core(CoreError::Validation(e.to_string())))?;

    let project = find_project(&state, &task_id).await?;
    if project.status != ProcessingStatus::Pending {
        return Err(AppError::BadRequest(format!(
            "Cannot start processing. Current status: {}",
            project.status
        )));
    }

    let images = match collect_input_images(&state.pipeline().images_dir(&task_id)).await {
        Ok(images) => images,
        Err(AssetError::Missing) => {
            return Err(AppError::Core(CoreError::NotFound {
                entity: "Project files",
                id: task_id,
            }))
        }
        Err(AssetError::Insufficient { .. }) => {
            return Err(AppError::BadRequest(
                "Minimum 3 images required for processing".to_string(),
            ))
        }
        Err(e @ AssetError::Io(_)) => return Err(AppError::InternalError(e.to_string())),
    };

    let estimated_time = estimate_processing_secs(images.len(), options.quality);
    state.supervisor.start(&task_id, options).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: ProcessResponse {
                task_id,
                status: ProcessingStatus::Processing,
                message: "Processing started".to_string(),
                estimated_time,
            },
        }),
    ))
}

// ── Status / results ─────────────────────────────────────────────────

/// GET /api/v1/projects/{task_id}/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<DataResponse<StatusResponse>>> {
    let project = find_project(&state, &task_id).await?;

    let message = match project.status {
        ProcessingStatus::Failed | ProcessingStatus::Cancelled => project
            .error_message
            .clone()
            .unwrap_or_else(|| format!("Processing {}", project.status)),
        ProcessingStatus::Completed => "Processing completed".to_string(),
        _ => format!("Processing: {}%", project.progress),
    };

    let processing_time = match project.status {
        ProcessingStatus::Completed => project.processing_time,
        ProcessingStatus::Processing => {
            Some((Utc::now() - project.created_at).num_milliseconds() as f64 / 1000.0)
        }
        _ => None,
    };

    Ok(Json(DataResponse {
        data: StatusResponse {
            console_output: project.console_output.recent(STATUS_CONSOLE_LINES),
            task_id: project.task_id,
            status: project.status,
            progress: project.progress,
            message,
            created_at: project.created_at,
            updated_at: project.updated_at,
            processing_time,
        },
    }))
}

/// GET /api/v1/projects/{task_id}/results
pub async fn get_results(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<DataResponse<ResultsResponse>>> {
    let project = find_project(&state, &task_id).await?;
    if project.status != ProcessingStatus::Completed {
        return Err(AppError::BadRequest(format!(
            "Processing not completed. Current status: {}",
            project.status
        )));
    }

    let base_url = format!("/api/v1/projects/{task_id}/download");
    let artifacts = project.artifacts();
    let url_for = |kind: ArtifactKind| {
        artifacts
            .get(kind)
            .map(|_| format!("{base_url}/{}", kind.download_name()))
    };

    Ok(Json(DataResponse {
        data: ResultsResponse {
            orthophoto_url: url_for(ArtifactKind::Orthophoto),
            dem_url: url_for(ArtifactKind::Dem),
            pointcloud_url: url_for(ArtifactKind::PointCloud),
            textured_model_url: url_for(ArtifactKind::TexturedModel),
            download_all_url: format!("{base_url}/{ALL_RESULTS_NAME}"),
            task_id: project.task_id,
            status: project.status,
            processed_area: project.processed_area,
            processing_time: project.processing_time,
        },
    }))
}

/// GET /api/v1/projects/{task_id}/download/{file}
///
/// Streams one artifact, or the complete result bundle for `all.zip`.
pub async fn download(
    State(state): State<AppState>,
    Path((task_id, file)): Path<(String, String)>,
) -> AppResult<Response> {
    let project = find_project(&state, &task_id).await?;

    if file == ALL_RESULTS_NAME {
        let bundle = state.pipeline().result_dir(&task_id).join(BUNDLE_FILE_NAME);
        if !tokio::fs::try_exists(&bundle).await.unwrap_or(false) {
            return Err(AppError::Core(CoreError::NotFound {
                entity: "Results",
                id: task_id,
            }));
        }
        return stream_file(&bundle, "application/zip", &format!("{task_id}_results.zip")).await;
    }

    let path = ArtifactKind::from_download_name(&file)
        .and_then(|kind| project.artifacts().get(kind).map(PathBuf::from))
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "File",
                id: file.clone(),
            })
        })?;

    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "File",
            id: file,
        }));
    }
    stream_file(&path, "application/octet-stream", &file).await
}

// ── Delete ───────────────────────────────────────────────────────────

/// DELETE /api/v1/projects/{task_id}
///
/// Stops any running orchestrator first so no write lands after the
/// record is gone.
pub async fn delete(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<DataResponse<MessageResponse>>> {
    find_project(&state, &task_id).await?;

    if state.supervisor.cancel_one(&task_id).await {
        tracing::info!(task_id = %task_id, "Cancelled running task before delete");
    }

    discard_dir(&state.pipeline().upload_dir(&task_id)).await;
    discard_dir(&state.pipeline().result_dir(&task_id)).await;
    state.store.delete(&task_id).await?;

    tracing::info!(task_id = %task_id, "Project deleted");
    Ok(Json(DataResponse {
        data: MessageResponse {
            message: format!("Project {task_id} deleted successfully"),
        },
    }))
}

// ---- private helpers ----

/// What [`receive_images`] kept from the multipart stream.
#[derive(Debug, Default)]
struct ReceivedUpload {
    files: Vec<String>,
    seen_files: usize,
    total_bytes: u64,
    name: Option<String>,
    description: Option<String>,
}

async fn find_project(state: &AppState, task_id: &str) -> AppResult<Project> {
    let missing = || {
        AppError::Core(CoreError::NotFound {
            entity: "Project",
            id: task_id.to_string(),
        })
    };
    if !is_valid_task_id(task_id) {
        return Err(missing());
    }
    state.store.get(task_id).await?.ok_or_else(missing)
}

/// Create a fresh `{task_id}/images` directory under the uploads root.
async fn reserve_upload_dir(state: &AppState) -> AppResult<(String, PathBuf)> {
    let uploads = &state.pipeline().uploads_dir;
    tokio::fs::create_dir_all(uploads)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to create uploads dir: {e}")))?;

    for _ in 0..TASK_ID_ATTEMPTS {
        let task_id = generate_task_id();
        match tokio::fs::create_dir(state.pipeline().upload_dir(&task_id)).await {
            Ok(()) => {
                let images_dir = state.pipeline().images_dir(&task_id);
                tokio::fs::create_dir(&images_dir)
                    .await
                    .map_err(|e| AppError::InternalError(e.to_string()))?;
                return Ok((task_id, images_dir));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(AppError::InternalError(e.to_string())),
        }
    }

    Err(AppError::InternalError(
        "Could not allocate a unique task id".to_string(),
    ))
}

/// Stream every file field of `multipart` into `images_dir`, enforcing the
/// count and total size limits.
async fn receive_images(
    state: &AppState,
    images_dir: &FsPath,
    multipart: &mut Multipart,
) -> AppResult<ReceivedUpload> {
    let max_images = state.config.max_images;
    let max_size = state.config.max_upload_size;
    let mut upload = ReceivedUpload::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            let field_name = field.name().unwrap_or_default().to_string();
            let text = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            let text = text.trim();
            match field_name.as_str() {
                "name" if !text.is_empty() => upload.name = Some(text.to_string()),
                "description" if !text.is_empty() => upload.description = Some(text.to_string()),
                _ => {}
            }
            continue;
        };

        upload.seen_files += 1;
        if upload.seen_files > max_images {
            return Err(AppError::BadRequest(format!(
                "Too many images. Maximum allowed: {max_images}"
            )));
        }

        let Some(file_name) = sanitize_file_name(&raw_name) else {
            tracing::warn!(file = %raw_name, "Skipping unsupported upload");
            continue;
        };

        let dest = images_dir.join(&file_name);
        let mut out = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?
        {
            upload.total_bytes += chunk.len() as u64;
            if upload.total_bytes > max_size {
                return Err(AppError::PayloadTooLarge(format!(
                    "Total upload size exceeds maximum allowed: {:.2}MB",
                    max_size as f64 / (1024.0 * 1024.0)
                )));
            }
            out.write_all(&chunk)
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?;
        }
        out.flush()
            .await
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        if !upload.files.contains(&file_name) {
            upload.files.push(file_name);
        }
    }

    Ok(upload)
}

/// Reduce a client-supplied file name to a safe, supported base name.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next()?.trim();
    if base.is_empty() || base.starts_with('.') || !is_supported_image(base) {
        return None;
    }
    Some(base.to_string())
}

/// Insert the `pending` record, moving the upload to a fresh id when the
/// staged one collides with an existing record.
async fn register_project(
    state: &AppState,
    staged_id: String,
    upload: &ReceivedUpload,
) -> AppResult<Project> {
    let name = upload
        .name
        .clone()
        .unwrap_or_else(|| format!("Project {}", Utc::now().format("%Y-%m-%d %H:%M")));
    let mut task_id = staged_id;
    let mut attempt = 1;

    loop {
        let input = CreateProject {
            task_id: task_id.clone(),
            name: name.clone(),
            description: upload.description.clone(),
            quality: ProcessingQuality::default(),
            total_images: upload.files.len() as i32,
        };

        match state.store.create(&input).await {
            Ok(project) => return Ok(project),
            Err(StoreError::Conflict(_)) if attempt < TASK_ID_ATTEMPTS => {
                let next_id = generate_task_id();
                tracing::warn!(task_id = %task_id, next_id = %next_id, "Task id collision, retrying");
                tokio::fs::rename(
                    state.pipeline().upload_dir(&task_id),
                    state.pipeline().upload_dir(&next_id),
                )
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?;
                task_id = next_id;
                attempt += 1;
            }
            Err(e) => {
                discard_dir(&state.pipeline().upload_dir(&task_id)).await;
                return Err(e.into());
            }
        }
    }
}

async fn discard_dir(dir: &FsPath) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %dir.display(), error = %e, "Failed to remove directory"),
    }
}

async fn stream_file(path: &FsPath, content_type: &str, download_name: &str) -> AppResult<Response> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    let length = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .len();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, length.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{download_name}\""),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::InternalError(e.to_string()))
}
