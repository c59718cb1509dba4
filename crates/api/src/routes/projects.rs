//! Route definitions for the `/projects` resource.

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::projects;
use crate::state::AppState;

/// Routes mounted at `/projects`.
///
/// ```text
/// GET    /                              -> list
/// POST   /                              -> upload (multipart)
/// DELETE /{task_id}                     -> delete
/// POST   /{task_id}/process             -> start_processing
/// GET    /{task_id}/status              -> get_status
/// GET    /{task_id}/results             -> get_results
/// GET    /{task_id}/download/{file}     -> download
/// ```
pub fn router(max_upload_size: u64) -> Router<AppState> {
    // The handler enforces the exact total; the body limit only has to
    // leave room for multipart framing.
    let body_limit = usize::try_from(max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(1024 * 1024);

    Router::new()
        .route(
            "/",
            get(projects::list)
                .post(projects::upload)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/{task_id}", delete(projects::delete))
        .route("/{task_id}/process", post(projects::start_processing))
        .route("/{task_id}/status", get(projects::get_status))
        .route("/{task_id}/results", get(projects::get_results))
        .route("/{task_id}/download/{file}", get(projects::download))
}
