pub mod health;
pub mod projects;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /projects                                  list, upload
/// /projects/{task_id}                        delete
/// /projects/{task_id}/process                start processing (POST)
/// /projects/{task_id}/status                 status and recent console
/// /projects/{task_id}/results                artifact download URLs
/// /projects/{task_id}/download/{file}        artifact download
/// ```
pub fn api_routes(max_upload_size: u64) -> Router<AppState> {
    Router::new().nest("/projects", projects::router(max_upload_size))
}

/// WebSocket progress subscriptions, mounted at the root.
///
/// ```text
/// /ws/{task_id}                              subscribe to one task
/// ```
pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/ws/{task_id}", get(ws::ws_handler))
}
