use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    database: &'static str,
    running_tasks: usize,
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check: database unreachable");
            false
        }
    };

    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if database_ok { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            database: if database_ok { "ok" } else { "unavailable" },
            running_tasks: state.supervisor.running_count().await,
        }),
    )
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
