use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orthoflow_api::background::cleanup::{self, RetentionPolicy};
use orthoflow_api::config::ServerConfig;
use orthoflow_api::router::build_app_router;
use orthoflow_api::state::AppState;
use orthoflow_events::SubscriberRegistry;
use orthoflow_nodeodm::{NodeOdmClient, NodeOdmConfig};
use orthoflow_pipeline::{OrchestratorSupervisor, PgProjectStore, PipelineConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "orthoflow_api=debug,orthoflow_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let pipeline_config = PipelineConfig::from_env();
    tracing::info!(
        uploads_dir = %pipeline_config.uploads_dir.display(),
        results_dir = %pipeline_config.results_dir.display(),
        poll_interval_secs = pipeline_config.poll_interval.as_secs(),
        "Loaded pipeline configuration"
    );

    let node_config = NodeOdmConfig::from_env();
    tracing::info!(api_url = %node_config.api_url(), "Loaded NodeODM configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = orthoflow_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    orthoflow_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    orthoflow_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Working directories ---
    for dir in [&pipeline_config.uploads_dir, &pipeline_config.results_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .unwrap_or_else(|e| panic!("Failed to create {}: {e}", dir.display()));
    }

    // --- Orchestration ---
    let store = Arc::new(PgProjectStore::new(pool));
    let client = Arc::new(NodeOdmClient::new(&node_config));
    let registry = Arc::new(SubscriberRegistry::default());

    let retention = RetentionPolicy::new(
        pipeline_config.uploads_dir.clone(),
        config.upload_retention_days,
        pipeline_config.results_dir.clone(),
        config.result_retention_days,
    );

    let supervisor = Arc::new(OrchestratorSupervisor::new(
        store.clone(),
        client,
        Arc::clone(&registry),
        pipeline_config,
    ));

    match supervisor.recover_interrupted().await {
        Ok(report) => tracing::info!(
            resumed = report.resumed.len(),
            failed = report.failed.len(),
            "Interrupted tasks recovered"
        ),
        Err(e) => tracing::error!(error = %e, "Failed to recover interrupted tasks"),
    }

    // --- Background cleanup ---
    let cleanup_cancel = CancellationToken::new();
    let cleanup_handle = tokio::spawn(cleanup::run(retention, cleanup_cancel.clone()));

    // --- App state ---
    let state = AppState {
        store,
        supervisor: Arc::clone(&supervisor),
        registry: Arc::clone(&registry),
        config: Arc::new(config.clone()),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    let shutdown_registry = Arc::clone(&registry);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Ends open WebSocket sessions so connection draining can finish.
            let tasks = shutdown_registry.task_count();
            tracing::info!(tasks, "Closing WebSocket subscriptions");
            shutdown_registry.close_all();
        })
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Orchestrators first; their records stay `processing` and resume on
    // the next start.
    supervisor.stop_all().await;
    tracing::info!("Orchestrators stopped");

    cleanup_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), cleanup_handle).await;
    tracing::info!("Cleanup job stopped");

    // Subscriptions opened while connections were draining.
    registry.close_all();

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
