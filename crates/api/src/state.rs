use std::sync::Arc;

use orthoflow_events::SubscriberRegistry;
use orthoflow_pipeline::{OrchestratorSupervisor, PipelineConfig, ProjectStore};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Durable project records.
    pub store: Arc<dyn ProjectStore>,
    /// Owner of every running task orchestrator.
    pub supervisor: Arc<OrchestratorSupervisor>,
    /// Per-task progress subscribers (WebSocket clients).
    pub registry: Arc<SubscriberRegistry>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Upload and result directory layout, shared with the orchestrators.
    pub fn pipeline(&self) -> &PipelineConfig {
        self.supervisor.config()
    }
}
